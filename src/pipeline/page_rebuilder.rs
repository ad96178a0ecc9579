// ページ単位: テキスト再挿入 -> 画像の再圧縮と挿入（失敗時は元画像、それも失敗したら破棄）

use std::ops::AddAssign;

use serde::Serialize;

use crate::imaging::Recompress;
use crate::pdf::{DocumentReader, DocumentWriter, ImageRef, PageHandle, SourcePage};

/// Per-page element outcome counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageReport {
    pub spans_inserted: usize,
    pub spans_skipped: usize,
    pub images_recompressed: usize,
    pub images_original: usize,
    pub images_dropped: usize,
}

impl AddAssign for PageReport {
    fn add_assign(&mut self, other: Self) {
        self.spans_inserted += other.spans_inserted;
        self.spans_skipped += other.spans_skipped;
        self.images_recompressed += other.images_recompressed;
        self.images_original += other.images_original;
        self.images_dropped += other.images_dropped;
    }
}

/// How one image ended up on the output page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageOutcome {
    Recompressed,
    Original,
    Dropped,
}

/// Recreates source pages in an output document.
pub struct PageRebuilder<'a, R: Recompress + ?Sized> {
    recompressor: &'a R,
    quality: u8,
}

impl<'a, R: Recompress + ?Sized> PageRebuilder<'a, R> {
    pub fn new(recompressor: &'a R, quality: u8) -> Self {
        Self {
            recompressor,
            quality,
        }
    }

    /// Append a page equivalent to `page` to `out`.
    ///
    /// Text spans are inserted first, then images, both in source order.
    /// Element failures are logged and counted, never returned; the only error
    /// is failing to create the output page itself.
    pub fn rebuild<D, W>(
        &self,
        source: &D,
        page: &SourcePage,
        out: &mut W,
    ) -> crate::error::Result<(PageHandle, PageReport)>
    where
        D: DocumentReader + ?Sized,
        W: DocumentWriter + ?Sized,
    {
        let handle = out.new_page(page.rect)?;
        let mut report = PageReport::default();
        let page_no = page.index + 1;

        if page.rotation != 0
            && let Err(e) = out.set_rotation(handle, page.rotation)
        {
            tracing::warn!(page = page_no, rotation = page.rotation, error = %e, "rotation dropped");
        }

        for span in &page.text_spans {
            if span.text.trim().is_empty() {
                report.spans_skipped += 1;
                continue;
            }
            match out.insert_text(handle, span.top_left(), &span.text, span.font_size) {
                Ok(()) => report.spans_inserted += 1,
                Err(e) => {
                    tracing::debug!(page = page_no, text = %span.text, error = %e, "text span skipped");
                    report.spans_skipped += 1;
                }
            }
        }

        for image in &page.image_refs {
            match self.rebuild_image(source, image, handle, out) {
                ImageOutcome::Recompressed => report.images_recompressed += 1,
                ImageOutcome::Original => report.images_original += 1,
                ImageOutcome::Dropped => report.images_dropped += 1,
            }
        }

        Ok((handle, report))
    }

    fn rebuild_image<D, W>(
        &self,
        source: &D,
        image: &ImageRef,
        handle: PageHandle,
        out: &mut W,
    ) -> ImageOutcome
    where
        D: DocumentReader + ?Sized,
        W: DocumentWriter + ?Sized,
    {
        let original = match source.extract_image(image) {
            Ok(extracted) => extracted,
            Err(e) => {
                tracing::warn!(object = ?image.id, error = %e, "image dropped: cannot extract");
                return ImageOutcome::Dropped;
            }
        };

        let recompressed = self
            .recompressor
            .recompress(&original.data, self.quality)
            .and_then(|r| out.insert_image(handle, &image.bbox, &r.data));
        match recompressed {
            Ok(()) => return ImageOutcome::Recompressed,
            Err(e) => {
                tracing::debug!(
                    object = ?image.id,
                    format = original.ext,
                    error = %e,
                    "recompression failed, keeping original"
                );
            }
        }

        match out.insert_image(handle, &image.bbox, &original.data) {
            Ok(()) => ImageOutcome::Original,
            Err(e) => {
                tracing::warn!(object = ?image.id, error = %e, "image dropped: cannot insert");
                ImageOutcome::Dropped
            }
        }
    }
}
