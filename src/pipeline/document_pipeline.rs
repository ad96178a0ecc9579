// ドキュメント単位: 開く -> 全ページ再構築 -> 最適化して保存 -> サイズ検証

use std::path::Path;

use crate::config::CompressionConfig;
use crate::error::PdfCompressError;
use crate::imaging::{ImageRecompressor, Recompress};
use crate::pdf::reader::PdfReader;
use crate::pdf::writer::PdfWriter;
use crate::pdf::{DocumentReader, DocumentWriter, WriteOptions};
use crate::pipeline::page_rebuilder::{PageRebuilder, PageReport};
use crate::pipeline::progress::{MonotonicProgress, ProgressSink};
use crate::pipeline::result::{CompressionResult, SizeReport};

const PAGES_START_PERCENT: f64 = 10.0;
const PAGES_SPAN_PERCENT: f64 = 70.0;

/// Compress `input` into `output` with the standard image recompressor.
pub fn compress_pdf(
    input: &Path,
    output: &Path,
    config: &CompressionConfig,
    progress: &mut dyn ProgressSink,
) -> CompressionResult {
    DocumentPipeline::new(ImageRecompressor::new(config.max_dimension)).compress(
        input, output, config, progress,
    )
}

/// Runs page rebuilding over a whole document and persists the result.
pub struct DocumentPipeline<R: Recompress> {
    recompressor: R,
    write_options: WriteOptions,
}

impl<R: Recompress> DocumentPipeline<R> {
    pub fn new(recompressor: R) -> Self {
        Self {
            recompressor,
            write_options: WriteOptions::maximum(),
        }
    }

    pub fn with_write_options(mut self, options: WriteOptions) -> Self {
        self.write_options = options;
        self
    }

    /// Blocking, single-threaded compression run.
    ///
    /// Never panics on bad input: every whole-document failure is reported as
    /// an unsuccessful [`CompressionResult`] and a final progress event at 100.
    pub fn compress(
        &self,
        input: &Path,
        output: &Path,
        config: &CompressionConfig,
        progress: &mut dyn ProgressSink,
    ) -> CompressionResult {
        let mut progress = MonotonicProgress::new(progress);

        match self.run(input, output, config, &mut progress) {
            Ok(report) => {
                let result = CompressionResult::completed(&report);
                progress.on_progress(&result.message, 100.0);
                result
            }
            Err(e) => {
                tracing::error!(input = %input.display(), error = %e, "compression failed");
                let result = CompressionResult::failed(format!("❌ Error al comprimir: {e}"));
                progress.on_progress(&result.message, 100.0);
                result
            }
        }
    }

    fn run(
        &self,
        input: &Path,
        output: &Path,
        config: &CompressionConfig,
        progress: &mut dyn ProgressSink,
    ) -> crate::error::Result<SizeReport> {
        config.validate()?;

        progress.on_progress("Abriendo PDF...", 5.0);
        if std::fs::metadata(input).is_ok_and(|m| m.len() == 0) {
            return Err(PdfCompressError::file_stat(format!(
                "{}: empty input file",
                input.display()
            )));
        }
        let reader = PdfReader::open(input)?;
        let mut writer = PdfWriter::new();

        let report = self.rebuild_pages(&reader, &mut writer, config.image_quality, progress)?;
        tracing::info!(
            input = %input.display(),
            spans = report.spans_inserted,
            spans_skipped = report.spans_skipped,
            images_recompressed = report.images_recompressed,
            images_original = report.images_original,
            images_dropped = report.images_dropped,
            "pages rebuilt"
        );

        progress.on_progress("Optimizando documento final...", 85.0);
        writer.save(output, &self.write_options)?;
        drop(writer);
        drop(reader);

        progress.on_progress("Verificando resultado...", 95.0);
        let original_bytes = file_size(input)?;
        let compressed_bytes = file_size(output)?;

        Ok(SizeReport {
            original_bytes,
            compressed_bytes,
            target_size_mb: config.target_size_mb,
        })
    }

    /// Rebuild every page of `reader` into `writer` in document order.
    ///
    /// The output always ends up with exactly as many pages as the source.
    pub fn rebuild_pages<D, W>(
        &self,
        reader: &D,
        writer: &mut W,
        quality: u8,
        progress: &mut dyn ProgressSink,
    ) -> crate::error::Result<PageReport>
    where
        D: DocumentReader + ?Sized,
        W: DocumentWriter + ?Sized,
    {
        let total = reader.page_count();
        progress.on_progress(&format!("Procesando {total} páginas..."), PAGES_START_PERCENT);

        let rebuilder = PageRebuilder::new(&self.recompressor, quality);
        let mut report = PageReport::default();

        for i in 0..total {
            let percent = PAGES_START_PERCENT + (i as f64 / total as f64) * PAGES_SPAN_PERCENT;
            progress.on_progress(&format!("Procesando página {}/{}", i + 1, total), percent);

            let page = reader.get_page(i)?;
            let (_, page_report) = rebuilder.rebuild(reader, &page, writer)?;
            tracing::debug!(page = i + 1, report = ?page_report, "page rebuilt");
            report += page_report;
        }

        Ok(report)
    }
}

fn file_size(path: &Path) -> crate::error::Result<u64> {
    std::fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| PdfCompressError::file_stat(format!("{}: {}", path.display(), e)))
}
