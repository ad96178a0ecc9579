// Phase 6: パイプライン統合テスト（ページ再構築、進捗、ジョブ実行）

use std::cell::Cell;
use std::path::Path;

use image::{DynamicImage, ImageFormat, RgbImage};
use lopdf::{Dictionary, Document, Object, Stream, dictionary};

use pdf_compress::config::CompressionConfig;
use pdf_compress::error::PdfCompressError;
use pdf_compress::imaging::{ImageRecompressor, Recompress, Recompressed};
use pdf_compress::pdf::reader::PdfReader;
use pdf_compress::pdf::writer::PdfWriter;
use pdf_compress::pdf::{DocumentReader, DocumentWriter, WriteOptions};
use pdf_compress::pipeline::orchestrator::{
    BatchJob, check_output_paths, is_same_file, load_job_file, run_all_jobs,
};
use pdf_compress::pipeline::progress::NoProgress;
use pdf_compress::pipeline::{DocumentPipeline, PageRebuilder, PageReport};

// ============================================================
// Helpers
// ============================================================

/// 再圧縮を常に失敗させる
struct FailingRecompressor {
    calls: Cell<usize>,
}

impl Recompress for FailingRecompressor {
    fn recompress(&self, _data: &[u8], _quality: u8) -> pdf_compress::error::Result<Recompressed> {
        self.calls.set(self.calls.get() + 1);
        Err(PdfCompressError::image_encode("forced failure"))
    }
}

fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 7 % 256) as u8, (y * 3 % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut buf), ImageFormat::Jpeg)
        .expect("encode JPEG");
    buf
}

/// 各ページ: テキスト1行 + JPEG画像1枚。2ページ目は別サイズ。
fn create_test_pdf(path: &Path) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });

    let sizes = [(612, 792), (420, 595)];
    let mut kids: Vec<Object> = Vec::new();
    for (i, (w, h)) in sizes.iter().enumerate() {
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 120,
                "Height" => 80,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg_bytes(120, 80),
        ));
        let content = format!(
            "BT /F1 14 Tf 72 {} Td (Pagina {}) Tj ET q 240 0 0 160 72 200 cm /Im0 Do Q",
            h - 100,
            i + 1
        );
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), (*w).into(), (*h).into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
                "XObject" => dictionary! { "Im0" => image_id },
            },
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => sizes.len() as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).expect("save test PDF");
}

/// テキスト1行だけのページを並べる。`page_entries` はページ辞書に足す寸法・回転の項目。
fn create_geometry_pdf(path: &Path, page_entries: Vec<Dictionary>) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids: Vec<Object> = Vec::new();
    for entries in page_entries {
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            b"BT /F1 12 Tf 20 40 Td (Hola) Tj ET".to_vec(),
        ));
        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        };
        for (key, value) in entries.into_iter() {
            page.set(key, value);
        }
        kids.push(doc.add_object(page).into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).expect("save test PDF");
}

fn media_box_of(doc: &Document, page_id: lopdf::ObjectId) -> Vec<f64> {
    doc.get_dictionary(page_id)
        .expect("page")
        .get(b"MediaBox")
        .and_then(Object::as_array)
        .expect("MediaBox")
        .iter()
        .map(|v| v.as_float().map(f64::from).expect("number"))
        .collect()
}

fn count_images(doc: &Document) -> usize {
    doc.get_pages()
        .values()
        .map(|&page_id| {
            let (resources, _) = doc.get_page_resources(page_id).expect("resources");
            resources
                .and_then(|r: &Dictionary| r.get(b"XObject").ok())
                .and_then(|x| x.as_dict().ok())
                .map_or(0, |x| x.len())
        })
        .sum()
}

// ============================================================
// 1. ページ再構築
// ============================================================

#[test]
fn test_rebuild_keeps_page_count_and_sizes() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let input = dir.path().join("in.pdf");
    create_test_pdf(&input);

    let reader = PdfReader::open(&input).expect("open");
    let mut writer = PdfWriter::new();
    let pipeline = DocumentPipeline::new(ImageRecompressor::default());
    let report = pipeline
        .rebuild_pages(&reader, &mut writer, 50, &mut NoProgress)
        .expect("rebuild");

    assert_eq!(writer.page_count(), 2);
    assert_eq!(report.spans_inserted, 2);
    assert_eq!(report.images_recompressed + report.images_original, 2);
    assert_eq!(report.images_dropped, 0);

    let bytes = writer
        .save_to_bytes(&WriteOptions::maximum())
        .expect("save");
    let rebuilt = PdfReader::from_bytes(&bytes).expect("reopen");
    for i in 0..2 {
        let before = reader.get_page(i).expect("source page");
        let after = rebuilt.get_page(i).expect("output page");
        assert!((before.rect.width - after.rect.width).abs() < 0.01);
        assert!((before.rect.height - after.rect.height).abs() < 0.01);
        assert_eq!(after.text_spans.len(), 1);
        assert_eq!(after.text_spans[0].text, format!("Pagina {}", i + 1));
        assert_eq!(after.image_refs.len(), 1);

        let src = &before.image_refs[0].bbox;
        let dst = &after.image_refs[0].bbox;
        assert!((src.x_min - dst.x_min).abs() < 0.01);
        assert!((src.y_min - dst.y_min).abs() < 0.01);
        assert!((src.width() - dst.width()).abs() < 0.01);
        assert!((src.height() - dst.height()).abs() < 0.01);
    }
}

#[test]
fn test_failing_recompressor_keeps_original_image() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let input = dir.path().join("in.pdf");
    create_test_pdf(&input);

    let reader = PdfReader::open(&input).expect("open");
    let recompressor = FailingRecompressor {
        calls: Cell::new(0),
    };
    let rebuilder = PageRebuilder::new(&recompressor, 50);

    let mut writer = PdfWriter::new();
    let mut total = PageReport::default();
    for i in 0..reader.page_count() {
        let page = reader.get_page(i).expect("page");
        let (_, report) = rebuilder.rebuild(&reader, &page, &mut writer).expect("rebuild");
        total += report;
    }

    assert_eq!(recompressor.calls.get(), 2);
    assert_eq!(total.images_original, 2);
    assert_eq!(total.images_recompressed, 0);
    assert_eq!(total.images_dropped, 0);

    // 元のJPEGがそのまま入っている
    let bytes = writer.save_to_bytes(&WriteOptions::default()).expect("save");
    let rebuilt = PdfReader::from_bytes(&bytes).expect("reopen");
    let page = rebuilt.get_page(0).expect("page");
    let extracted = rebuilt.extract_image(&page.image_refs[0]).expect("extract");
    let original_page = reader.get_page(0).expect("page");
    let original = reader
        .extract_image(&original_page.image_refs[0])
        .expect("extract");
    assert_eq!(extracted.data, original.data);
}

#[test]
fn test_whole_run_succeeds_with_failing_recompressor() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let input = dir.path().join("in.pdf");
    let output = dir.path().join("out.pdf");
    create_test_pdf(&input);

    let pipeline = DocumentPipeline::new(FailingRecompressor {
        calls: Cell::new(0),
    });
    let result = pipeline.compress(&input, &output, &CompressionConfig::default(), &mut NoProgress);

    assert!(result.success, "message: {}", result.message);
    let doc = Document::load(&output).expect("load output");
    assert_eq!(doc.get_pages().len(), 2);
    assert_eq!(count_images(&doc), 2);
}

#[test]
fn test_whitespace_spans_are_skipped() {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        b"BT /F1 12 Tf 10 10 Td (   ) Tj 0 20 Td (ok) Tj ET".to_vec(),
    ));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 200.into(), 200.into()],
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("save");

    let reader = PdfReader::from_bytes(&bytes).expect("open");
    let recompressor = ImageRecompressor::default();
    let rebuilder = PageRebuilder::new(&recompressor, 50);
    let mut writer = PdfWriter::new();
    let page = reader.get_page(0).expect("page");
    let (_, report) = rebuilder.rebuild(&reader, &page, &mut writer).expect("rebuild");

    assert_eq!(report.spans_inserted, 1);
    assert_eq!(report.spans_skipped, 1);
}

// ============================================================
// 1b. ページ寸法と回転
// ============================================================

#[test]
fn test_unusable_media_box_keeps_page_count() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let input = dir.path().join("bad_box.pdf");
    let output = dir.path().join("bad_box_out.pdf");
    create_geometry_pdf(
        &input,
        vec![
            dictionary! { "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()] },
            dictionary! { "MediaBox" => vec![0.into(), 0.into(), 0.into(), 0.into()] },
        ],
    );

    let result = DocumentPipeline::new(ImageRecompressor::default()).compress(
        &input,
        &output,
        &CompressionConfig::default(),
        &mut NoProgress,
    );
    assert!(result.success, "message: {}", result.message);

    let out = Document::load(&output).expect("load output");
    let pages = out.get_pages();
    assert_eq!(pages.len(), 2);
    assert_eq!(media_box_of(&out, pages[&2]), vec![0.0, 0.0, 612.0, 792.0]);
}

#[test]
fn test_indirect_media_box_values_are_resolved() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let input = dir.path().join("indirect.pdf");
    let output = dir.path().join("indirect_out.pdf");

    // MediaBoxの要素が間接参照のPDFを直接組み立てる
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let height_id = doc.add_object(Object::Integer(500));
    let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "MediaBox" => vec![0.into(), 0.into(), 300.into(), Object::Reference(height_id)],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);
    doc.save(&input).expect("save test PDF");

    let result = DocumentPipeline::new(ImageRecompressor::default()).compress(
        &input,
        &output,
        &CompressionConfig::default(),
        &mut NoProgress,
    );
    assert!(result.success, "message: {}", result.message);

    let out = Document::load(&output).expect("load output");
    let pages = out.get_pages();
    assert_eq!(media_box_of(&out, pages[&1]), vec![0.0, 0.0, 300.0, 500.0]);
}

#[test]
fn test_crop_box_and_rotation_carried_to_output() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let input = dir.path().join("rotated.pdf");
    let output = dir.path().join("rotated_out.pdf");
    create_geometry_pdf(
        &input,
        vec![dictionary! {
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "CropBox" => vec![0.into(), 0.into(), 300.into(), 400.into()],
            "Rotate" => 90,
        }],
    );

    let result = DocumentPipeline::new(ImageRecompressor::default()).compress(
        &input,
        &output,
        &CompressionConfig::default(),
        &mut NoProgress,
    );
    assert!(result.success, "message: {}", result.message);

    let out = Document::load(&output).expect("load output");
    let page_id = out.get_pages()[&1];
    assert_eq!(media_box_of(&out, page_id), vec![0.0, 0.0, 300.0, 400.0]);
    let rotate = out
        .get_dictionary(page_id)
        .expect("page")
        .get(b"Rotate")
        .and_then(Object::as_i64)
        .expect("Rotate");
    assert_eq!(rotate, 90);

    // テキストは回転前の座標のまま
    let reader = PdfReader::open(&output).expect("reopen");
    let page = reader.get_page(0).expect("page");
    assert_eq!(page.rotation, 90);
    assert_eq!(page.text_spans[0].text, "Hola");
    assert!((page.text_spans[0].bbox.x_min - 20.0).abs() < 0.5);
}

// ============================================================
// 2. 進捗通知
// ============================================================

#[test]
fn test_progress_is_monotonic_and_ends_at_100() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let input = dir.path().join("in.pdf");
    let output = dir.path().join("out.pdf");
    create_test_pdf(&input);

    let mut events: Vec<(String, f64)> = Vec::new();
    let mut record = |message: &str, percent: f64| events.push((message.to_string(), percent));
    let result = DocumentPipeline::new(ImageRecompressor::default()).compress(
        &input,
        &output,
        &CompressionConfig::default(),
        &mut record,
    );
    assert!(result.success, "message: {}", result.message);

    assert!(events.len() >= 5);
    for pair in events.windows(2) {
        assert!(pair[0].1 <= pair[1].1, "progress went backwards: {:?}", pair);
    }
    assert!(events.iter().all(|(_, p)| (0.0..=100.0).contains(p)));
    let (last_message, last_percent) = events.last().expect("events");
    assert_eq!(*last_percent, 100.0);
    assert_eq!(*last_message, result.message);
    assert!(events.iter().any(|(m, _)| m == "Procesando página 2/2"));
}

#[test]
fn test_progress_on_failure_ends_at_100() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let mut last = None;
    let mut record = |_: &str, percent: f64| last = Some(percent);
    let result = DocumentPipeline::new(ImageRecompressor::default()).compress(
        &dir.path().join("missing.pdf"),
        &dir.path().join("out.pdf"),
        &CompressionConfig::default(),
        &mut record,
    );
    assert!(!result.success);
    assert_eq!(last, Some(100.0));
}

// ============================================================
// 3. 失敗の扱い
// ============================================================

#[test]
fn test_empty_input_file_fails() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let input = dir.path().join("empty.pdf");
    std::fs::write(&input, b"").expect("write empty file");

    let result = DocumentPipeline::new(ImageRecompressor::default()).compress(
        &input,
        &dir.path().join("out.pdf"),
        &CompressionConfig::default(),
        &mut NoProgress,
    );
    assert!(!result.success);
    assert!(result.message.starts_with("❌ Error al comprimir"));
}

#[test]
fn test_invalid_config_fails_before_opening() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let input = dir.path().join("in.pdf");
    create_test_pdf(&input);
    let config = CompressionConfig {
        image_quality: 0,
        ..CompressionConfig::default()
    };

    let result = DocumentPipeline::new(ImageRecompressor::default()).compress(
        &input,
        &dir.path().join("out.pdf"),
        &config,
        &mut NoProgress,
    );
    assert!(!result.success);
    assert!(!dir.path().join("out.pdf").exists());
}

// ============================================================
// 4. ジョブファイルと並列実行
// ============================================================

#[test]
fn test_load_job_file_resolves_paths_and_settings() {
    let dir = tempfile::tempdir().expect("create temp dir");
    std::fs::write(
        dir.path().join("settings.yaml"),
        "image_quality: 40\nparallel_workers: 2\n",
    )
    .expect("write settings");
    let job_path = dir.path().join("jobs.yaml");
    std::fs::write(
        &job_path,
        "jobs:\n  - input: a.pdf\n  - input: b.pdf\n    output: out/b.pdf\n    image_quality: 90\n",
    )
    .expect("write jobs");

    let (jobs, workers) = load_job_file(&job_path).expect("load job file");
    assert_eq!(workers, 2);
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].input_path, dir.path().join("a.pdf"));
    assert_eq!(jobs[0].output_path, dir.path().join("a_comprimido.pdf"));
    assert_eq!(jobs[0].config.image_quality, 40);
    assert_eq!(jobs[1].output_path, dir.path().join("out/b.pdf"));
    assert_eq!(jobs[1].config.image_quality, 90);
}

#[test]
fn test_check_output_paths_rejects_duplicates() {
    let job = |input: &str, output: &str| BatchJob {
        input_path: input.into(),
        output_path: output.into(),
        config: CompressionConfig::default(),
    };
    assert!(check_output_paths(&[job("a.pdf", "x.pdf"), job("b.pdf", "y.pdf")]).is_ok());
    assert!(check_output_paths(&[job("a.pdf", "x.pdf"), job("b.pdf", "x.pdf")]).is_err());
    assert!(check_output_paths(&[job("a.pdf", "a.pdf")]).is_err());
}

#[test]
fn test_same_file_through_different_spellings() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let input = dir.path().join("doc.pdf");
    std::fs::write(&input, b"%PDF").expect("write file");

    assert!(is_same_file(&input, &dir.path().join(".").join("doc.pdf")));
    assert!(!is_same_file(&input, &dir.path().join("doc_comprimido.pdf")));
}

#[test]
fn test_run_all_jobs_isolates_failures() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let good = dir.path().join("good.pdf");
    create_test_pdf(&good);

    let jobs = vec![
        BatchJob {
            input_path: good.clone(),
            output_path: dir.path().join("good_out.pdf"),
            config: CompressionConfig::default(),
        },
        BatchJob {
            input_path: dir.path().join("missing.pdf"),
            output_path: dir.path().join("missing_out.pdf"),
            config: CompressionConfig::default(),
        },
    ];

    for workers in [1, 2] {
        let results = run_all_jobs(&jobs, workers).expect("run jobs");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].input_path, good);
        assert!(results[0].result.success, "{}", results[0].result.message);
        assert!(!results[1].result.success);
        assert!(dir.path().join("good_out.pdf").exists());
        assert!(!dir.path().join("missing_out.pdf").exists());
    }
}

#[test]
fn test_run_all_jobs_empty() {
    let results = run_all_jobs(&[], 0).expect("no jobs");
    assert!(results.is_empty());
}
