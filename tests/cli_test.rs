// Phase 9: CLI entry point tests

use std::path::Path;
use std::process::Command;

use lopdf::{Document, Object, Stream, dictionary};

fn cargo_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_pdf_compress"))
}

/// Minimal 1-page PDF with a single line of text.
fn create_text_pdf(path: &Path) {
    let mut doc = Document::with_version("1.4");
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        b"BT /F1 12 Tf 72 720 Td (Hola) Tj ET".to_vec(),
    ));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
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
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).expect("failed to save test PDF");
}

// ============================================================
// 1. No arguments shows usage and exits with failure
// ============================================================

#[test]
fn test_main_no_args_shows_usage() {
    let output = cargo_bin().output().expect("failed to execute binary");

    assert!(
        !output.status.success(),
        "should exit with failure when no args given"
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Usage"),
        "stderr should contain 'Usage', got: {stderr}"
    );
}

// ============================================================
// 2. --help flag shows usage and exits with success
// ============================================================

#[test]
fn test_main_help_flag() {
    let output = cargo_bin()
        .arg("--help")
        .output()
        .expect("failed to execute binary");

    assert!(
        output.status.success(),
        "should exit with success for --help"
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Usage"),
        "stderr should contain 'Usage', got: {stderr}"
    );
}

// ============================================================
// 3. --version flag shows version and exits with success
// ============================================================

#[test]
fn test_main_version_flag() {
    let output = cargo_bin()
        .arg("--version")
        .output()
        .expect("failed to execute binary");

    assert!(
        output.status.success(),
        "should exit with success for --version"
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    let version = env!("CARGO_PKG_VERSION");
    assert!(
        stderr.contains(version),
        "stderr should contain version '{version}', got: {stderr}"
    );
}

// ============================================================
// 4. Bad arguments
// ============================================================

#[test]
fn test_main_invalid_quality() {
    let output = cargo_bin()
        .args(["in.pdf", "-q", "abc"])
        .output()
        .expect("failed to execute binary");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ERROR"), "got: {stderr}");
}

#[test]
fn test_main_unknown_option() {
    let output = cargo_bin()
        .args(["in.pdf", "--bogus"])
        .output()
        .expect("failed to execute binary");
    assert!(!output.status.success());
}

// ============================================================
// 5. Single-file mode
// ============================================================

#[test]
fn test_main_compresses_single_file() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let input = dir.path().join("doc.pdf");
    create_text_pdf(&input);

    let output = cargo_bin()
        .arg(&input)
        .output()
        .expect("failed to execute binary");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "stderr: {stderr}");
    assert!(stderr.contains("Compresión completada"), "stderr: {stderr}");
    assert!(
        dir.path().join("doc_comprimido.pdf").exists(),
        "default output path should be <stem>_comprimido.pdf"
    );
}

#[test]
fn test_main_json_output() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let input = dir.path().join("doc.pdf");
    let out_path = dir.path().join("small.pdf");
    create_text_pdf(&input);

    let output = cargo_bin()
        .arg(&input)
        .arg("-o")
        .arg(&out_path)
        .args(["-q", "40", "-t", "1", "--json"])
        .output()
        .expect("failed to execute binary");

    assert!(output.status.success());
    let result: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(result["success"], serde_json::Value::Bool(true));
    assert_eq!(result["target_met"], serde_json::Value::Bool(true));
    assert!(out_path.exists());
}

#[test]
fn test_main_output_equal_to_input_is_rejected() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let input = dir.path().join("doc.pdf");
    create_text_pdf(&input);
    let before = std::fs::read(&input).expect("read input");

    let output = cargo_bin()
        .arg(&input)
        .arg("-o")
        .arg(dir.path().join(".").join("doc.pdf"))
        .output()
        .expect("failed to execute binary");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("output path equals input path"), "stderr: {stderr}");
    assert_eq!(std::fs::read(&input).expect("read input"), before);
}

#[test]
fn test_main_missing_input_fails() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let output = cargo_bin()
        .arg(dir.path().join("missing.pdf"))
        .output()
        .expect("failed to execute binary");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error al comprimir"), "stderr: {stderr}");
}

// ============================================================
// 6. Job-file mode
// ============================================================

#[test]
fn test_main_nonexistent_job_file() {
    let unique_path = std::env::temp_dir().join(format!(
        "nonexistent_job_file_{}.yaml",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock error")
            .as_nanos()
    ));
    let output = cargo_bin()
        .arg(unique_path.as_os_str())
        .output()
        .expect("failed to execute binary");

    assert!(
        !output.status.success(),
        "should exit with failure for nonexistent file"
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("ERROR"),
        "stderr should contain error message, got: {stderr}"
    );
}

#[test]
fn test_main_job_file_runs_all_jobs() {
    let dir = tempfile::tempdir().expect("create temp dir");
    create_text_pdf(&dir.path().join("a.pdf"));
    create_text_pdf(&dir.path().join("b.pdf"));
    let job_path = dir.path().join("jobs.yaml");
    std::fs::write(
        &job_path,
        "jobs:\n  - input: a.pdf\n  - input: b.pdf\n    output: b_small.pdf\n",
    )
    .expect("write job file");

    let output = cargo_bin()
        .arg(&job_path)
        .output()
        .expect("failed to execute binary");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "stderr: {stderr}");
    assert_eq!(stderr.matches("OK:").count(), 2, "stderr: {stderr}");
    assert!(dir.path().join("a_comprimido.pdf").exists());
    assert!(dir.path().join("b_small.pdf").exists());
}

#[test]
fn test_main_job_file_partial_failure_exits_nonzero() {
    let dir = tempfile::tempdir().expect("create temp dir");
    create_text_pdf(&dir.path().join("a.pdf"));
    let job_path = dir.path().join("jobs.yaml");
    std::fs::write(&job_path, "jobs:\n  - input: a.pdf\n  - input: gone.pdf\n")
        .expect("write job file");

    let output = cargo_bin()
        .arg(&job_path)
        .arg("--json")
        .output()
        .expect("failed to execute binary");

    assert!(!output.status.success());
    let results: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    let results = results.as_array().expect("array of job results");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["result"]["success"], serde_json::Value::Bool(true));
    assert_eq!(results[1]["result"]["success"], serde_json::Value::Bool(false));
    assert!(dir.path().join("a_comprimido.pdf").exists());
}
