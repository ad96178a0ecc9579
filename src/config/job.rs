use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::PdfCompressError;

#[derive(Debug, Clone, Deserialize)]
pub struct JobFile {
    pub jobs: Vec<Job>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    pub input: String,
    pub output: Option<String>,
    pub target_size_mb: Option<f64>,
    pub image_quality: Option<u8>,
}

impl JobFile {
    pub fn from_yaml(yaml: &str) -> crate::error::Result<Self> {
        let job_file: JobFile = serde_yml::from_str(yaml)?;
        if job_file.jobs.is_empty() {
            return Err(PdfCompressError::config("Job file contains no jobs"));
        }
        for job in &job_file.jobs {
            if job.input.trim().is_empty() {
                return Err(PdfCompressError::config("Job input path cannot be empty"));
            }
        }
        Ok(job_file)
    }

    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}

/// 入力パスから既定の出力パスを組み立てる。
///
/// `report.pdf` + `_comprimido` → `report_comprimido.pdf`（入力と同じディレクトリ）
pub fn default_output_path(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    input.with_file_name(format!("{stem}{suffix}.pdf"))
}

/// Resolve a potentially relative path against a base directory.
/// If the path is already absolute, return it as-is.
pub fn resolve_path(base_dir: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}
