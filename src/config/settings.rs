use std::path::Path;

use serde::Deserialize;

use super::CompressionConfig;
use crate::error::PdfCompressError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Advisory output size; only annotates the summary message.
    pub target_size_mb: f64,
    /// Starting JPEG quality for every image (1-100).
    pub image_quality: u8,
    /// Longest image side in pixels after recompression.
    pub max_dimension: u32,
    /// Batch worker threads (0 = rayon default).
    pub parallel_workers: usize,
    /// Suffix appended to the input stem when a job has no explicit output.
    pub output_suffix: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            target_size_mb: 15.0,
            image_quality: 50,
            max_dimension: 1200,
            parallel_workers: 0,
            output_suffix: "_comprimido".to_string(),
        }
    }
}

impl Settings {
    pub fn from_yaml(yaml: &str) -> crate::error::Result<Self> {
        let settings: Settings = serde_yml::from_str(yaml).map_err(|e| {
            PdfCompressError::config(format!("Failed to parse settings YAML: {e}"))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        self.compression_config().validate()
    }

    /// 設定値をそのまま1回の実行用設定に写す（ジョブ上書きなし）。
    pub fn compression_config(&self) -> CompressionConfig {
        CompressionConfig {
            target_size_mb: self.target_size_mb,
            image_quality: self.image_quality,
            max_dimension: self.max_dimension,
        }
    }
}
