pub mod job;
pub mod merged;
pub mod settings;

use settings::Settings;
use std::path::Path;

use crate::error::PdfCompressError;

/// Settings for a single compression run. Immutable once the run starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionConfig {
    /// Advisory only: annotates the result message, never drives quality.
    pub target_size_mb: f64,
    /// Starting JPEG quality for every image (1-100).
    pub image_quality: u8,
    /// Longest image side in pixels after recompression.
    pub max_dimension: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        let settings = Settings::default();
        CompressionConfig {
            target_size_mb: settings.target_size_mb,
            image_quality: settings.image_quality,
            max_dimension: settings.max_dimension,
        }
    }
}

impl CompressionConfig {
    pub fn new(target_size_mb: f64, image_quality: u8) -> crate::error::Result<Self> {
        let config = CompressionConfig {
            target_size_mb,
            image_quality,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if !(self.target_size_mb.is_finite() && self.target_size_mb > 0.0) {
            return Err(PdfCompressError::config(format!(
                "target_size_mb must be > 0, got {}",
                self.target_size_mb
            )));
        }
        if !(1..=100).contains(&self.image_quality) {
            return Err(PdfCompressError::config(format!(
                "image_quality must be 1-100, got {}",
                self.image_quality
            )));
        }
        if self.max_dimension == 0 || self.max_dimension > u16::MAX as u32 {
            return Err(PdfCompressError::config(format!(
                "max_dimension must be 1-{}, got {}",
                u16::MAX,
                self.max_dimension
            )));
        }
        Ok(())
    }
}

/// 指定ディレクトリの `settings.yaml` を読み込む。
///
/// 存在しなければデフォルト設定を返す。
pub fn load_settings_in(dir: &Path) -> crate::error::Result<Settings> {
    let settings_path = dir.join("settings.yaml");

    if settings_path.exists() {
        Settings::from_file(&settings_path)
    } else {
        Ok(Settings::default())
    }
}

/// ジョブファイル（または入力PDF）のパスからsettings.yamlを自動検出して読み込む。
///
/// ファイルと同じディレクトリに `settings.yaml` が存在すれば読み込み、
/// 存在しなければデフォルト設定を返す。
pub fn load_settings_for(file_path: &Path) -> crate::error::Result<Settings> {
    let dir = file_path
        .parent()
        .ok_or_else(|| PdfCompressError::config("Cannot determine file directory"))?;
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    load_settings_in(dir)
}
