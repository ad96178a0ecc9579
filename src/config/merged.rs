use super::CompressionConfig;
use super::job::Job;
use super::settings::Settings;

#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub target_size_mb: f64,
    pub image_quality: u8,
    pub max_dimension: u32,
    pub parallel_workers: usize,
    pub output_suffix: String,
}

impl MergedConfig {
    /// JobのOption値がSomeならJobの値を、NoneならSettingsの値を使用する。
    pub fn new(settings: &Settings, job: &Job) -> Self {
        MergedConfig {
            target_size_mb: job.target_size_mb.unwrap_or(settings.target_size_mb),
            image_quality: job.image_quality.unwrap_or(settings.image_quality),
            max_dimension: settings.max_dimension,
            parallel_workers: settings.parallel_workers,
            output_suffix: settings.output_suffix.clone(),
        }
    }

    /// 1回の圧縮実行に渡す検証済み設定を作る。
    pub fn compression_config(&self) -> crate::error::Result<CompressionConfig> {
        let config = CompressionConfig {
            target_size_mb: self.target_size_mb,
            image_quality: self.image_quality,
            max_dimension: self.max_dimension,
        };
        config.validate()?;
        Ok(config)
    }
}
