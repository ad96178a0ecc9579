use serde::Serialize;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// バイト数をMB（1024*1024バイト）に換算する。
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// 入力と出力のファイルサイズ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeReport {
    pub original_bytes: u64,
    pub compressed_bytes: u64,
    pub target_size_mb: f64,
}

impl SizeReport {
    pub fn original_mb(&self) -> f64 {
        bytes_to_mb(self.original_bytes)
    }

    pub fn compressed_mb(&self) -> f64 {
        bytes_to_mb(self.compressed_bytes)
    }

    /// 削減率 (1 - compressed/original) * 100。出力の方が大きければ負になる。
    pub fn compression_ratio(&self) -> f64 {
        (1.0 - self.compressed_bytes as f64 / self.original_bytes as f64) * 100.0
    }

    pub fn target_met(&self) -> bool {
        self.compressed_mb() <= self.target_size_mb
    }

    pub fn summary_message(&self) -> String {
        let mut message = format!(
            "✅ Compresión completada!\n\
             Tamaño original: {:.2} MB\n\
             Tamaño comprimido: {:.2} MB\n\
             Reducción: {:.1}%",
            self.original_mb(),
            self.compressed_mb(),
            self.compression_ratio()
        );
        if self.target_met() {
            message.push_str(&format!(
                "\n🎯 Objetivo de {} MB alcanzado!",
                self.target_size_mb
            ));
        } else {
            message.push_str(&format!(
                "\n⚠️ Objetivo: {} MB (puedes reducir más la calidad)",
                self.target_size_mb
            ));
        }
        message
    }
}

/// 1回の圧縮実行の結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressionResult {
    pub success: bool,
    pub message: String,
    pub original_size_mb: f64,
    pub compressed_size_mb: f64,
    pub ratio_percent: f64,
    pub target_met: bool,
}

impl CompressionResult {
    pub fn completed(report: &SizeReport) -> Self {
        CompressionResult {
            success: true,
            message: report.summary_message(),
            original_size_mb: report.original_mb(),
            compressed_size_mb: report.compressed_mb(),
            ratio_percent: report.compression_ratio(),
            target_met: report.target_met(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        CompressionResult {
            success: false,
            message: message.into(),
            original_size_mb: 0.0,
            compressed_size_mb: 0.0,
            ratio_percent: 0.0,
            target_met: false,
        }
    }

    /// 呼び出し側向けの `(success, message)` の組
    pub fn into_pair(self) -> (bool, String) {
        (self.success, self.message)
    }
}
