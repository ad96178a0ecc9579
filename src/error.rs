use thiserror::Error;

#[derive(Debug, Error)]
pub enum PdfCompressError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("No se pudo abrir el PDF: {0}")]
    DocumentOpenError(String),

    #[error("PDF read error: {0}")]
    PdfReadError(String),

    #[error("Content stream error: {0}")]
    ContentStreamError(String),

    #[error("Image extract error: {0}")]
    ImageExtractError(String),

    #[error("Image decode error: {0}")]
    ImageDecodeError(String),

    #[error("Image encode error: {0}")]
    ImageEncodeError(String),

    #[error("Image insert error: {0}")]
    ImageInsertError(String),

    #[error("Text insert error: {0}")]
    TextInsertError(String),

    #[error("No se pudo guardar el PDF: {0}")]
    DocumentSaveError(String),

    #[error("No se pudo verificar el tamaño: {0}")]
    FileStatError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Generates factory methods for [`PdfCompressError`] variants that wrap a `String`.
macro_rules! error_constructors {
    ($(
        $(#[doc = $doc:expr])*
        $method:ident => $variant:ident
    ),* $(,)?) => {
        impl PdfCompressError {
            $(
                $(#[doc = $doc])*
                pub fn $method(msg: impl Into<String>) -> Self {
                    Self::$variant(msg.into())
                }
            )*
        }
    };
}

error_constructors! {
    /// Create a configuration error.
    config => ConfigError,
    /// Create a document open error.
    document_open => DocumentOpenError,
    /// Create a PDF read error.
    pdf_read => PdfReadError,
    /// Create a content stream error.
    content_stream => ContentStreamError,
    /// Create an image extract error.
    image_extract => ImageExtractError,
    /// Create an image decode error.
    image_decode => ImageDecodeError,
    /// Create an image encode error.
    image_encode => ImageEncodeError,
    /// Create an image insert error.
    image_insert => ImageInsertError,
    /// Create a text insert error.
    text_insert => TextInsertError,
    /// Create a document save error.
    document_save => DocumentSaveError,
    /// Create a file stat error.
    file_stat => FileStatError,
}

impl From<lopdf::Error> for PdfCompressError {
    fn from(e: lopdf::Error) -> Self {
        Self::PdfReadError(e.to_string())
    }
}

impl From<serde_json::Error> for PdfCompressError {
    fn from(e: serde_json::Error) -> Self {
        Self::ConfigError(e.to_string())
    }
}

impl From<serde_yml::Error> for PdfCompressError {
    fn from(e: serde_yml::Error) -> Self {
        Self::ConfigError(e.to_string())
    }
}

impl From<image::ImageError> for PdfCompressError {
    fn from(e: image::ImageError) -> Self {
        Self::ImageDecodeError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PdfCompressError>;
