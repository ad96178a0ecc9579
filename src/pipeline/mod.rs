pub mod document_pipeline;
pub mod orchestrator;
pub mod page_rebuilder;
pub mod progress;
pub mod result;

pub use document_pipeline::{DocumentPipeline, compress_pdf};
pub use page_rebuilder::{PageRebuilder, PageReport};
pub use progress::ProgressSink;
pub use result::{CompressionResult, SizeReport};
