pub mod jpeg;
pub mod recompressor;

pub use recompressor::{ImageRecompressor, Recompress, Recompressed};
