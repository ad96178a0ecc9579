pub mod config;
pub mod error;
pub mod imaging;
pub mod pdf;
pub mod pipeline;
