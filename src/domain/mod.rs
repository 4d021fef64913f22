//! Record types shared by the fetcher, landing writer and loaders.

pub mod classification;
pub mod message;

pub use classification::{ClassificationRecord, Detection, ImageCategory};
pub use message::SourceMessage;
