// Pipeline processing: classification of downloaded attachments

pub mod enrichment;

pub use enrichment::{EnrichmentReport, EnrichmentRunner};
