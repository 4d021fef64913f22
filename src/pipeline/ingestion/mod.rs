// Pipeline ingestion: paginated fetching, attachment download, landing store and resume checkpoints

pub mod attachments;
pub mod checkpoints;
pub mod fetcher;
pub mod landing;

pub use attachments::AttachmentStore;
pub use checkpoints::FetchCheckpoints;
pub use fetcher::{ChannelFetcher, ChannelOutcome, ChannelReport, FetchSummary, FetcherSettings};
pub use landing::LandingWriter;
