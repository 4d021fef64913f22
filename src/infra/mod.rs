// Adapters behind the application ports

pub mod command;
pub mod http_client;

pub use command::{CommandDetector, ExternalCommand};
pub use http_client::HttpMessageSource;
