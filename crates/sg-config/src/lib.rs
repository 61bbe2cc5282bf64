pub mod ingest;
pub mod logging;
pub mod types;

pub use ingest::{IngestConfig, IngestDefaults};
pub use logging::{LogFormat, LoggingConfig};
pub use types::HumanDuration;
