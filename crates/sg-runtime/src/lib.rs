//! Batch processing runtime: pulls pending submissions through the decode,
//! admission and alert stages, recomputes logger aggregates and reports.

pub mod coordinator;
pub mod error;
pub mod tracing_init;

pub use coordinator::{BatchCoordinator, BatchOptions, BatchReport};
pub use error::{RuntimeError, RuntimeReason, RuntimeResult};
pub use tracing_init::init_tracing;
