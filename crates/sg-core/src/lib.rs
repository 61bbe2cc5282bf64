//! Core ingestion and derived-value pipeline for a fleet of remote sensor
//! loggers: wire decoding, per-channel save-policy admission, debounced
//! threshold alerts, formula evaluation and logger aggregates.
//!
//! The persistence engine and the mail transport live behind the
//! [`store::SampleStore`] and [`alert::AlertNotifier`] traits; everything in
//! this crate is synchronous and side-effect free apart from those seams.

pub mod admission;
pub mod aggregate;
pub mod alert;
pub mod decode;
pub mod error;
pub mod export;
pub mod formula;
pub mod model;
pub mod store;

pub use error::{CoreError, CoreReason, CoreResult};
