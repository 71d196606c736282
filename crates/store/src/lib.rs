//! Durable storage for TSS events.
//!
//! [`JsonTable`] is a small JSON-file-backed map with atomic flushes;
//! [`EventStore`] builds the event table on top of it and owns every status
//! transition, so illegal moves along the lifecycle DAG are rejected in one
//! place.

mod db;
mod error;
mod events;

pub use db::JsonTable;
pub use error::Error;
pub use events::{DEFAULT_FINALITY_LAG, EventStore};

/// Convenience alias for `Result<T, universal_store::Error>`
pub type Result<T> = std::result::Result<T, Error>;
