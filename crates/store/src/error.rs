use universal_types::{EventId, EventStatus};

/// Errors raised by the event store
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The table mutex was poisoned by a panicking writer
    #[error("store lock poisoned")]
    Poisoned,

    /// Insert of an event id that already has a row
    #[error("event already exists: {0}")]
    EventExists(EventId),

    /// No row under the given key
    #[error("not found: {0}")]
    NotFound(String),

    /// A status move that is not an edge of the lifecycle DAG
    #[error("illegal status transition for {event_id}: {from} -> {to}")]
    InvalidTransition {
        event_id: EventId,
        from: EventStatus,
        to: EventStatus,
    },
}
