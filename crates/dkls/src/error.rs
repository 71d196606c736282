/// Errors raised while driving a threshold-signing session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Setup blob that does not decode or misses required fields
    #[error("malformed setup: {0}")]
    MalformedSetup(String),

    /// Message from an address outside the session's participant set
    #[error("unknown participant: {0}")]
    UnknownParticipant(String),

    /// Step payload the protocol cannot ingest
    #[error("malformed step message: {0}")]
    MalformedStep(String),

    /// The underlying protocol aborted
    #[error("protocol failure: {0}")]
    Protocol(String),
}
