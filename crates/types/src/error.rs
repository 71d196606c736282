/// Errors raised while parsing shared data types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A CAIP transaction reference without a `:` separator
    #[error("malformed transaction reference: {0}")]
    MalformedTxRef(String),

    /// A wire envelope that is not valid JSON or carries an unknown tag
    #[error("invalid envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    /// Event data bytes that do not decode to the expected payload shape
    #[error("invalid event data: {0}")]
    EventData(String),
}
