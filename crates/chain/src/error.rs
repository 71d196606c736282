/// Errors raised by core-chain and external-chain interactions
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Locally detectable bad input; reported to the caller, never retried
    #[error("validation failed: {0}")]
    Validation(String),

    /// Transient transport failure; candidates for bounded retry
    #[error("network error: {0}")]
    Network(String),

    /// The per-attempt deadline elapsed
    #[error("request timed out")]
    Timeout,

    /// The chain accepted the connection but rejected the transaction
    #[error("transaction rejected with code {code}: {raw_log}")]
    Rejected { code: u32, raw_log: String },

    /// No driver registered for the requested chain
    #[error("unknown chain: {0}")]
    UnknownChain(String),

    /// Signing through the delegated hot key failed
    #[error("signing failed: {0}")]
    Signing(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether a bounded exponential-backoff retry is appropriate
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Timeout)
    }
}
