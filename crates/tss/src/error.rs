/// Errors raised by the TSS engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("store error: {0}")]
    Store(#[from] universal_store::Error),

    #[error("chain error: {0}")]
    Chain(#[from] universal_chain::Error),

    #[error("keyshare error: {0}")]
    Keyshare(#[from] universal_keyshare::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] universal_dkls::Error),

    #[error("data error: {0}")]
    Types(#[from] universal_types::Error),

    /// Envelope delivery through the node's outbox failed
    #[error("delivery to {validator} failed: {reason}")]
    Delivery { validator: String, reason: String },

    /// An event references a validator set with no eligible members
    #[error("no eligible validators for event {0}")]
    NoEligibleValidators(String),
}
