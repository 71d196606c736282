//! Black-box interface to the DKLS threshold-ECDSA protocol family.
//!
//! The real DKLS library is an external dependency with a narrow surface:
//! the leader builds an opaque setup blob, every participant constructs a
//! session from it, and the session is driven message by message until it
//! yields a keyshare or a signature. This crate defines that seam
//! ([`SigningProtocol`] / [`ProtocolSession`]) and ships [`EchoProtocol`],
//! a deterministic in-memory stand-in used by tests and local demos.

mod echo;
mod error;
mod protocol;

pub use echo::EchoProtocol;
pub use error::Error;
pub use protocol::{
    OutgoingMessage, ProtocolSession, Recipient, SessionOutcome, SetupParams, SigningProtocol,
    StepResult,
};

/// Convenience alias for `Result<T, universal_dkls::Error>`
pub type Result<T> = std::result::Result<T, Error>;
