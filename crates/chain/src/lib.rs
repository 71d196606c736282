//! Read and write interfaces to the core chain and to external chains.
//!
//! The core chain itself is an external collaborator: this crate only
//! defines the seams the client consumes — [`DataProvider`] for read-side
//! snapshots, [`Voter`] for authenticated vote submission through a
//! delegated ("authz") hot key, and [`ChainDriver`] for per-chain outbound
//! broadcast — plus the demo-time registry-file provider and in-memory
//! test doubles.

mod driver;
mod error;
mod provider;
mod registry;
mod retry;
mod voter;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use driver::{ChainDriver, Chains};
pub use error::Error;
pub use provider::DataProvider;
pub use registry::{RegistryEntry, RegistryFile, RegistryProvider};
pub use retry::{RetryPolicy, with_retry};
pub use voter::{
    AuthzExec, AuthzVoter, InboundObservation, PushSigner, SignedTx, TxBroadcaster, TxResponse,
    VoteMsg, Voter, VoterConfig,
};

/// Convenience alias for `Result<T, universal_chain::Error>`
pub type Result<T> = std::result::Result<T, Error>;
