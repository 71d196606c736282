//! Peer-to-peer transport for the Universal Client TSS fleet.
//!
//! Identity-addressed, fire-and-forget message passing between validator
//! client nodes. Each outbound send opens (or reuses) an encrypted libp2p
//! session to the peer and writes exactly one length-prefixed frame; each
//! inbound frame is handed to the node's registered handler on a detached
//! task. Peer identities are Ed25519, derived deterministically from a
//! 32-byte seed.

mod codec;
mod error;
mod identity;
mod service;

pub use codec::{FrameCodec, MAX_FRAME_SIZE};
pub use error::Error;
pub use identity::{keypair_from_seed, parse_seed};
pub use service::{HandlerError, InboundHandler, NetworkService, P2pConfig, P2pHandle};

pub use libp2p::{Multiaddr, PeerId};

/// Convenience alias for `Result<T, universal_networking::Error>`
pub type Result<T> = std::result::Result<T, Error>;
