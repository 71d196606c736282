use libp2p::{Multiaddr, PeerId};

/// Errors raised by the peer-to-peer transport
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The seed is not 32 hex-encoded bytes
    #[error("invalid identity seed: {0}")]
    InvalidSeed(String),

    /// A transport instance accepts exactly one inbound handler
    #[error("an inbound handler is already registered")]
    HandlerAlreadyRegistered,

    /// A multiaddr embeds a `/p2p/` identity that differs from the peer it
    /// was registered for
    #[error("address {addr} does not belong to peer {expected}")]
    PeerIdMismatch { expected: PeerId, addr: Multiaddr },

    /// Send to a peer that was never registered with `ensure_peer`
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),

    /// The peer could not be dialed
    #[error("dial failure for {peer}: {reason}")]
    Dial { peer: PeerId, reason: String },

    /// Dial or frame write exceeded its deadline
    #[error("timed out sending to {peer}")]
    Timeout { peer: PeerId },

    /// The frame could not be written to an established stream
    #[error("send to {peer} failed: {reason}")]
    Send { peer: PeerId, reason: String },

    /// The service task has shut down
    #[error("transport service stopped")]
    ServiceStopped,

    /// No listener came up within the bind probe window
    #[error("no listen address established")]
    NoListenAddr,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),
}
