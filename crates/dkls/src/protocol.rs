use crate::Result;
use universal_types::{ProtocolType, ValidatorAddress};

/// Inputs the leader feeds into [`SigningProtocol::build_setup`]
#[derive(Debug, Clone)]
pub struct SetupParams<'a> {
    pub event_id: &'a str,
    pub protocol: ProtocolType,
    /// Canonically ordered participant set for this session
    pub participants: &'a [ValidatorAddress],
    /// Minimum number of parties that must contribute
    pub threshold: usize,
    /// Keyshare to refresh or sign with; empty for a fresh keygen
    pub key_id: &'a str,
    /// 32-byte digest to sign (SIGN only)
    pub message_hash: Option<&'a [u8]>,
    /// BIP32-style derivation path (SIGN only, may be empty)
    pub derivation_path: &'a str,
}

/// Where a protocol message should go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// Every other participant in the session
    Broadcast,
    /// One specific participant
    Peer(ValidatorAddress),
}

/// A message the session wants delivered to other participants
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub recipient: Recipient,
    pub payload: Vec<u8>,
}

/// Terminal result of a completed session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// KEYGEN / KEYREFRESH / QUORUM_CHANGE: a fresh share of a group key
    Keyshare {
        key_id: String,
        /// Group public key, identical on every participant
        public_key: Vec<u8>,
        /// This participant's private share, unique per node
        share: Vec<u8>,
    },
    /// SIGN: the finished signature, identical on every participant
    Signature { signature: Vec<u8> },
}

/// What a single protocol step produced
#[derive(Debug, Clone, Default)]
pub struct StepResult {
    pub outgoing: Vec<OutgoingMessage>,
    /// Present once the session has reached its terminal result
    pub outcome: Option<SessionOutcome>,
}

/// Factory seam around the DKLS library
pub trait SigningProtocol: Send + Sync {
    /// Leader-side: build the opaque setup blob that travels in the setup
    /// envelope to every participant.
    fn build_setup(&self, params: &SetupParams<'_>) -> Result<Vec<u8>>;

    /// Participant-side: construct a session from a received setup blob.
    ///
    /// `local_party` must be one of `participants`.
    fn new_session(
        &self,
        local_party: &str,
        setup: &[u8],
        participants: &[ValidatorAddress],
    ) -> Result<Box<dyn ProtocolSession>>;
}

/// One live protocol run, driven message by message.
///
/// Sessions are owned by a single task; the trait is deliberately `&mut`
/// and non-`Sync`.
pub trait ProtocolSession: Send {
    /// Kick off the session once the leader's begin arrives. May already
    /// complete for degenerate single-party sessions.
    fn begin(&mut self) -> Result<StepResult>;

    /// Ingest one step message from `from`.
    fn step(&mut self, from: &str, payload: &[u8]) -> Result<StepResult>;
}
