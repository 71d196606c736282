use crate::{Error, EventId};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::time::{SystemTime, UNIX_EPOCH};

/// Protocol family a TSS event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolType {
    Keygen,
    Keyrefresh,
    QuorumChange,
    Sign,
}

impl ProtocolType {
    /// Whether a successful run of this protocol produces a new keyshare
    pub fn produces_keyshare(self) -> bool {
        matches!(
            self,
            ProtocolType::Keygen | ProtocolType::Keyrefresh | ProtocolType::QuorumChange
        )
    }
}

impl Display for ProtocolType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ProtocolType::Keygen => write!(f, "KEYGEN"),
            ProtocolType::Keyrefresh => write!(f, "KEYREFRESH"),
            ProtocolType::QuorumChange => write!(f, "QUORUM_CHANGE"),
            ProtocolType::Sign => write!(f, "SIGN"),
        }
    }
}

/// Lifecycle status of a TSS event.
///
/// Transitions form a DAG; see [`EventStatus::can_transition`]. `COMPLETED`,
/// `EXPIRED` and `REVERTED` are terminal. `FAILED` is not: the maintenance
/// sweep still owes the core chain a terminal report for failed SIGN events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Pending,
    InProgress,
    Broadcasted,
    Completed,
    Failed,
    Expired,
    Reverted,
}

impl EventStatus {
    /// Statuses no transition may leave
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EventStatus::Completed | EventStatus::Expired | EventStatus::Reverted
        )
    }

    /// Whether `self -> to` is a legal status transition.
    ///
    /// `IN_PROGRESS -> PENDING` is deliberately absent: the crash reset and
    /// the session reschedule go through dedicated store operations.
    pub fn can_transition(self, to: EventStatus) -> bool {
        match self {
            EventStatus::Pending => matches!(
                to,
                EventStatus::InProgress | EventStatus::Expired | EventStatus::Reverted
            ),
            EventStatus::InProgress => matches!(
                to,
                EventStatus::Completed
                    | EventStatus::Broadcasted
                    | EventStatus::Failed
                    | EventStatus::Expired
                    | EventStatus::Reverted
            ),
            EventStatus::Broadcasted => matches!(
                to,
                EventStatus::Completed | EventStatus::Expired | EventStatus::Reverted
            ),
            EventStatus::Failed => matches!(to, EventStatus::Expired | EventStatus::Reverted),
            EventStatus::Completed | EventStatus::Expired | EventStatus::Reverted => false,
        }
    }
}

impl Display for EventStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            EventStatus::Pending => write!(f, "PENDING"),
            EventStatus::InProgress => write!(f, "IN_PROGRESS"),
            EventStatus::Broadcasted => write!(f, "BROADCASTED"),
            EventStatus::Completed => write!(f, "COMPLETED"),
            EventStatus::Failed => write!(f, "FAILED"),
            EventStatus::Expired => write!(f, "EXPIRED"),
            EventStatus::Reverted => write!(f, "REVERTED"),
        }
    }
}

/// One durable row per cross-chain TSS work item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    /// Core-chain height at which the event was created
    pub block_number: u64,
    pub protocol_type: ProtocolType,
    pub status: EventStatus,
    #[serde(default)]
    pub status_reason: String,
    /// The event is dead once the latest core-chain block reaches this height
    pub expiry_block_height: u64,
    /// The coordinator will not pick the event up before this height.
    /// Bumped when a session times out, so retries wait out a few blocks.
    #[serde(default)]
    pub next_eligible_block: u64,
    /// Payload interpreted by the protocol-type handler
    #[serde(with = "crate::envelope::b64", default)]
    pub event_data: Vec<u8>,
    /// Core-chain outbound identifier (SIGN only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub universal_tx_id: Option<String>,
    /// CAIP-formatted `chain_id:tx_hash` once broadcast (SIGN only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcasted_tx_hash: Option<String>,
    /// Unix seconds of the last status change, used by terminal GC retention
    #[serde(default)]
    pub updated_at: u64,
}

impl Event {
    pub fn new(
        event_id: impl Into<EventId>,
        block_number: u64,
        protocol_type: ProtocolType,
        expiry_block_height: u64,
        event_data: Vec<u8>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            block_number,
            protocol_type,
            status: EventStatus::Pending,
            status_reason: String::new(),
            expiry_block_height,
            next_eligible_block: 0,
            event_data,
            tx_id: None,
            universal_tx_id: None,
            broadcasted_tx_hash: None,
            updated_at: unix_now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Decode the SIGN payload carried in `event_data`
    pub fn sign_data(&self) -> Result<SignData, Error> {
        SignData::from_bytes(&self.event_data)
    }
}

/// Seconds since the unix epoch; saturates to 0 on a pre-epoch clock
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Payload of a SIGN event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignData {
    /// Keyshare to sign with
    pub key_id: String,
    /// Hex-encoded 32-byte digest to sign
    pub message_hash: String,
    /// BIP32-style derivation path, empty for the root key
    #[serde(default)]
    pub derivation_path: String,
    /// Destination chain in CAIP form, e.g. `eip155:1`
    pub chain_id: String,
}

impl SignData {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(bytes).map_err(|e| Error::EventData(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_admit_no_transitions() {
        let all = [
            EventStatus::Pending,
            EventStatus::InProgress,
            EventStatus::Broadcasted,
            EventStatus::Completed,
            EventStatus::Failed,
            EventStatus::Expired,
            EventStatus::Reverted,
        ];
        for from in all {
            for to in all {
                if from.is_terminal() {
                    assert!(!from.can_transition(to), "{from} -> {to} must be illegal");
                }
            }
        }
    }

    #[test]
    fn happy_paths_are_legal() {
        assert!(EventStatus::Pending.can_transition(EventStatus::InProgress));
        assert!(EventStatus::InProgress.can_transition(EventStatus::Completed));
        assert!(EventStatus::InProgress.can_transition(EventStatus::Broadcasted));
        assert!(EventStatus::Broadcasted.can_transition(EventStatus::Completed));
        assert!(EventStatus::Broadcasted.can_transition(EventStatus::Reverted));
        assert!(EventStatus::Failed.can_transition(EventStatus::Reverted));
    }

    #[test]
    fn regressions_are_illegal() {
        assert!(!EventStatus::InProgress.can_transition(EventStatus::Pending));
        assert!(!EventStatus::Broadcasted.can_transition(EventStatus::InProgress));
        assert!(!EventStatus::Completed.can_transition(EventStatus::Pending));
    }

    #[test]
    fn event_row_round_trips_through_json() {
        let data = SignData {
            key_id: "key-1".into(),
            message_hash: "ab".repeat(32),
            derivation_path: String::new(),
            chain_id: "eip155:1".into(),
        };
        let mut event = Event::new("evt-1", 100, ProtocolType::Sign, 200, data.to_bytes());
        event.tx_id = Some("7".into());

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"SIGN\""));
        assert!(json.contains("\"PENDING\""));

        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_id, "evt-1");
        assert_eq!(back.sign_data().unwrap(), data);
    }
}
