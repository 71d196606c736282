use crate::{Error, EventId, ValidatorAddress};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Tag of a peer-to-peer coordination message.
///
/// The tag set is closed; envelopes with any other tag fail to decode and
/// are discarded by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Setup,
    Ack,
    Begin,
    Step,
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MessageKind::Setup => write!(f, "setup"),
            MessageKind::Ack => write!(f, "ack"),
            MessageKind::Begin => write!(f, "begin"),
            MessageKind::Step => write!(f, "step"),
        }
    }
}

/// Wire envelope exchanged between client nodes.
///
/// Serialized as JSON and framed by the transport with a `u32` big-endian
/// length prefix. Payload bytes travel base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(rename = "eventId")]
    pub event_id: EventId,
    #[serde(with = "b64", default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<ValidatorAddress>,
}

impl Envelope {
    pub fn setup(
        event_id: impl Into<EventId>,
        payload: Vec<u8>,
        participants: Vec<ValidatorAddress>,
    ) -> Self {
        Self {
            kind: MessageKind::Setup,
            event_id: event_id.into(),
            payload,
            participants,
        }
    }

    pub fn ack(event_id: impl Into<EventId>) -> Self {
        Self {
            kind: MessageKind::Ack,
            event_id: event_id.into(),
            payload: Vec::new(),
            participants: Vec::new(),
        }
    }

    pub fn begin(event_id: impl Into<EventId>) -> Self {
        Self {
            kind: MessageKind::Begin,
            event_id: event_id.into(),
            payload: Vec::new(),
            participants: Vec::new(),
        }
    }

    pub fn step(event_id: impl Into<EventId>, payload: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::Step,
            event_id: event_id.into(),
            payload,
            participants: Vec::new(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl Display for Envelope {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "{} event={} payload_size={}",
            self.kind,
            self.event_id,
            self.payload.len()
        )
    }
}

/// Base64 (de)serialization for byte payloads inside JSON
pub(crate) mod b64 {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
