use crate::{
    Error, OutgoingMessage, ProtocolSession, Recipient, Result, SessionOutcome, SetupParams,
    SigningProtocol, StepResult,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use universal_types::{ProtocolType, ValidatorAddress};

/// Deterministic stand-in for the DKLS library.
///
/// Every participant broadcasts one hash contribution; once the whole set
/// has contributed, the sorted transcript is hashed into the result. The
/// group public key and signatures come out identical on every node, while
/// keyshares stay per-node, so the full coordinator/session pipeline can be
/// exercised without the proprietary library.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoProtocol;

#[derive(Debug, Serialize, Deserialize)]
struct EchoSetup {
    event_id: String,
    protocol: ProtocolType,
    threshold: usize,
    key_id: String,
    #[serde(default)]
    message_hash: String,
    #[serde(default)]
    derivation_path: String,
}

impl SigningProtocol for EchoProtocol {
    fn build_setup(&self, params: &SetupParams<'_>) -> Result<Vec<u8>> {
        if params.protocol == ProtocolType::Sign && params.message_hash.is_none() {
            return Err(Error::MalformedSetup("sign setup without digest".into()));
        }
        let setup = EchoSetup {
            event_id: params.event_id.to_string(),
            protocol: params.protocol,
            threshold: params.threshold,
            key_id: params.key_id.to_string(),
            message_hash: params.message_hash.map(hex::encode).unwrap_or_default(),
            derivation_path: params.derivation_path.to_string(),
        };
        serde_json::to_vec(&setup).map_err(|e| Error::MalformedSetup(e.to_string()))
    }

    fn new_session(
        &self,
        local_party: &str,
        setup: &[u8],
        participants: &[ValidatorAddress],
    ) -> Result<Box<dyn ProtocolSession>> {
        let setup: EchoSetup =
            serde_json::from_slice(setup).map_err(|e| Error::MalformedSetup(e.to_string()))?;
        if participants.is_empty() {
            return Err(Error::MalformedSetup("empty participant set".into()));
        }
        if !participants.iter().any(|p| p == local_party) {
            return Err(Error::UnknownParticipant(local_party.to_string()));
        }

        let mut participants = participants.to_vec();
        participants.sort();

        Ok(Box::new(EchoSession {
            local_party: local_party.to_string(),
            participants,
            setup,
            contributions: BTreeMap::new(),
            begun: false,
            finished: false,
        }))
    }
}

struct EchoSession {
    local_party: String,
    participants: Vec<ValidatorAddress>,
    setup: EchoSetup,
    /// One 32-byte contribution per participant, keyed by address
    contributions: BTreeMap<String, [u8; 32]>,
    begun: bool,
    finished: bool,
}

impl EchoSession {
    fn contribution_for(&self, party: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.setup.event_id.as_bytes());
        hasher.update(self.setup.key_id.as_bytes());
        hasher.update(self.setup.message_hash.as_bytes());
        hasher.update(party.as_bytes());
        hasher.finalize().into()
    }

    fn transcript(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for (party, contribution) in &self.contributions {
            hasher.update(party.as_bytes());
            hasher.update(contribution);
        }
        hasher.finalize().into()
    }

    fn maybe_finish(&mut self) -> Option<SessionOutcome> {
        if self.finished
            || !self.begun
            || self.contributions.len() < self.participants.len()
        {
            return None;
        }
        self.finished = true;

        let transcript = self.transcript();
        let outcome = if self.setup.protocol == ProtocolType::Sign {
            let mut hasher = Sha256::new();
            hasher.update(transcript);
            hasher.update(self.setup.message_hash.as_bytes());
            hasher.update(self.setup.derivation_path.as_bytes());
            let signature: [u8; 32] = hasher.finalize().into();
            SessionOutcome::Signature {
                signature: signature.to_vec(),
            }
        } else {
            let key_id = if self.setup.key_id.is_empty() {
                format!("tss-{}", hex::encode(&transcript[..8]))
            } else {
                self.setup.key_id.clone()
            };
            let mut hasher = Sha256::new();
            hasher.update(transcript);
            hasher.update(self.local_party.as_bytes());
            let share: [u8; 32] = hasher.finalize().into();
            SessionOutcome::Keyshare {
                key_id,
                public_key: transcript.to_vec(),
                share: share.to_vec(),
            }
        };
        Some(outcome)
    }
}

impl ProtocolSession for EchoSession {
    fn begin(&mut self) -> Result<StepResult> {
        if self.begun {
            return Ok(StepResult::default());
        }
        self.begun = true;

        let party = self.local_party.clone();
        let own = self.contribution_for(&party);
        self.contributions.insert(party, own);

        let outgoing = vec![OutgoingMessage {
            recipient: Recipient::Broadcast,
            payload: own.to_vec(),
        }];
        Ok(StepResult {
            outgoing,
            outcome: self.maybe_finish(),
        })
    }

    fn step(&mut self, from: &str, payload: &[u8]) -> Result<StepResult> {
        if !self.participants.iter().any(|p| p == from) {
            return Err(Error::UnknownParticipant(from.to_string()));
        }
        let contribution: [u8; 32] = payload
            .try_into()
            .map_err(|_| Error::MalformedStep(format!("{} byte payload", payload.len())))?;
        if contribution != self.contribution_for(from) {
            return Err(Error::Protocol(format!("bad contribution from {from}")));
        }

        // Duplicate deliveries are idempotent.
        self.contributions.insert(from.to_string(), contribution);

        Ok(StepResult {
            outgoing: Vec::new(),
            outcome: self.maybe_finish(),
        })
    }
}
