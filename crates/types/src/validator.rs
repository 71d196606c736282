use crate::ValidatorAddress;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Membership status of a universal validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidatorStatus {
    Unspecified,
    Active,
    PendingJoin,
    PendingLeave,
    Inactive,
}

impl Display for ValidatorStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ValidatorStatus::Unspecified => write!(f, "UNSPECIFIED"),
            ValidatorStatus::Active => write!(f, "ACTIVE"),
            ValidatorStatus::PendingJoin => write!(f, "PENDING_JOIN"),
            ValidatorStatus::PendingLeave => write!(f, "PENDING_LEAVE"),
            ValidatorStatus::Inactive => write!(f, "INACTIVE"),
        }
    }
}

/// How to reach a validator's client node over the wire
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    /// libp2p peer id, base58
    pub peer_id: String,
    /// Multiaddrs the node listens on
    #[serde(default)]
    pub multiaddrs: Vec<String>,
}

/// Snapshot of one validator as reported by the core chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniversalValidator {
    pub validator_address: ValidatorAddress,
    pub status: ValidatorStatus,
    #[serde(default)]
    pub network: NetworkInfo,
    #[serde(default)]
    pub joined_at_block: u64,
}

impl UniversalValidator {
    /// Eligible for KEYGEN / KEYREFRESH / QUORUM_CHANGE sessions
    pub fn eligible_for_keygen(&self) -> bool {
        matches!(
            self.status,
            ValidatorStatus::Active | ValidatorStatus::PendingJoin
        )
    }

    /// Eligible for SIGN sessions (still holds a share of the current key)
    pub fn eligible_for_sign(&self) -> bool {
        matches!(
            self.status,
            ValidatorStatus::Active | ValidatorStatus::PendingLeave
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(status: ValidatorStatus) -> UniversalValidator {
        UniversalValidator {
            validator_address: "uv1alice".into(),
            status,
            network: NetworkInfo::default(),
            joined_at_block: 1,
        }
    }

    #[test]
    fn keygen_eligibility_follows_status() {
        assert!(validator(ValidatorStatus::Active).eligible_for_keygen());
        assert!(validator(ValidatorStatus::PendingJoin).eligible_for_keygen());
        assert!(!validator(ValidatorStatus::PendingLeave).eligible_for_keygen());
        assert!(!validator(ValidatorStatus::Inactive).eligible_for_keygen());
    }

    #[test]
    fn sign_eligibility_follows_status() {
        assert!(validator(ValidatorStatus::Active).eligible_for_sign());
        assert!(validator(ValidatorStatus::PendingLeave).eligible_for_sign());
        assert!(!validator(ValidatorStatus::PendingJoin).eligible_for_sign());
        assert!(!validator(ValidatorStatus::Unspecified).eligible_for_sign());
    }
}
