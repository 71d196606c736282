use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// CAIP-style transaction reference, `<chain_id>:<tx_hash>`.
///
/// The chain id may itself contain colons (`eip155:1`), so parsing splits on
/// the rightmost separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxRef {
    pub chain_id: String,
    pub tx_hash: String,
}

impl TxRef {
    pub fn new(chain_id: impl Into<String>, tx_hash: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            tx_hash: tx_hash.into(),
        }
    }
}

impl FromStr for TxRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (chain_id, tx_hash) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::MalformedTxRef(s.to_string()))?;
        if chain_id.is_empty() || tx_hash.is_empty() {
            return Err(Error::MalformedTxRef(s.to_string()));
        }
        Ok(Self {
            chain_id: chain_id.to_string(),
            tx_hash: tx_hash.to_string(),
        })
    }
}

impl Display for TxRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}:{}", self.chain_id, self.tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_rightmost_colon() {
        let r: TxRef = "eip155:1:0xabc".parse().unwrap();
        assert_eq!(r.chain_id, "eip155:1");
        assert_eq!(r.tx_hash, "0xabc");
    }

    #[test]
    fn round_trips() {
        for s in ["eip155:1:0xabc", "solana:mainnet:5x9k", "a:b"] {
            let r: TxRef = s.parse().unwrap();
            assert_eq!(r.to_string(), s);
        }
    }

    #[test]
    fn rejects_missing_parts() {
        assert!("no-separator".parse::<TxRef>().is_err());
        assert!(":hash".parse::<TxRef>().is_err());
        assert!("chain:".parse::<TxRef>().is_err());
        assert!("".parse::<TxRef>().is_err());
    }
}
