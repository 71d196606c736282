use crate::{Error, Result, RetryPolicy, with_retry};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Fixed gas limit for every vote transaction
pub const DEFAULT_GAS_LIMIT: u64 = 400_000;
/// Fixed fee paid per vote transaction
pub const DEFAULT_FEE_AMOUNT: u64 = 2_000;
pub const DEFAULT_FEE_DENOM: &str = "upc";

/// An inbound event observed on an external chain, reported to the core
/// chain verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundObservation {
    /// Source chain in CAIP form
    pub chain_id: String,
    pub tx_hash: String,
    pub block_height: u64,
    #[serde(default)]
    pub payload: Vec<u8>,
}

/// The vote message families the client submits. The wire shape is fixed;
/// the chain rejects any other argument arrangement, so there is exactly
/// one encoding here and no coercion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoteMsg {
    VoteOutbound {
        tx_id: String,
        success: bool,
        tx_hash: String,
        block_height: u64,
        reason: String,
    },
    VoteTssKeyProcess {
        /// Hex-encoded group public key
        tss_pub_key: String,
        key_id: String,
        process_id: String,
    },
    VoteInbound {
        observation: InboundObservation,
    },
    VoteGasPrice {
        chain_id: String,
        /// Decimal string; gas prices overflow u64 on some chains
        price: String,
    },
}

/// Response the core chain returns for a broadcast transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxResponse {
    pub code: u32,
    pub tx_hash: String,
    #[serde(default)]
    pub raw_log: String,
}

/// Signs vote transactions with the delegated hot key.
///
/// The validator-operator grants this key authority to submit vote message
/// types on its behalf; the key itself never holds staking power.
pub trait PushSigner: Send + Sync {
    /// Address of the hot key (the authz grantee)
    fn address(&self) -> String;

    /// Address of the validator-operator that granted authority
    fn granter(&self) -> String;

    fn sign(&self, bytes: &[u8]) -> Result<Vec<u8>>;
}

/// Submits raw signed transactions to the core chain
#[async_trait]
pub trait TxBroadcaster: Send + Sync {
    async fn broadcast(&self, tx_bytes: Vec<u8>) -> Result<TxResponse>;
}

/// Authenticated vote submission to the core chain
#[async_trait]
pub trait Voter: Send + Sync {
    /// Report the outcome of an outbound transaction. `success = false` is
    /// the revert vote.
    async fn vote_outbound(
        &self,
        tx_id: &str,
        success: bool,
        tx_hash: Option<&str>,
        block_height: u64,
        reason: &str,
    ) -> Result<String>;

    /// Report a completed keygen/keyrefresh run
    async fn vote_tss_key_process(
        &self,
        tss_pub_key: &[u8],
        key_id: &str,
        process_id: &str,
    ) -> Result<String>;

    async fn vote_inbound(&self, observation: InboundObservation) -> Result<String>;

    async fn vote_gas_price(&self, chain_id: &str, price: u128) -> Result<String>;
}

/// Delegated-authority execution envelope around a batch of vote messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthzExec {
    pub grantee: String,
    pub granter: String,
    pub msgs: Vec<VoteMsg>,
}

/// The signed transaction as broadcast to the core chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTx {
    pub body: AuthzExec,
    pub gas_limit: u64,
    pub fee_amount: u64,
    pub fee_denom: String,
    pub signer: String,
    /// Base64-encoded hot-key signature over the serialized body
    pub signature: String,
}

#[derive(Debug, Clone)]
pub struct VoterConfig {
    pub gas_limit: u64,
    pub fee_amount: u64,
    pub fee_denom: String,
    /// Per-attempt broadcast deadline
    pub vote_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for VoterConfig {
    fn default() -> Self {
        Self {
            gas_limit: DEFAULT_GAS_LIMIT,
            fee_amount: DEFAULT_FEE_AMOUNT,
            fee_denom: DEFAULT_FEE_DENOM.to_string(),
            vote_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// [`Voter`] that wraps each vote in an authz execute envelope signed by
/// the hot key. Success is a response code of zero within the per-attempt
/// deadline; network failures retry with bounded exponential backoff.
pub struct AuthzVoter {
    signer: Arc<dyn PushSigner>,
    broadcaster: Arc<dyn TxBroadcaster>,
    config: VoterConfig,
}

impl AuthzVoter {
    pub fn new(signer: Arc<dyn PushSigner>, broadcaster: Arc<dyn TxBroadcaster>) -> Self {
        Self::with_config(signer, broadcaster, VoterConfig::default())
    }

    pub fn with_config(
        signer: Arc<dyn PushSigner>,
        broadcaster: Arc<dyn TxBroadcaster>,
        config: VoterConfig,
    ) -> Self {
        Self {
            signer,
            broadcaster,
            config,
        }
    }

    async fn submit(&self, op: &str, msg: VoteMsg) -> Result<String> {
        let exec = AuthzExec {
            grantee: self.signer.address(),
            granter: self.signer.granter(),
            msgs: vec![msg],
        };
        let body_bytes = serde_json::to_vec(&exec)?;
        let signature = self.signer.sign(&body_bytes)?;
        let tx = SignedTx {
            body: exec,
            gas_limit: self.config.gas_limit,
            fee_amount: self.config.fee_amount,
            fee_denom: self.config.fee_denom.clone(),
            signer: self.signer.address(),
            signature: STANDARD.encode(signature),
        };
        let tx_bytes = serde_json::to_vec(&tx)?;

        let broadcaster = Arc::clone(&self.broadcaster);
        let vote_timeout = self.config.vote_timeout;
        let vote_tx_hash = with_retry(&self.config.retry, op, move || {
            let broadcaster = Arc::clone(&broadcaster);
            let tx_bytes = tx_bytes.clone();
            async move {
                let response =
                    tokio::time::timeout(vote_timeout, broadcaster.broadcast(tx_bytes))
                        .await
                        .map_err(|_| Error::Timeout)??;
                if response.code != 0 {
                    return Err(Error::Rejected {
                        code: response.code,
                        raw_log: response.raw_log,
                    });
                }
                Ok(response.tx_hash)
            }
        })
        .await?;

        info!(%op, %vote_tx_hash, "vote accepted");
        Ok(vote_tx_hash)
    }
}

#[async_trait]
impl Voter for AuthzVoter {
    async fn vote_outbound(
        &self,
        tx_id: &str,
        success: bool,
        tx_hash: Option<&str>,
        block_height: u64,
        reason: &str,
    ) -> Result<String> {
        if tx_id.is_empty() {
            return Err(Error::Validation("outbound vote requires a tx id".into()));
        }
        let tx_hash = tx_hash.unwrap_or_default();
        if success {
            if tx_hash.is_empty() {
                return Err(Error::Validation(
                    "success vote requires the broadcast tx hash".into(),
                ));
            }
            if block_height == 0 {
                return Err(Error::Validation(
                    "success vote requires the inclusion height".into(),
                ));
            }
        } else {
            if reason.is_empty() {
                return Err(Error::Validation("revert vote requires a reason".into()));
            }
            if !tx_hash.is_empty() && block_height == 0 {
                return Err(Error::Validation(
                    "revert vote with a tx hash requires a block height".into(),
                ));
            }
        }

        debug!(%tx_id, success, %tx_hash, block_height, "submitting outbound vote");
        self.submit(
            "vote_outbound",
            VoteMsg::VoteOutbound {
                tx_id: tx_id.to_string(),
                success,
                tx_hash: tx_hash.to_string(),
                block_height,
                reason: reason.to_string(),
            },
        )
        .await
    }

    async fn vote_tss_key_process(
        &self,
        tss_pub_key: &[u8],
        key_id: &str,
        process_id: &str,
    ) -> Result<String> {
        if tss_pub_key.is_empty() || key_id.is_empty() || process_id.is_empty() {
            return Err(Error::Validation(
                "key process vote requires key, key id and process id".into(),
            ));
        }
        self.submit(
            "vote_tss_key_process",
            VoteMsg::VoteTssKeyProcess {
                tss_pub_key: hex::encode(tss_pub_key),
                key_id: key_id.to_string(),
                process_id: process_id.to_string(),
            },
        )
        .await
    }

    async fn vote_inbound(&self, observation: InboundObservation) -> Result<String> {
        if observation.tx_hash.is_empty() || observation.chain_id.is_empty() {
            return Err(Error::Validation(
                "inbound vote requires chain id and tx hash".into(),
            ));
        }
        self.submit("vote_inbound", VoteMsg::VoteInbound { observation })
            .await
    }

    async fn vote_gas_price(&self, chain_id: &str, price: u128) -> Result<String> {
        if chain_id.is_empty() {
            return Err(Error::Validation("gas price vote requires a chain id".into()));
        }
        self.submit(
            "vote_gas_price",
            VoteMsg::VoteGasPrice {
                chain_id: chain_id.to_string(),
                price: price.to_string(),
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockChain, StaticSigner};

    fn voter(chain: &Arc<MockChain>) -> AuthzVoter {
        AuthzVoter::new(
            Arc::new(StaticSigner::new("uvhot1", "uv1operator")),
            Arc::clone(chain) as Arc<dyn TxBroadcaster>,
        )
    }

    #[tokio::test]
    async fn success_vote_round_trips_through_the_envelope() {
        let chain = Arc::new(MockChain::new());
        let voter = voter(&chain);

        let hash = voter
            .vote_outbound("tx-7", true, Some("0xabc"), 120, "")
            .await
            .unwrap();
        assert!(!hash.is_empty());

        let votes = chain.votes();
        assert_eq!(votes.len(), 1);
        assert_eq!(
            votes[0],
            VoteMsg::VoteOutbound {
                tx_id: "tx-7".into(),
                success: true,
                tx_hash: "0xabc".into(),
                block_height: 120,
                reason: String::new(),
            }
        );
    }

    #[tokio::test]
    async fn success_vote_validation() {
        let chain = Arc::new(MockChain::new());
        let voter = voter(&chain);

        assert!(matches!(
            voter.vote_outbound("tx", true, None, 120, "").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            voter.vote_outbound("tx", true, Some("0xabc"), 0, "").await,
            Err(Error::Validation(_))
        ));
        assert!(chain.votes().is_empty());
    }

    #[tokio::test]
    async fn revert_vote_validation() {
        let chain = Arc::new(MockChain::new());
        let voter = voter(&chain);

        // Reason is mandatory for reverts.
        assert!(matches!(
            voter.vote_outbound("tx", false, None, 0, "").await,
            Err(Error::Validation(_))
        ));
        // A supplied hash needs a height.
        assert!(matches!(
            voter
                .vote_outbound("tx", false, Some("0xabc"), 0, "expired")
                .await,
            Err(Error::Validation(_))
        ));
        // A hash-less revert is fine.
        voter
            .vote_outbound("tx", false, None, 0, "expired before signing completed")
            .await
            .unwrap();
        assert_eq!(chain.votes().len(), 1);
    }

    #[tokio::test]
    async fn rejection_codes_surface_without_retry() {
        let chain = Arc::new(MockChain::new());
        chain.reject_with(13, "insufficient fee");
        let voter = voter(&chain);

        let err = voter
            .vote_outbound("tx", false, None, 0, "expired")
            .await
            .unwrap_err();
        match err {
            Error::Rejected { code, raw_log } => {
                assert_eq!(code, 13);
                assert_eq!(raw_log, "insufficient fee");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(chain.broadcast_count(), 1, "rejections are not retried");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_network_failures_are_retried() {
        let chain = Arc::new(MockChain::new());
        chain.fail_next_broadcasts(2);
        let voter = voter(&chain);

        voter
            .vote_tss_key_process(&[1, 2, 3], "tss-1", "proc-1")
            .await
            .unwrap();
        assert_eq!(chain.broadcast_count(), 3);
        assert_eq!(chain.votes().len(), 1);
    }

    #[tokio::test]
    async fn signature_covers_the_exec_body() {
        let chain = Arc::new(MockChain::new());
        let voter = voter(&chain);
        voter.vote_gas_price("eip155:1", 31_000_000_000).await.unwrap();

        let tx = chain.last_tx().unwrap();
        assert_eq!(tx.signer, "uvhot1");
        assert_eq!(tx.body.grantee, "uvhot1");
        assert_eq!(tx.body.granter, "uv1operator");
        assert_eq!(tx.gas_limit, DEFAULT_GAS_LIMIT);
        assert!(!tx.signature.is_empty());
    }
}
