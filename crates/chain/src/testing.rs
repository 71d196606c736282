//! In-memory chain doubles for tests and local demos.

use crate::{
    ChainDriver, DataProvider, Error, PushSigner, Result, SignedTx, TxBroadcaster, TxResponse,
    VoteMsg,
};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use universal_types::{Event, NetworkInfo, UniversalValidator, ValidatorStatus};

/// In-memory core chain: a block height, a validator set and a vote sink.
///
/// Implements both [`DataProvider`] and [`TxBroadcaster`], so one instance
/// can back a whole simulated fleet.
#[derive(Default)]
pub struct MockChain {
    latest_block: AtomicU64,
    validators: RwLock<Vec<UniversalValidator>>,
    current_key: RwLock<Option<String>>,
    votes: Mutex<Vec<VoteMsg>>,
    txs: Mutex<Vec<SignedTx>>,
    broadcast_count: AtomicU32,
    fail_next: AtomicU32,
    reject: Mutex<Option<(u32, String)>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_latest_block(&self, height: u64) {
        self.latest_block.store(height, Ordering::SeqCst);
    }

    pub fn advance_blocks(&self, n: u64) {
        self.latest_block.fetch_add(n, Ordering::SeqCst);
    }

    pub fn set_validators(&self, validators: Vec<UniversalValidator>) {
        *self.validators.write() = validators;
    }

    pub fn set_current_key(&self, key_id: Option<String>) {
        *self.current_key.write() = key_id;
    }

    /// All vote messages accepted so far, in submission order
    pub fn votes(&self) -> Vec<VoteMsg> {
        self.votes.lock().clone()
    }

    pub fn last_tx(&self) -> Option<SignedTx> {
        self.txs.lock().last().cloned()
    }

    pub fn broadcast_count(&self) -> u32 {
        self.broadcast_count.load(Ordering::SeqCst)
    }

    /// Make the next `n` broadcasts fail with a network error
    pub fn fail_next_broadcasts(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Reject every subsequent broadcast with the given response code
    pub fn reject_with(&self, code: u32, raw_log: &str) {
        *self.reject.lock() = Some((code, raw_log.to_string()));
    }

    /// Accept broadcasts again after [`MockChain::reject_with`]
    pub fn clear_rejection(&self) {
        *self.reject.lock() = None;
    }
}

#[async_trait]
impl DataProvider for MockChain {
    async fn latest_block_num(&self) -> Result<u64> {
        Ok(self.latest_block.load(Ordering::SeqCst))
    }

    async fn validator_set(&self) -> Result<Vec<UniversalValidator>> {
        Ok(self.validators.read().clone())
    }

    async fn current_key_id(&self) -> Result<Option<String>> {
        Ok(self.current_key.read().clone())
    }
}

#[async_trait]
impl TxBroadcaster for MockChain {
    async fn broadcast(&self, tx_bytes: Vec<u8>) -> Result<TxResponse> {
        let count = self.broadcast_count.fetch_add(1, Ordering::SeqCst) + 1;

        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Network("injected broadcast failure".into()));
        }
        if let Some((code, raw_log)) = self.reject.lock().clone() {
            return Ok(TxResponse {
                code,
                tx_hash: String::new(),
                raw_log,
            });
        }

        let tx: SignedTx = serde_json::from_slice(&tx_bytes)?;
        self.votes.lock().extend(tx.body.msgs.iter().cloned());
        self.txs.lock().push(tx);

        Ok(TxResponse {
            code: 0,
            tx_hash: format!("core-tx-{count}"),
            raw_log: String::new(),
        })
    }
}

/// Hot-key signer double: deterministic, no real key material
pub struct StaticSigner {
    address: String,
    granter: String,
}

impl StaticSigner {
    pub fn new(address: &str, granter: &str) -> Self {
        Self {
            address: address.to_string(),
            granter: granter.to_string(),
        }
    }
}

impl PushSigner for StaticSigner {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn granter(&self) -> String {
        self.granter.clone()
    }

    fn sign(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let mut hasher = Sha256::new();
        hasher.update(self.address.as_bytes());
        hasher.update(bytes);
        Ok(hasher.finalize().to_vec())
    }
}

/// External-chain driver double: records submissions, hands out
/// deterministic transaction hashes
pub struct MockDriver {
    chain_id: String,
    submissions: Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
    confirmations: AtomicU64,
}

impl MockDriver {
    pub fn new(chain_id: &str) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            submissions: Mutex::new(Vec::new()),
            confirmations: AtomicU64::new(12),
        }
    }

    pub fn submissions(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.submissions.lock().clone()
    }

    pub fn set_confirmations(&self, n: u64) {
        self.confirmations.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChainDriver for MockDriver {
    fn chain_id(&self) -> &str {
        &self.chain_id
    }

    async fn submit_signed(&self, payload: &[u8], signature: &[u8]) -> Result<String> {
        self.submissions
            .lock()
            .push((payload.to_vec(), signature.to_vec()));

        let mut hasher = Sha256::new();
        hasher.update(self.chain_id.as_bytes());
        hasher.update(payload);
        hasher.update(signature);
        let digest = hasher.finalize();
        Ok(format!("0x{}", hex::encode(&digest[..16])))
    }

    async fn confirmations(&self, _tx_hash: &str) -> Result<u64> {
        Ok(self.confirmations.load(Ordering::SeqCst))
    }

    async fn observe_inbound(&self) -> Result<BoxStream<'static, Event>> {
        Ok(futures::stream::empty().boxed())
    }
}

/// Build an active validator row for tests
pub fn validator(address: &str, status: ValidatorStatus) -> UniversalValidator {
    UniversalValidator {
        validator_address: address.to_string(),
        status,
        network: NetworkInfo::default(),
        joined_at_block: 0,
    }
}
