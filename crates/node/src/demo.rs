//! Demo-time chain collaborators for running a fleet on one machine.
//!
//! Production deployments replace these with a real core-chain RPC signer
//! and per-chain drivers; the interfaces are identical.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;
use universal_chain::{
    ChainDriver, PushSigner, Result, SignedTx, TxBroadcaster, TxResponse,
};
use universal_types::Event;

/// Hot-key stand-in: deterministic signatures derived from a local seed
pub struct DemoSigner {
    address: String,
    granter: String,
    seed: [u8; 32],
}

impl DemoSigner {
    pub fn new(granter: &str, seed: [u8; 32]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"hotkey");
        hasher.update(seed);
        let digest = hasher.finalize();
        Self {
            address: format!("uvhot{}", hex::encode(&digest[..8])),
            granter: granter.to_string(),
            seed,
        }
    }
}

impl PushSigner for DemoSigner {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn granter(&self) -> String {
        self.granter.clone()
    }

    fn sign(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let mut hasher = Sha256::new();
        hasher.update(self.seed);
        hasher.update(bytes);
        Ok(hasher.finalize().to_vec())
    }
}

/// Accepts every vote and logs it instead of reaching a chain
#[derive(Default)]
pub struct LogBroadcaster {
    counter: AtomicU64,
}

impl LogBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TxBroadcaster for LogBroadcaster {
    async fn broadcast(&self, tx_bytes: Vec<u8>) -> Result<TxResponse> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(tx) = serde_json::from_slice::<SignedTx>(&tx_bytes) {
            for msg in &tx.body.msgs {
                info!(granter = %tx.body.granter, ?msg, "vote accepted (demo)");
            }
        }
        Ok(TxResponse {
            code: 0,
            tx_hash: format!("demo-tx-{n}"),
            raw_log: String::new(),
        })
    }
}

/// External-chain driver that logs broadcasts and mints deterministic
/// transaction hashes
pub struct PrintDriver {
    chain_id: String,
}

impl PrintDriver {
    pub fn new(chain_id: &str) -> Self {
        Self {
            chain_id: chain_id.to_string(),
        }
    }
}

#[async_trait]
impl ChainDriver for PrintDriver {
    fn chain_id(&self) -> &str {
        &self.chain_id
    }

    async fn submit_signed(&self, payload: &[u8], signature: &[u8]) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(self.chain_id.as_bytes());
        hasher.update(payload);
        hasher.update(signature);
        let digest = hasher.finalize();
        let tx_hash = format!("0x{}", hex::encode(&digest[..16]));
        info!(chain = %self.chain_id, %tx_hash, bytes = payload.len(), "outbound broadcast (demo)");
        Ok(tx_hash)
    }

    async fn confirmations(&self, _tx_hash: &str) -> Result<u64> {
        Ok(1)
    }

    async fn observe_inbound(&self) -> Result<BoxStream<'static, Event>> {
        Ok(futures::stream::empty().boxed())
    }
}
