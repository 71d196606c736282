use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use universal_types::Event;

/// Per-chain outbound broadcast and inbound observation.
///
/// Concrete drivers (EVM JSON-RPC, Solana, ...) live outside this
/// workspace; the client only consumes this seam.
#[async_trait]
pub trait ChainDriver: Send + Sync {
    /// CAIP chain id this driver serves, e.g. `eip155:1`
    fn chain_id(&self) -> &str;

    /// Attach a finished TSS signature to the prepared payload and
    /// broadcast it. Returns the external chain's transaction hash.
    async fn submit_signed(&self, payload: &[u8], signature: &[u8]) -> Result<String>;

    /// Confirmation depth of a broadcast transaction
    async fn confirmations(&self, tx_hash: &str) -> Result<u64>;

    /// Stream of inbound events observed on this chain, consumed by the
    /// core-chain observer
    async fn observe_inbound(&self) -> Result<BoxStream<'static, Event>>;
}

/// Registry of chain drivers keyed by CAIP chain id
#[derive(Clone, Default)]
pub struct Chains {
    drivers: Arc<RwLock<HashMap<String, Arc<dyn ChainDriver>>>>,
}

impl Chains {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, driver: Arc<dyn ChainDriver>) {
        self.drivers
            .write()
            .insert(driver.chain_id().to_string(), driver);
    }

    pub fn get(&self, chain_id: &str) -> Result<Arc<dyn ChainDriver>> {
        self.drivers
            .read()
            .get(chain_id)
            .cloned()
            .ok_or_else(|| Error::UnknownChain(chain_id.to_string()))
    }

    pub fn chain_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.drivers.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDriver;

    #[tokio::test]
    async fn registry_resolves_by_chain_id() {
        let chains = Chains::new();
        chains.register(Arc::new(MockDriver::new("eip155:1")));
        chains.register(Arc::new(MockDriver::new("eip155:137")));

        assert_eq!(chains.chain_ids(), ["eip155:1", "eip155:137"]);
        assert_eq!(chains.get("eip155:1").unwrap().chain_id(), "eip155:1");
        assert!(matches!(
            chains.get("solana:mainnet"),
            Err(Error::UnknownChain(_))
        ));
    }

    #[tokio::test]
    async fn mock_driver_records_submissions() {
        let driver = MockDriver::new("eip155:1");
        let hash = driver.submit_signed(b"payload", b"signature").await.unwrap();
        assert!(hash.starts_with("0x"));

        let again = driver.submit_signed(b"payload", b"signature").await.unwrap();
        assert_eq!(hash, again, "submission hash is deterministic");
        assert_eq!(driver.submissions().len(), 2);
        assert!(driver.confirmations(&hash).await.unwrap() > 0);
    }
}
