use crate::Result;
use async_trait::async_trait;
use universal_types::{NetworkInfo, UniversalValidator};

/// Read-side snapshot of the core chain.
///
/// Implementations are expected to be cheap enough to poll once per
/// coordinator tick; callers never cache across ticks.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Height of the latest finalized core-chain block
    async fn latest_block_num(&self) -> Result<u64>;

    /// The current universal validator set, including pending members
    async fn validator_set(&self) -> Result<Vec<UniversalValidator>>;

    /// Id of the TSS key currently in rotation, if one exists
    async fn current_key_id(&self) -> Result<Option<String>>;

    /// How to reach a validator's client node, if it published addresses
    async fn validator_network(&self, address: &str) -> Result<Option<NetworkInfo>> {
        Ok(self
            .validator_set()
            .await?
            .into_iter()
            .find(|v| v.validator_address == address)
            .map(|v| v.network))
    }
}
