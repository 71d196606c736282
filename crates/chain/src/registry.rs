use crate::{DataProvider, Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use universal_types::{NetworkInfo, UniversalValidator, ValidatorStatus};

/// One node's row in the demo registry file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub validator_address: String,
    pub peer_id: String,
    #[serde(default)]
    pub multiaddrs: Vec<String>,
    /// Unix seconds of the last publication
    #[serde(default)]
    pub last_updated: u64,
    #[serde(default = "default_status")]
    pub status: ValidatorStatus,
}

fn default_status() -> ValidatorStatus {
    ValidatorStatus::Active
}

/// Demo-time stand-in for the on-chain network state: a JSON file shared
/// between local nodes, replaced atomically on every write.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub nodes: Vec<RegistryEntry>,
    #[serde(default)]
    pub latest_block: u64,
    #[serde(default)]
    pub current_key_id: Option<String>,
}

/// [`DataProvider`] backed by a [`RegistryFile`] on local disk.
///
/// Every query re-reads the file, so concurrently running nodes observe
/// each other's publications without coordination beyond the atomic
/// replace.
pub struct RegistryProvider {
    path: PathBuf,
}

impl RegistryProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn read(&self) -> Result<RegistryFile> {
        if !self.path.exists() {
            return Ok(RegistryFile::default());
        }
        let content = fs::read_to_string(&self.path)?;
        serde_json::from_str(&content).map_err(|e| Error::Registry(e.to_string()))
    }

    fn write(&self, file: &RegistryFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(file)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Insert or replace this node's own row.
    pub fn publish(&self, entry: RegistryEntry) -> Result<()> {
        let mut file = self.read()?;
        file.nodes
            .retain(|n| n.validator_address != entry.validator_address);
        file.nodes.push(entry);
        file.nodes
            .sort_by(|a, b| a.validator_address.cmp(&b.validator_address));
        self.write(&file)
    }

    /// Advance the simulated chain head. Demo plumbing only.
    pub fn set_latest_block(&self, height: u64) -> Result<()> {
        let mut file = self.read()?;
        file.latest_block = height;
        self.write(&file)
    }

    pub fn set_current_key_id(&self, key_id: Option<String>) -> Result<()> {
        let mut file = self.read()?;
        file.current_key_id = key_id;
        self.write(&file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DataProvider for RegistryProvider {
    async fn latest_block_num(&self) -> Result<u64> {
        Ok(self.read()?.latest_block)
    }

    async fn validator_set(&self) -> Result<Vec<UniversalValidator>> {
        Ok(self
            .read()?
            .nodes
            .into_iter()
            .map(|n| UniversalValidator {
                validator_address: n.validator_address,
                status: n.status,
                network: NetworkInfo {
                    peer_id: n.peer_id,
                    multiaddrs: n.multiaddrs,
                },
                joined_at_block: 0,
            })
            .collect())
    }

    async fn current_key_id(&self) -> Result<Option<String>> {
        Ok(self.read()?.current_key_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(address: &str, peer: &str) -> RegistryEntry {
        RegistryEntry {
            validator_address: address.to_string(),
            peer_id: peer.to_string(),
            multiaddrs: vec![format!("/ip4/127.0.0.1/tcp/9000/p2p/{peer}")],
            last_updated: 1,
            status: ValidatorStatus::Active,
        }
    }

    #[tokio::test]
    async fn publish_is_upsert_by_validator_address() {
        let dir = tempdir().unwrap();
        let registry = RegistryProvider::new(dir.path().join("registry.json"));

        registry.publish(entry("uv1b", "peerB")).unwrap();
        registry.publish(entry("uv1a", "peerA")).unwrap();
        registry.publish(entry("uv1b", "peerB2")).unwrap();

        let set = registry.validator_set().await.unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set[0].validator_address, "uv1a");
        assert_eq!(set[1].network.peer_id, "peerB2");
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let registry = RegistryProvider::new(dir.path().join("registry.json"));
        assert_eq!(registry.latest_block_num().await.unwrap(), 0);
        assert!(registry.validator_set().await.unwrap().is_empty());
        assert_eq!(registry.current_key_id().await.unwrap(), None);
    }

    #[tokio::test]
    async fn head_and_key_round_trip() {
        let dir = tempdir().unwrap();
        let registry = RegistryProvider::new(dir.path().join("registry.json"));

        registry.set_latest_block(111).unwrap();
        registry.set_current_key_id(Some("tss-1".into())).unwrap();

        assert_eq!(registry.latest_block_num().await.unwrap(), 111);
        assert_eq!(
            registry.current_key_id().await.unwrap().as_deref(),
            Some("tss-1")
        );
    }

    #[tokio::test]
    async fn network_lookup_resolves_published_addresses() {
        let dir = tempdir().unwrap();
        let registry = RegistryProvider::new(dir.path().join("registry.json"));
        registry.publish(entry("uv1a", "peerA")).unwrap();

        let network = registry.validator_network("uv1a").await.unwrap().unwrap();
        assert_eq!(network.peer_id, "peerA");
        assert_eq!(network.multiaddrs.len(), 1);
        assert!(registry.validator_network("uv1z").await.unwrap().is_none());
    }
}
