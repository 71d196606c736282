use crate::{Error, Result};
use libp2p::identity::Keypair;

/// Parse a 32-byte identity seed from hex, with or without a `0x` prefix.
pub fn parse_seed(hex_seed: &str) -> Result<[u8; 32]> {
    let trimmed = hex_seed.trim().trim_start_matches("0x");
    let bytes = hex::decode(trimmed).map_err(|e| Error::InvalidSeed(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| Error::InvalidSeed("seed must be exactly 32 bytes".to_string()))
}

/// Derive the node's Ed25519 transport keypair from its private seed.
///
/// The same seed always yields the same peer id, which is what lets the
/// fleet publish stable identities on the core chain.
pub fn keypair_from_seed(seed: [u8; 32]) -> Result<Keypair> {
    let mut bytes = seed;
    Keypair::ed25519_from_bytes(&mut bytes).map_err(|e| Error::InvalidSeed(e.to_string()))
}
