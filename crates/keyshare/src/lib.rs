//! Encrypted at-rest storage for TSS keyshares.
//!
//! One file per keyshare, laid out as `salt(32) || nonce(12) || ciphertext`,
//! where the ciphertext is AES-256-GCM under a key derived from the vault
//! password with PBKDF2-HMAC-SHA256. A keyshare never touches disk in
//! plaintext.

mod error;
mod vault;

pub use error::Error;
pub use vault::KeyshareVault;

/// Convenience alias for `Result<T, universal_keyshare::Error>`
pub type Result<T> = std::result::Result<T, Error>;
