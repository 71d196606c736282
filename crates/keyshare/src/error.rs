/// Errors raised by the [`KeyshareVault`](crate::KeyshareVault)
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key id is empty or contains a path component (`/`, `\`, `..`)
    #[error("invalid key id: {0:?}")]
    InvalidKeyId(String),

    /// No keyshare stored under the given id
    #[error("keyshare not found: {0}")]
    NotFound(String),

    /// The file could not be decrypted. Deliberately carries no detail: a
    /// wrong password, a truncated file and a forged tag are all reported
    /// identically.
    #[error("keyshare decryption failed")]
    DecryptionFailed,

    /// Encryption of a fresh keyshare failed
    #[error("keyshare encryption failed")]
    EncryptionFailed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
