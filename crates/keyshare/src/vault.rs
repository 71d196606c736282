use crate::{Error, Result};
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use sha2::Sha256;
use std::fs;
use std::path::PathBuf;
use tracing::debug;
use zeroize::Zeroizing;

const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const PBKDF2_ROUNDS: u32 = 100_000;

/// Password-protected, file-per-key storage for TSS keyshares.
///
/// The vault directory is created with mode `0700` and every keyshare file
/// with mode `0600`. Writes go through a temporary file and an atomic
/// rename, so a crash never leaves a torn keyshare behind.
pub struct KeyshareVault {
    dir: PathBuf,
    password: Zeroizing<String>,
}

impl KeyshareVault {
    /// Open (creating if needed) a vault rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>, password: impl Into<String>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
        }
        Ok(Self {
            dir,
            password: Zeroizing::new(password.into()),
        })
    }

    /// Encrypt `plaintext` and persist it under `key_id`.
    ///
    /// Overwrites any existing keyshare with the same id.
    pub fn store(&self, key_id: &str, plaintext: &[u8]) -> Result<()> {
        validate_key_id(key_id)?;

        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let key = derive_key(&self.password, &salt);
        let cipher = Aes256Gcm::new_from_slice(&*key).map_err(|_| Error::EncryptionFailed)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        self.write_atomic(key_id, &blob)?;
        debug!(%key_id, bytes = plaintext.len(), "stored keyshare");
        Ok(())
    }

    /// Decrypt and return the keyshare stored under `key_id`.
    pub fn get(&self, key_id: &str) -> Result<Vec<u8>> {
        validate_key_id(key_id)?;

        let path = self.path_for(key_id);
        let blob = match fs::read(&path) {
            Ok(blob) => blob,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(key_id.to_string()));
            }
            Err(e) => return Err(Error::Io(e)),
        };

        if blob.len() < SALT_LEN + NONCE_LEN {
            return Err(Error::DecryptionFailed);
        }
        let (salt, rest) = blob.split_at(SALT_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let key = derive_key(&self.password, salt);
        let cipher = Aes256Gcm::new_from_slice(&*key).map_err(|_| Error::DecryptionFailed)?;
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::DecryptionFailed)
    }

    /// Whether a keyshare exists under `key_id`.
    pub fn exists(&self, key_id: &str) -> Result<bool> {
        validate_key_id(key_id)?;
        Ok(self.path_for(key_id).is_file())
    }

    /// Ids of all stored keyshares, in no particular order.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                // Skip torn writes left behind by a crash mid-store.
                if name.ends_with(".tmp") {
                    continue;
                }
                ids.push(name.to_string());
            }
        }
        Ok(ids)
    }

    fn path_for(&self, key_id: &str) -> PathBuf {
        self.dir.join(key_id)
    }

    fn write_atomic(&self, key_id: &str, blob: &[u8]) -> Result<()> {
        let path = self.path_for(key_id);
        let tmp = self.dir.join(format!("{key_id}.tmp"));
        fs::write(&tmp, blob)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

fn derive_key(password: &str, salt: &[u8]) -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ROUNDS, &mut *key);
    key
}

fn validate_key_id(key_id: &str) -> Result<()> {
    if key_id.is_empty()
        || key_id.contains('/')
        || key_id.contains('\\')
        || key_id.contains("..")
    {
        return Err(Error::InvalidKeyId(key_id.to_string()));
    }
    Ok(())
}
