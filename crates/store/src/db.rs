use crate::{Error, Result};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// A JSON-file-backed map of string keys to values.
///
/// Every mutation rewrites the file through a temporary sibling and an
/// atomic rename, so readers never observe a torn table. Writers are
/// serialized by an internal mutex; reads clone out of the in-memory map.
#[derive(Debug)]
pub struct JsonTable<T> {
    path: PathBuf,
    data: Mutex<HashMap<String, T>>,
}

impl<T> JsonTable<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Open the table at `path`, creating an empty one if the file does not
    /// exist. An unreadable file is treated as empty rather than fatal; the
    /// next flush replaces it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let parent = path.parent().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                ErrorKind::NotFound,
                "parent directory not found",
            ))
        })?;
        fs::create_dir_all(parent)?;

        let data = if path.exists() {
            let content = fs::read_to_string(path)?;
            serde_json::from_str(&content).unwrap_or_default()
        } else {
            let empty: HashMap<String, T> = HashMap::new();
            fs::write(path, serde_json::to_string(&empty)?)?;
            empty
        };

        Ok(Self {
            path: path.to_owned(),
            data: Mutex::new(data),
        })
    }

    /// Insert a fresh key. Returns `false` (without writing) if the key is
    /// already present.
    pub fn insert_new(&self, key: &str, value: T) -> Result<bool> {
        let mut data = self.lock()?;
        if data.contains_key(key) {
            return Ok(false);
        }
        data.insert(key.to_string(), value);
        self.flush(&data)?;
        Ok(true)
    }

    /// Insert or replace a key.
    pub fn set(&self, key: &str, value: T) -> Result<()> {
        let mut data = self.lock()?;
        data.insert(key.to_string(), value);
        self.flush(&data)
    }

    pub fn get(&self, key: &str) -> Result<Option<T>> {
        let data = self.lock()?;
        Ok(data.get(key).cloned())
    }

    pub fn contains_key(&self, key: &str) -> Result<bool> {
        let data = self.lock()?;
        Ok(data.contains_key(key))
    }

    pub fn len(&self) -> Result<usize> {
        let data = self.lock()?;
        Ok(data.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        let data = self.lock()?;
        Ok(data.is_empty())
    }

    /// Clone of all values.
    pub fn values(&self) -> Result<Vec<T>> {
        let data = self.lock()?;
        Ok(data.values().cloned().collect())
    }

    /// Apply a fallible mutation to the value under `key` and flush.
    ///
    /// The mutation runs under the table lock; if it errors, nothing is
    /// written and the in-memory value is left untouched.
    pub fn try_update<F>(&self, key: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut T) -> Result<()>,
    {
        let mut data = self.lock()?;
        let Some(current) = data.get(key) else {
            return Err(Error::NotFound(key.to_string()));
        };
        let mut candidate = current.clone();
        f(&mut candidate)?;
        data.insert(key.to_string(), candidate);
        self.flush(&data)
    }

    /// Apply a mutation to every value, flushing once. Returns how many
    /// values the mutation reported as changed.
    pub fn update_all<F>(&self, mut f: F) -> Result<usize>
    where
        F: FnMut(&mut T) -> bool,
    {
        let mut data = self.lock()?;
        let mut changed = 0;
        for value in data.values_mut() {
            if f(value) {
                changed += 1;
            }
        }
        if changed > 0 {
            self.flush(&data)?;
        }
        Ok(changed)
    }

    /// Drop every entry failing the predicate, flushing once. Returns how
    /// many entries were removed.
    pub fn retain<F>(&self, mut keep: F) -> Result<usize>
    where
        F: FnMut(&T) -> bool,
    {
        let mut data = self.lock()?;
        let before = data.len();
        data.retain(|_, v| keep(v));
        let removed = before - data.len();
        if removed > 0 {
            self.flush(&data)?;
        }
        Ok(removed)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, T>>> {
        self.data.lock().map_err(|_| Error::Poisoned)
    }

    /// Write to a temporary sibling, then rename over the target.
    fn flush(&self, data: &HashMap<String, T>) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string(data)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
