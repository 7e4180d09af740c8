//! Durable key-value storage the persistence adapter writes through.
//!
//! Models a quota-limited string store (one value per key). Capacity is
//! checked before every write so a full store raises
//! [`CoreError::CapacityExceeded`] instead of truncating silently.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::error::{CoreError, CoreResult};

/// Default quota, generous enough for any realistic single-device dataset.
pub const DEFAULT_CAPACITY: usize = 8 * 1024 * 1024;

/// A quota-limited durable string store.
pub trait KvStorage {
    /// Read the value under `key`, or `None` if absent.
    fn get(&self, key: &str) -> CoreResult<Option<String>>;

    /// Write `value` under `key`, replacing any existing value.
    ///
    /// Checks capacity first and returns [`CoreError::CapacityExceeded`]
    /// without modifying the store when the write would exceed the quota.
    fn set(&mut self, key: &str, value: &str) -> CoreResult<()>;

    /// Remove the value under `key`; removing an absent key is a no-op.
    fn remove(&mut self, key: &str) -> CoreResult<()>;

    /// All keys currently present.
    fn keys(&self) -> CoreResult<Vec<String>>;
}

fn check_capacity(used: usize, replaced: usize, incoming: usize, capacity: usize) -> CoreResult<()> {
    let needed = used - replaced + incoming;
    if needed > capacity {
        return Err(CoreError::CapacityExceeded { needed, capacity });
    }
    Ok(())
}

/// In-memory storage, used by tests and as the reference implementation.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    entries: BTreeMap<String, String>,
    capacity: usize,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    #[must_use]
    pub const fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity,
        }
    }

    fn used(&self) -> usize {
        self.entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStorage for MemoryStorage {
    fn get(&self, key: &str) -> CoreResult<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> CoreResult<()> {
        let replaced = self
            .entries
            .get(key)
            .map_or(0, |old| key.len() + old.len());
        check_capacity(self.used(), replaced, key.len() + value.len(), self.capacity)?;
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> CoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> CoreResult<Vec<String>> {
        Ok(self.entries.keys().cloned().collect())
    }
}

/// File-backed storage: one file per key under a directory.
///
/// Keys are sanitized into file names; the mapping is recorded in the file
/// name itself so `keys()` can reverse it exactly. `/` becomes `__` and
/// every other special character (including a literal `_`, so `__` stays
/// unambiguous) is percent-encoded.
#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
    capacity: usize,
}

const KV_EXT: &str = "kv";

impl FileStorage {
    /// Open (creating if needed) file storage rooted at `dir`.
    pub fn open(dir: &Path) -> CoreResult<Self> {
        Self::open_with_capacity(dir, DEFAULT_CAPACITY)
    }

    pub fn open_with_capacity(dir: &Path, capacity: usize) -> CoreResult<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create storage dir: {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            capacity,
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-') {
                    c.to_string()
                } else if c == '/' {
                    "__".to_string()
                } else {
                    format!("%{:02x}", c as u32)
                }
            })
            .collect();
        self.dir.join(format!("{name}.{KV_EXT}"))
    }

    fn key_for(name: &str) -> String {
        let mut out = String::new();
        let mut chars = name.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '_' && chars.peek() == Some(&'_') {
                chars.next();
                out.push('/');
            } else if c == '%' {
                let hex: String = chars.by_ref().take(2).collect();
                if let Some(decoded) = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                {
                    out.push(decoded);
                } else {
                    out.push('%');
                    out.push_str(&hex);
                }
            } else {
                out.push(c);
            }
        }
        out
    }

    fn used(&self) -> CoreResult<usize> {
        let mut total = 0;
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read storage dir: {}", self.dir.display()))?;
        for entry in entries {
            let entry = entry.context("failed to read storage dir entry")?;
            if entry.path().extension().is_some_and(|e| e == KV_EXT) {
                let meta = entry.metadata().context("failed to stat storage file")?;
                #[allow(clippy::cast_possible_truncation)]
                {
                    total += meta.len() as usize;
                }
            }
        }
        Ok(total)
    }
}

impl KvStorage for FileStorage {
    fn get(&self, key: &str) -> CoreResult<Option<String>> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CoreError::Internal(
                anyhow::Error::new(e).context(format!("failed to read storage key '{key}'")),
            )),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> CoreResult<()> {
        let path = self.path_for(key);
        let replaced = std::fs::metadata(&path).map_or(0, |m| {
            #[allow(clippy::cast_possible_truncation)]
            {
                m.len() as usize
            }
        });
        check_capacity(self.used()?, replaced, value.len(), self.capacity)?;

        // Write-then-rename so a crash mid-write never corrupts the value.
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, value)
            .with_context(|| format!("failed to write storage key '{key}'"))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("failed to commit storage key '{key}'"))?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> CoreResult<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::Internal(
                anyhow::Error::new(e).context(format!("failed to remove storage key '{key}'")),
            )),
        }
    }

    fn keys(&self) -> CoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read storage dir: {}", self.dir.display()))?;
        for entry in entries {
            let entry = entry.context("failed to read storage dir entry")?;
            let path = entry.path();
            if path.extension().is_some_and(|e| e == KV_EXT) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(Self::key_for(stem));
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_memory_round_trip() {
        let mut s = MemoryStorage::new();
        assert_eq!(s.get("a").unwrap(), None);
        s.set("a", "hello").unwrap();
        assert_eq!(s.get("a").unwrap().as_deref(), Some("hello"));
        s.remove("a").unwrap();
        assert_eq!(s.get("a").unwrap(), None);
    }

    #[test]
    fn test_memory_capacity_checked_before_write() {
        let mut s = MemoryStorage::with_capacity(16);
        s.set("k", "12345").unwrap();
        let err = s.set("k2", "too big to fit here").unwrap_err();
        assert!(matches!(err, CoreError::CapacityExceeded { .. }));
        // Original value untouched.
        assert_eq!(s.get("k").unwrap().as_deref(), Some("12345"));
        assert_eq!(s.get("k2").unwrap(), None);
    }

    #[test]
    fn test_memory_replacement_frees_old_value() {
        let mut s = MemoryStorage::with_capacity(12);
        s.set("k", "0123456789").unwrap();
        // Replacing should count against the quota minus the old value.
        s.set("k", "abcdefghij").unwrap();
        assert_eq!(s.get("k").unwrap().as_deref(), Some("abcdefghij"));
    }

    #[test]
    fn test_file_storage_round_trip() {
        let dir = tempdir().unwrap();
        let mut s = FileStorage::open(dir.path()).unwrap();
        s.set("taskdeck/store.v2", "blob").unwrap();
        assert_eq!(
            s.get("taskdeck/store.v2").unwrap().as_deref(),
            Some("blob")
        );
        assert_eq!(s.keys().unwrap(), vec!["taskdeck/store.v2".to_string()]);
        s.remove("taskdeck/store.v2").unwrap();
        assert_eq!(s.get("taskdeck/store.v2").unwrap(), None);
    }

    #[test]
    fn test_keys_distinguish_underscores_from_slashes() {
        let dir = tempdir().unwrap();
        let mut s = FileStorage::open(dir.path()).unwrap();
        s.set("a/b", "slash").unwrap();
        s.set("a__b", "underscore").unwrap();

        assert_eq!(s.get("a/b").unwrap().as_deref(), Some("slash"));
        assert_eq!(s.get("a__b").unwrap().as_deref(), Some("underscore"));
        let keys = s.keys().unwrap();
        assert!(keys.contains(&"a/b".to_string()));
        assert!(keys.contains(&"a__b".to_string()));
    }

    #[test]
    fn test_file_storage_capacity() {
        let dir = tempdir().unwrap();
        let mut s = FileStorage::open_with_capacity(dir.path(), 8).unwrap();
        s.set("a", "1234").unwrap();
        assert!(matches!(
            s.set("b", "567890"),
            Err(CoreError::CapacityExceeded { .. })
        ));
    }
}
