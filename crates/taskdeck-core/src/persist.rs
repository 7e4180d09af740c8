//! Persistence adapter: bootstrap the store from durable key-value storage
//! at startup and keep it durable after mutation.
//!
//! Several storage keys may hold a store blob (the current format key plus
//! legacy keys retained for recovery). Load decodes every candidate and picks
//! the one with the most task rows: a prior partial migration or crash can
//! leave a newer-format blob that is emptier than an older one, and losing
//! rows to a format preference is worse than re-reading an old blob. Saves
//! only ever write the current key; legacy keys are cleaned up by an explicit
//! operation, never as a side effect.

use std::path::{Path, PathBuf};

use anyhow::Context;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::{CoreError, CoreResult};
use crate::storage::KvStorage;
use crate::store::Store;

/// Storage key for the current blob format.
pub const CURRENT_KEY: &str = "taskdeck/store.v2";

/// Older keys, tried at load time only.
pub const LEGACY_KEYS: &[&str] = &["taskdeck/store.v1", "taskboard/data"];

/// Where the first legacy blob we recover from gets copied, once.
pub const LEGACY_BACKUP_KEY: &str = "taskdeck/legacy-backup";

/// Marker preventing the legacy backup from being repeated.
pub const LEGACY_BACKUP_MARKER_KEY: &str = "taskdeck/legacy-backup-done";

const STORE_FILE: &str = "store.db";

fn candidate_keys() -> impl Iterator<Item = &'static str> {
    std::iter::once(CURRENT_KEY).chain(LEGACY_KEYS.iter().copied())
}

/// Adapter between the live store and a [`KvStorage`] backend.
#[derive(Debug)]
pub struct Persistence<S: KvStorage> {
    storage: S,
    dir: PathBuf,
}

impl<S: KvStorage> Persistence<S> {
    /// Create an adapter working under `dir` (the store file and scratch
    /// files live there).
    pub fn new(storage: S, dir: &Path) -> CoreResult<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create data dir: {}", dir.display()))?;
        Ok(Self {
            storage,
            dir: dir.to_path_buf(),
        })
    }

    /// Path of the live store file.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.dir.join(STORE_FILE)
    }

    /// Borrow the underlying storage.
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Load the best available stored snapshot.
    ///
    /// Returns `Ok(None)` when no candidate key holds any value (the caller
    /// then creates a fresh store). Raw data that no decoder accepts is a
    /// hard error: silently starting empty would discard user data.
    pub fn load(&mut self) -> CoreResult<Option<Store>> {
        struct Candidate {
            key: &'static str,
            path: PathBuf,
            task_count: i64,
        }

        let mut raw_keys: Vec<&'static str> = Vec::new();
        let mut best: Option<Candidate> = None;

        for (idx, key) in candidate_keys().enumerate() {
            let Some(text) = self.storage.get(key)? else {
                continue;
            };
            raw_keys.push(key);

            let bytes = match codec::decode(&text) {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(key, error = %e, "candidate failed to decode");
                    continue;
                }
            };

            let path = self.dir.join(format!("candidate-{idx}.db"));
            std::fs::write(&path, &bytes)
                .with_context(|| format!("failed to stage candidate: {}", path.display()))?;
            let Some(task_count) = count_tasks(&path) else {
                warn!(key, "candidate decoded but is not a readable store");
                let _ = std::fs::remove_file(&path);
                continue;
            };
            debug!(key, task_count, "usable store candidate");

            // Strictly greater: ties go to the earlier (current-format) key.
            if best.as_ref().is_none_or(|b| task_count > b.task_count) {
                if let Some(loser) = best.take() {
                    let _ = std::fs::remove_file(loser.path);
                }
                best = Some(Candidate {
                    key,
                    path,
                    task_count,
                });
            } else {
                let _ = std::fs::remove_file(path);
            }
        }

        let Some(winner) = best else {
            if let Some(key) = raw_keys.first() {
                return Err(CoreError::UnreadableStore {
                    key: (*key).to_string(),
                });
            }
            return Ok(None);
        };

        let store_path = self.store_path();
        remove_store_files(&store_path)?;
        std::fs::rename(&winner.path, &store_path).with_context(|| {
            format!("failed to promote store candidate: {}", store_path.display())
        })?;

        if winner.key == CURRENT_KEY {
            info!(task_count = winner.task_count, "loaded store");
        } else {
            info!(
                key = winner.key,
                task_count = winner.task_count,
                "recovered store from legacy key"
            );
            self.backup_legacy_once(winner.key);
        }

        Ok(Some(Store::open(&store_path)?))
    }

    /// Load the stored snapshot, or create a fresh empty store.
    ///
    /// Creating fresh because recovery failed never happens silently here:
    /// unreadable data still surfaces as [`CoreError::UnreadableStore`].
    pub fn load_or_create(&mut self) -> CoreResult<Store> {
        match self.load()? {
            Some(store) => Ok(store),
            None => {
                info!("no existing store; creating a fresh one");
                Store::open(&self.store_path())
            }
        }
    }

    /// Serialize `store` and write it under the current-format key.
    ///
    /// Legacy keys are never touched; see [`Persistence::clear_legacy`].
    pub fn save(&mut self, store: &Store) -> CoreResult<()> {
        let scratch = self.dir.join("save-scratch.db");
        let bytes = store.to_bytes(&scratch)?;
        let text = codec::encode(&bytes);
        self.storage.set(CURRENT_KEY, &text)?;
        debug!(bytes = bytes.len(), "saved store");
        Ok(())
    }

    /// Explicit cleanup of legacy keys. Not invoked by any normal save or
    /// load path.
    pub fn clear_legacy(&mut self) -> CoreResult<usize> {
        let mut removed = 0;
        for key in LEGACY_KEYS {
            if self.storage.get(key)?.is_some() {
                self.storage.remove(key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Copy the legacy blob we recovered from to a backup key, guarded by a
    /// one-time marker. Best effort: backup failure must not block loading.
    fn backup_legacy_once(&mut self, key: &'static str) {
        let already = match self.storage.get(LEGACY_BACKUP_MARKER_KEY) {
            Ok(marker) => marker.is_some(),
            Err(e) => {
                warn!(error = %e, "could not check legacy backup marker");
                return;
            }
        };
        if already {
            return;
        }
        let value = match self.storage.get(key) {
            Ok(Some(value)) => value,
            Ok(None) => return,
            Err(e) => {
                warn!(key, error = %e, "could not read legacy blob for backup");
                return;
            }
        };
        if let Err(e) = self.storage.set(LEGACY_BACKUP_KEY, &value) {
            warn!(key, error = %e, "legacy backup failed; continuing");
            return;
        }
        if let Err(e) = self.storage.set(LEGACY_BACKUP_MARKER_KEY, key) {
            warn!(key, error = %e, "could not write legacy backup marker");
        }
    }
}

/// Task row count of a staged candidate, or `None` if the file is not a
/// readable store. A store without a tasks table counts as zero rows.
fn count_tasks(path: &Path) -> Option<i64> {
    let conn = Connection::open(path).ok()?;
    match conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0)) {
        Ok(count) => Some(count),
        Err(e) if e.to_string().contains("no such table") => Some(0),
        Err(_) => None,
    }
}

fn remove_store_files(store_path: &Path) -> CoreResult<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut path = store_path.as_os_str().to_owned();
        path.push(suffix);
        let path = PathBuf::from(path);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to remove stale store file: {}", path.display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewTask;
    use crate::storage::MemoryStorage;
    use tempfile::tempdir;

    /// Encoded blob of a store holding `n` tasks.
    fn blob_with_tasks(dir: &Path, n: usize) -> String {
        let store = Store::open(&dir.join("builder.db")).unwrap();
        for i in 0..n {
            store
                .create_task(NewTask {
                    title: format!("task {i}"),
                    date: "2026-03-01".to_string(),
                    ..NewTask::default()
                })
                .unwrap();
        }
        let bytes = store.to_bytes(&dir.join("builder-scratch.db")).unwrap();
        store.close().unwrap();
        let _ = std::fs::remove_file(dir.join("builder.db"));
        codec::encode(&bytes)
    }

    #[test]
    fn test_load_with_nothing_stored_is_fresh() {
        let dir = tempdir().unwrap();
        let mut p = Persistence::new(MemoryStorage::new(), dir.path()).unwrap();
        assert!(p.load().unwrap().is_none());
        let store = p.load_or_create().unwrap();
        assert!(store.list_tasks(true).unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempdir().unwrap();
        let mut p = Persistence::new(MemoryStorage::new(), dir.path()).unwrap();
        let store = p.load_or_create().unwrap();
        store
            .create_task(NewTask {
                title: "persisted".to_string(),
                date: "2026-03-01".to_string(),
                ..NewTask::default()
            })
            .unwrap();
        p.save(&store).unwrap();
        store.close().unwrap();

        // Fresh adapter over the same storage.
        let storage = p.storage().clone();
        let dir2 = tempdir().unwrap();
        let mut p2 = Persistence::new(storage, dir2.path()).unwrap();
        let loaded = p2.load().unwrap().expect("blob should load");
        let tasks = loaded.list_tasks(true).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "persisted");
    }

    #[test]
    fn test_most_complete_candidate_wins() {
        let build_dir = tempdir().unwrap();
        let five = blob_with_tasks(build_dir.path(), 5);
        let eight = blob_with_tasks(build_dir.path(), 8);

        // The emptier blob sits under the current key; the fuller one under
        // a legacy key. Row count must beat key priority.
        let mut storage = MemoryStorage::new();
        storage.set(CURRENT_KEY, &five).unwrap();
        storage.set(LEGACY_KEYS[0], &eight).unwrap();

        let dir = tempdir().unwrap();
        let mut p = Persistence::new(storage, dir.path()).unwrap();
        let store = p.load().unwrap().expect("a candidate should load");
        assert_eq!(store.list_tasks(true).unwrap().len(), 8);
    }

    #[test]
    fn test_tie_prefers_current_key() {
        let build_dir = tempdir().unwrap();
        let a = blob_with_tasks(build_dir.path(), 3);
        let b = blob_with_tasks(build_dir.path(), 3);

        let mut storage = MemoryStorage::new();
        storage.set(CURRENT_KEY, &a).unwrap();
        storage.set(LEGACY_KEYS[0], &b).unwrap();

        let dir = tempdir().unwrap();
        let mut p = Persistence::new(storage, dir.path()).unwrap();
        let store = p.load().unwrap().expect("a candidate should load");
        assert_eq!(store.list_tasks(true).unwrap().len(), 3);
        // No legacy recovery happened, so no backup marker was written.
        assert!(p
            .storage()
            .get(LEGACY_BACKUP_MARKER_KEY)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unreadable_data_is_a_hard_error() {
        let mut storage = MemoryStorage::new();
        storage.set(CURRENT_KEY, "not a store blob at all").unwrap();

        let dir = tempdir().unwrap();
        let mut p = Persistence::new(storage, dir.path()).unwrap();
        let err = p.load().unwrap_err();
        assert!(matches!(err, CoreError::UnreadableStore { .. }));
    }

    #[test]
    fn test_legacy_recovery_backs_up_once() {
        let build_dir = tempdir().unwrap();
        let blob = blob_with_tasks(build_dir.path(), 2);

        let mut storage = MemoryStorage::new();
        storage.set(LEGACY_KEYS[1], &blob).unwrap();

        let dir = tempdir().unwrap();
        let mut p = Persistence::new(storage, dir.path()).unwrap();
        let store = p.load().unwrap().expect("legacy blob should load");
        assert_eq!(store.list_tasks(true).unwrap().len(), 2);
        store.close().unwrap();

        assert_eq!(
            p.storage().get(LEGACY_BACKUP_KEY).unwrap().as_deref(),
            Some(blob.as_str())
        );
        // Replace the legacy value; a second load must not overwrite the
        // backup because the marker is set.
        p.storage_mut().set(LEGACY_KEYS[1], "changed").unwrap();
        let _ = p.load();
        assert_eq!(
            p.storage().get(LEGACY_BACKUP_KEY).unwrap().as_deref(),
            Some(blob.as_str())
        );
    }

    #[test]
    fn test_legacy_compressed_blob_loads() {
        let build_dir = tempdir().unwrap();
        let store = Store::open(&build_dir.path().join("b.db")).unwrap();
        store
            .create_task(NewTask {
                title: "old format".to_string(),
                date: "2026-03-01".to_string(),
                ..NewTask::default()
            })
            .unwrap();
        let bytes = store.to_bytes(&build_dir.path().join("s.db")).unwrap();
        store.close().unwrap();

        let mut storage = MemoryStorage::new();
        storage
            .set(LEGACY_KEYS[0], &codec::encode_legacy(&bytes))
            .unwrap();

        let dir = tempdir().unwrap();
        let mut p = Persistence::new(storage, dir.path()).unwrap();
        let loaded = p.load().unwrap().expect("legacy blob should decode");
        assert_eq!(loaded.list_tasks(true).unwrap()[0].title, "old format");
    }

    #[test]
    fn test_save_respects_capacity() {
        let dir = tempdir().unwrap();
        let mut p =
            Persistence::new(MemoryStorage::with_capacity(64), dir.path()).unwrap();
        let store = p.load_or_create().unwrap();
        let err = p.save(&store).unwrap_err();
        assert!(matches!(err, CoreError::CapacityExceeded { .. }));
        // Nothing was written.
        assert!(p.storage().get(CURRENT_KEY).unwrap().is_none());
    }

    #[test]
    fn test_clear_legacy_is_explicit_only() {
        let build_dir = tempdir().unwrap();
        let blob = blob_with_tasks(build_dir.path(), 1);

        let mut storage = MemoryStorage::new();
        storage.set(LEGACY_KEYS[0], &blob).unwrap();

        let dir = tempdir().unwrap();
        let mut p = Persistence::new(storage, dir.path()).unwrap();
        let store = p.load().unwrap().expect("should load");
        p.save(&store).unwrap();
        // Normal save leaves legacy keys alone.
        assert!(p.storage().get(LEGACY_KEYS[0]).unwrap().is_some());

        assert_eq!(p.clear_legacy().unwrap(), 1);
        assert!(p.storage().get(LEGACY_KEYS[0]).unwrap().is_none());
    }
}
