//! Shared command plumbing: opening the data directory and keeping the
//! key-value backend in sync with store mutations.

use std::path::Path;

use anyhow::{bail, Result};

use taskdeck_core::persist::Persistence;
use taskdeck_core::storage::FileStorage;
use taskdeck_core::store::Store;

/// An opened data directory: the live store plus the persistence adapter
/// that keeps the key-value backend current.
#[derive(Debug)]
pub struct App {
    persistence: Persistence<FileStorage>,
    store: Store,
}

impl App {
    /// Open an existing data directory. Fails when `taskdeck init` has not
    /// been run there.
    pub fn open(data_dir: &Path) -> Result<Self> {
        if !data_dir.exists() {
            bail!(
                "No data directory at {}. Run 'taskdeck init' first.",
                data_dir.display()
            );
        }
        Self::open_or_create(data_dir)
    }

    /// Open the data directory, creating it and an empty store if needed.
    pub fn open_or_create(data_dir: &Path) -> Result<Self> {
        let storage = FileStorage::open(&data_dir.join("kv"))?;
        let mut persistence = Persistence::new(storage, data_dir)?;
        let store = persistence.load_or_create()?;
        Ok(Self { persistence, store })
    }

    pub const fn store(&self) -> &Store {
        &self.store
    }

    pub fn persistence_mut(&mut self) -> &mut Persistence<FileStorage> {
        &mut self.persistence
    }

    /// Write the store back to the key-value backend. Call after any
    /// mutation; read-only commands can skip it.
    pub fn save(&mut self) -> Result<()> {
        self.persistence.save(&self.store)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_fails_without_init() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = App::open(&missing).unwrap_err();
        assert!(err.to_string().contains("taskdeck init"));
    }

    #[test]
    fn test_open_or_create_then_open() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("data");
        {
            let mut app = App::open_or_create(&data_dir).unwrap();
            app.save().unwrap();
        }
        let app = App::open(&data_dir).unwrap();
        assert!(app.store().list_tasks(true).unwrap().is_empty());
    }
}
