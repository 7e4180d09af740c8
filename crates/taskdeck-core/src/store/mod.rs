//! The embedded relational store.
//!
//! [`Store`] owns the SQLite connection and is the single writer for its
//! database. Entity operations live in the per-entity submodules as `impl
//! Store` blocks; multi-statement operations (merge, import, bulk archive)
//! open an explicit transaction on the underlying connection.

pub mod assignees;
pub mod handle;
pub mod projects;
pub mod schema;
pub mod sprints;
pub mod tasks;

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use rusqlite::backup::Backup;
use rusqlite::Connection;

use crate::error::CoreResult;

pub use handle::StoreHandle;

/// Owner of the SQLite connection plus the per-session schema cache.
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
    /// Columns verified present this session, keyed as `table.column`.
    /// Invalidated when a write fails referencing one of them (self-healing).
    verified_columns: RefCell<HashSet<String>>,
}

impl Store {
    /// Open or create a store at the given path and bring its schema up to
    /// date.
    pub fn open(path: &Path) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create store parent dir: {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open store: {}", path.display()))?;
        let store = Self {
            conn,
            path: Some(path.to_path_buf()),
            verified_columns: RefCell::new(HashSet::new()),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (tests and scratch work).
    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory store")?;
        let store = Self {
            conn,
            path: None,
            verified_columns: RefCell::new(HashSet::new()),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// The on-disk path, if this store is file-backed.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Borrow the underlying connection for queries and transactions.
    #[must_use]
    pub const fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Serialize the full store to a SQLite image.
    ///
    /// Uses the backup API into a scratch file so the image is a consistent
    /// point-in-time copy even for in-memory stores.
    pub fn to_bytes(&self, scratch: &Path) -> CoreResult<Vec<u8>> {
        if scratch.exists() {
            std::fs::remove_file(scratch).with_context(|| {
                format!("failed to clear scratch file: {}", scratch.display())
            })?;
        }
        {
            let mut dst = Connection::open(scratch)
                .with_context(|| format!("failed to open scratch store: {}", scratch.display()))?;
            let backup =
                Backup::new(&self.conn, &mut dst).context("failed to start store backup")?;
            backup
                .run_to_completion(64, Duration::from_millis(0), None)
                .context("failed to run store backup")?;
        }
        let bytes = std::fs::read(scratch)
            .with_context(|| format!("failed to read scratch store: {}", scratch.display()))?;
        let _ = std::fs::remove_file(scratch);
        Ok(bytes)
    }

    /// Flush and close the store, returning any final error.
    pub fn close(self) -> CoreResult<()> {
        self.conn
            .close()
            .map_err(|(_, e)| e)
            .context("failed to close store")?;
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_schema() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("store.db")).unwrap();
        let count: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_to_bytes_produces_sqlite_image() {
        let dir = tempdir().unwrap();
        let store = Store::open_in_memory().unwrap();
        let bytes = store.to_bytes(&dir.path().join("scratch.db")).unwrap();
        assert!(crate::codec::is_store_image(&bytes));
    }
}
