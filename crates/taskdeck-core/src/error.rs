//! Typed error types for the taskdeck core.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the taskdeck persistence and reconciliation core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An operation was invoked before the store handle finished initializing.
    #[error("store is not initialized")]
    NotInitialized,

    /// A schema migration failed for a reason other than "already applied".
    #[error("schema migration '{name}' failed: {reason}")]
    SchemaMigration { name: String, reason: String },

    /// Raw data exists under a storage key but no known decoder accepts it.
    ///
    /// This is surfaced instead of silently starting from an empty store,
    /// which would discard user data.
    #[error("stored data under '{key}' is unreadable by every known decoder")]
    UnreadableStore { key: String },

    /// A durable-storage write would exceed the storage quota.
    ///
    /// Raised before the write; the stored value is unchanged.
    #[error("storage capacity exceeded: {needed} bytes needed, capacity is {capacity}")]
    CapacityExceeded { needed: usize, capacity: usize },

    /// A snapshot document failed validation (missing required header fields,
    /// or no parseable content at all).
    #[error("malformed snapshot: {reason}")]
    MalformedSnapshot { reason: String },

    /// A task was not found.
    #[error("task not found: {id}")]
    TaskNotFound { id: i64 },

    /// A project was not found.
    #[error("project not found: {name}")]
    ProjectNotFound { name: String },

    /// An assignee was not found.
    #[error("assignee not found: {id}")]
    AssigneeNotFound { id: i64 },

    /// A sprint was not found.
    #[error("sprint not found: {id}")]
    SprintNotFound { id: i64 },

    /// An underlying database error.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// An internal storage or I/O error.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
