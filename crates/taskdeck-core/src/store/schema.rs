//! Schema lifecycle: versioned migrations and the column cache.
//!
//! Migrations are an explicit, ordered list checked against the store's
//! `user_version` marker, so migration state is inspectable rather than
//! inferred from error-string matching. Every migration is idempotent;
//! column adds treat "duplicate column" as success. A column add that fails
//! for any other reason degrades that column only and never aborts startup
//! of unrelated tables.

use rusqlite::Connection;
use tracing::{debug, warn};

use super::Store;
use crate::error::{CoreError, CoreResult};

struct Migration {
    version: i64,
    name: &'static str,
    apply: fn(&Store) -> CoreResult<()>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "baseline",
        apply: apply_baseline,
    },
    Migration {
        version: 2,
        name: "tasks-updated-at",
        apply: |s| s.add_column_if_missing("tasks", "updated_at", "TEXT NOT NULL DEFAULT ''"),
    },
    Migration {
        version: 3,
        name: "tasks-end-date",
        apply: |s| s.add_column_if_missing("tasks", "end_date", "TEXT"),
    },
    Migration {
        version: 4,
        name: "tasks-sprint-id",
        apply: |s| s.add_column_if_missing("tasks", "sprint_id", "INTEGER"),
    },
    Migration {
        version: 5,
        name: "tasks-is-archived",
        apply: |s| s.add_column_if_missing("tasks", "is_archived", "INTEGER NOT NULL DEFAULT 0"),
    },
    Migration {
        version: 6,
        name: "assignees-discord-id",
        apply: |s| s.add_column_if_missing("assignees", "discord_id", "TEXT"),
    },
    Migration {
        version: 7,
        name: "sprints-completion",
        apply: |s| {
            s.add_column_if_missing("sprints", "completed_at", "TEXT")?;
            s.add_column_if_missing("sprints", "archived_count", "INTEGER")
        },
    },
];

/// Latest schema version; `ensure_schema` brings every store up to this.
pub const SCHEMA_VERSION: i64 = 7;

fn apply_baseline(store: &Store) -> CoreResult<()> {
    store.conn().execute_batch(
        "CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            project TEXT NOT NULL DEFAULT '',
            duration_minutes INTEGER NOT NULL DEFAULT 0,
            date TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'todo',
            category TEXT NOT NULL DEFAULT 'general',
            notes TEXT NOT NULL DEFAULT '',
            assignee_id INTEGER,
            created_at TEXT NOT NULL DEFAULT ''
        );
        CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            repo_url TEXT,
            created_at TEXT NOT NULL DEFAULT ''
        );
        CREATE TABLE IF NOT EXISTS assignees (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            color TEXT NOT NULL DEFAULT '#8888aa',
            created_at TEXT NOT NULL DEFAULT ''
        );
        CREATE TABLE IF NOT EXISTS sprints (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            start_date TEXT NOT NULL DEFAULT '',
            end_date TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'planned',
            created_at TEXT NOT NULL DEFAULT ''
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_assignee ON tasks (assignee_id);
        CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks (project);",
    )?;
    Ok(())
}

impl Store {
    /// Bring the physical schema up to date, tolerating stores created by
    /// older schema versions.
    pub fn ensure_schema(&self) -> CoreResult<()> {
        let current: i64 = self
            .conn()
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        for migration in MIGRATIONS {
            if migration.version <= current {
                continue;
            }
            debug!(
                version = migration.version,
                name = migration.name,
                "applying schema migration"
            );
            (migration.apply)(self).map_err(|e| CoreError::SchemaMigration {
                name: migration.name.to_string(),
                reason: e.to_string(),
            })?;
            self.conn()
                .pragma_update(None, "user_version", migration.version)?;
        }
        Ok(())
    }

    /// Whether `table.column` exists, answered from the session cache after
    /// the first successful verification.
    pub(crate) fn has_column(&self, table: &str, column: &str) -> CoreResult<bool> {
        let key = format!("{table}.{column}");
        if self.verified_columns.borrow().contains(&key) {
            return Ok(true);
        }
        let present = column_exists(self.conn(), table, column)?;
        if present {
            self.verified_columns.borrow_mut().insert(key);
        }
        Ok(present)
    }

    /// Drop the cached verification for `table.column`.
    ///
    /// Called when a write fails referencing the column, so the next check
    /// goes back to the database instead of trusting a stale answer.
    pub(crate) fn invalidate_column(&self, table: &str, column: &str) {
        self.verified_columns
            .borrow_mut()
            .remove(&format!("{table}.{column}"));
    }

    /// Self-healing path: invalidate the cache, re-attempt the add, and
    /// report whether the column is now usable.
    pub(crate) fn heal_column(&self, table: &str, column: &str, decl: &str) -> CoreResult<bool> {
        self.invalidate_column(table, column);
        self.add_column_if_missing(table, column, decl)?;
        self.has_column(table, column)
    }

    /// Additive column migration. "Duplicate column" counts as success; any
    /// other failure is logged and degrades this column without failing the
    /// caller.
    pub(crate) fn add_column_if_missing(
        &self,
        table: &str,
        column: &str,
        decl: &str,
    ) -> CoreResult<()> {
        if column_exists(self.conn(), table, column)? {
            self.verified_columns
                .borrow_mut()
                .insert(format!("{table}.{column}"));
            return Ok(());
        }
        let sql = format!("ALTER TABLE {table} ADD COLUMN {column} {decl}");
        match self.conn().execute(&sql, []) {
            Ok(_) => {
                self.verified_columns
                    .borrow_mut()
                    .insert(format!("{table}.{column}"));
                Ok(())
            }
            Err(e) if e.to_string().contains("duplicate column") => {
                self.verified_columns
                    .borrow_mut()
                    .insert(format!("{table}.{column}"));
                Ok(())
            }
            Err(e) => {
                warn!(
                    table,
                    column,
                    error = %e,
                    "column migration failed; operating without this column"
                );
                Ok(())
            }
        }
    }
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> CoreResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        rusqlite::params![table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
