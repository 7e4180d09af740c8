//! Sprint operations, including archival semantics.

use rusqlite::{params, OptionalExtension, Row};

use super::Store;
use crate::error::{CoreError, CoreResult};
use crate::model::{now_ts, Sprint, SprintStatus};

pub(crate) const SPRINT_COLUMNS: &str =
    "id, name, start_date, end_date, status, created_at, completed_at, archived_count";

pub(crate) fn sprint_from_row(row: &Row<'_>) -> rusqlite::Result<Sprint> {
    let status: String = row.get(4)?;
    let completed_at: Option<String> = row.get(6)?;
    Ok(Sprint {
        id: row.get(0)?,
        name: row.get(1)?,
        start_date: row.get(2)?,
        end_date: row.get(3)?,
        status: SprintStatus::parse(&status).unwrap_or_default(),
        created_at: row.get(5)?,
        completed_at: completed_at.filter(|c| !c.is_empty()),
        archived_count: row.get(7)?,
    })
}

impl Store {
    pub fn create_sprint(
        &self,
        name: &str,
        start_date: &str,
        end_date: &str,
        status: SprintStatus,
    ) -> CoreResult<Sprint> {
        self.conn().execute(
            "INSERT INTO sprints (name, start_date, end_date, status, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![name, start_date, end_date, status.as_str(), now_ts()],
        )?;
        let id = self.conn().last_insert_rowid();
        self.get_sprint(id)?.ok_or(CoreError::SprintNotFound { id })
    }

    pub fn get_sprint(&self, id: i64) -> CoreResult<Option<Sprint>> {
        let sprint = self
            .conn()
            .query_row(
                &format!("SELECT {SPRINT_COLUMNS} FROM sprints WHERE id = ?"),
                params![id],
                sprint_from_row,
            )
            .optional()?;
        Ok(sprint)
    }

    pub fn get_sprint_by_name(&self, name: &str) -> CoreResult<Option<Sprint>> {
        let sprint = self
            .conn()
            .query_row(
                &format!("SELECT {SPRINT_COLUMNS} FROM sprints WHERE name = ? ORDER BY id LIMIT 1"),
                params![name],
                sprint_from_row,
            )
            .optional()?;
        Ok(sprint)
    }

    pub fn list_sprints(&self) -> CoreResult<Vec<Sprint>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {SPRINT_COLUMNS} FROM sprints ORDER BY start_date, id"))?;
        let rows = stmt.query_map([], sprint_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn set_sprint_status(&self, id: i64, status: SprintStatus) -> CoreResult<Sprint> {
        let changed = self.conn().execute(
            "UPDATE sprints SET status = ? WHERE id = ?",
            params![status.as_str(), id],
        )?;
        if changed == 0 {
            return Err(CoreError::SprintNotFound { id });
        }
        self.get_sprint(id)?.ok_or(CoreError::SprintNotFound { id })
    }

    /// Complete a sprint: archive its done tasks, stamp `completed_at`, and
    /// record how many tasks were archived. One transaction; a failure
    /// anywhere leaves both tables untouched.
    pub fn complete_sprint(&self, id: i64) -> CoreResult<Sprint> {
        if self.get_sprint(id)?.is_none() {
            return Err(CoreError::SprintNotFound { id });
        }
        let now = now_ts();
        let tx = self.conn().unchecked_transaction()?;
        let archived = tx.execute(
            "UPDATE tasks SET is_archived = 1, updated_at = ?
             WHERE sprint_id = ? AND status = 'done' AND is_archived = 0",
            params![now, id],
        )?;
        tx.execute(
            "UPDATE sprints SET status = 'completed', completed_at = ?, archived_count = ?
             WHERE id = ?",
            params![now, archived as i64, id],
        )?;
        tx.commit()?;
        self.get_sprint(id)?.ok_or(CoreError::SprintNotFound { id })
    }

    pub fn delete_sprint(&self, id: i64) -> CoreResult<()> {
        if self.get_sprint(id)?.is_none() {
            return Err(CoreError::SprintNotFound { id });
        }
        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "UPDATE tasks SET sprint_id = NULL, updated_at = ? WHERE sprint_id = ?",
            params![now_ts(), id],
        )?;
        tx.execute("DELETE FROM sprints WHERE id = ?", params![id])?;
        tx.commit()?;
        Ok(())
    }
}
