//! Assignee operations.
//!
//! Deleting an assignee must never cascade to tasks: referencing rows get
//! `assignee_id` nulled out first, inside the same transaction.

use rusqlite::{params, OptionalExtension, Row};

use super::Store;
use crate::error::{CoreError, CoreResult};
use crate::model::{now_ts, Assignee, DEFAULT_ASSIGNEE_COLOR};

pub(crate) const ASSIGNEE_COLUMNS: &str = "id, name, color, discord_id, created_at";

pub(crate) fn assignee_from_row(row: &Row<'_>) -> rusqlite::Result<Assignee> {
    let discord_id: Option<String> = row.get(3)?;
    Ok(Assignee {
        id: row.get(0)?,
        name: row.get(1)?,
        color: row.get(2)?,
        discord_id: discord_id.filter(|d| !d.is_empty()),
        created_at: row.get(4)?,
    })
}

impl Store {
    pub fn create_assignee(
        &self,
        name: &str,
        color: Option<&str>,
        discord_id: Option<&str>,
    ) -> CoreResult<Assignee> {
        let color = color
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(DEFAULT_ASSIGNEE_COLOR);
        self.conn().execute(
            "INSERT INTO assignees (name, color, discord_id, created_at) VALUES (?, ?, ?, ?)",
            params![name, color, discord_id, now_ts()],
        )?;
        let id = self.conn().last_insert_rowid();
        self.get_assignee(id)?
            .ok_or(CoreError::AssigneeNotFound { id })
    }

    pub fn get_assignee(&self, id: i64) -> CoreResult<Option<Assignee>> {
        let assignee = self
            .conn()
            .query_row(
                &format!("SELECT {ASSIGNEE_COLUMNS} FROM assignees WHERE id = ?"),
                params![id],
                assignee_from_row,
            )
            .optional()?;
        Ok(assignee)
    }

    pub fn get_assignee_by_name(&self, name: &str) -> CoreResult<Option<Assignee>> {
        let assignee = self
            .conn()
            .query_row(
                &format!("SELECT {ASSIGNEE_COLUMNS} FROM assignees WHERE name = ? ORDER BY id LIMIT 1"),
                params![name],
                assignee_from_row,
            )
            .optional()?;
        Ok(assignee)
    }

    pub fn list_assignees(&self) -> CoreResult<Vec<Assignee>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {ASSIGNEE_COLUMNS} FROM assignees ORDER BY name"))?;
        let rows = stmt.query_map([], assignee_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Delete an assignee, nulling `assignee_id` on every referencing task.
    pub fn delete_assignee(&self, id: i64) -> CoreResult<()> {
        if self.get_assignee(id)?.is_none() {
            return Err(CoreError::AssigneeNotFound { id });
        }
        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "UPDATE tasks SET assignee_id = NULL, updated_at = ? WHERE assignee_id = ?",
            params![now_ts(), id],
        )?;
        tx.execute("DELETE FROM assignees WHERE id = ?", params![id])?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewTask;

    #[test]
    fn test_create_applies_default_color() {
        let store = Store::open_in_memory().unwrap();
        let a = store.create_assignee("ada", None, None).unwrap();
        assert_eq!(a.color, DEFAULT_ASSIGNEE_COLOR);
    }

    #[test]
    fn test_delete_nulls_task_references() {
        let store = Store::open_in_memory().unwrap();
        let a = store.create_assignee("ada", Some("#ff0000"), None).unwrap();

        let mut ids = Vec::new();
        for i in 0..3 {
            let t = store
                .create_task(NewTask {
                    title: format!("task {i}"),
                    assignee_id: Some(a.id),
                    date: "2026-03-01".to_string(),
                    ..NewTask::default()
                })
                .unwrap();
            ids.push(t.id);
        }

        store.delete_assignee(a.id).unwrap();

        assert!(store.get_assignee(a.id).unwrap().is_none());
        for id in ids {
            let t = store.get_task(id).unwrap().unwrap();
            assert_eq!(t.assignee_id, None, "task {id} must survive unassigned");
        }
    }

    #[test]
    fn test_delete_missing_assignee_errors() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.delete_assignee(9),
            Err(CoreError::AssigneeNotFound { id: 9 })
        ));
    }
}
