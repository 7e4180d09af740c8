//! Task operations.

use rusqlite::{params, OptionalExtension, Row};

use super::Store;
use crate::error::{CoreError, CoreResult};
use crate::model::{now_ts, NewTask, Task, TaskStatus, DEFAULT_CATEGORY};

/// Column list shared by every task SELECT so row mapping stays in one place.
pub(crate) const TASK_COLUMNS: &str = "id, title, project, duration_minutes, date, status, \
     category, notes, assignee_id, sprint_id, is_archived, created_at, updated_at, end_date";

pub(crate) fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status: String = row.get(5)?;
    let is_archived: i64 = row.get(10)?;
    let end_date: Option<String> = row.get(13)?;
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        project: row.get(2)?,
        duration_minutes: row.get(3)?,
        date: row.get(4)?,
        status: TaskStatus::parse(&status).unwrap_or_default(),
        category: row.get(6)?,
        notes: row.get(7)?,
        assignee_id: row.get(8)?,
        sprint_id: row.get(9)?,
        is_archived: is_archived != 0,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
        end_date: end_date.filter(|d| !d.is_empty()),
    })
}

impl Store {
    /// Create a task, stamping `created_at` and `updated_at` to now.
    pub fn create_task(&self, new: NewTask) -> CoreResult<Task> {
        let now = now_ts();
        let category = new
            .category
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
        self.conn().execute(
            "INSERT INTO tasks (
                title, project, duration_minutes, date, status, category, notes,
                assignee_id, sprint_id, is_archived, created_at, updated_at, end_date
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)",
            params![
                new.title,
                new.project,
                new.duration_minutes.max(0),
                new.date,
                new.status.as_str(),
                category,
                new.notes,
                new.assignee_id,
                new.sprint_id,
                now,
                now,
                new.end_date,
            ],
        )?;
        let id = self.conn().last_insert_rowid();
        self.get_task(id)?.ok_or(CoreError::TaskNotFound { id })
    }

    /// Fetch a single task.
    pub fn get_task(&self, id: i64) -> CoreResult<Option<Task>> {
        let task = self
            .conn()
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"),
                params![id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    /// List tasks, optionally including archived rows.
    pub fn list_tasks(&self, include_archived: bool) -> CoreResult<Vec<Task>> {
        let sql = if include_archived {
            format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY id")
        } else {
            format!("SELECT {TASK_COLUMNS} FROM tasks WHERE is_archived = 0 ORDER BY id")
        };
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map([], task_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Write every mutable field of `task` back, advancing `updated_at`.
    ///
    /// Old stores may predate the `updated_at` column; the write then
    /// succeeds without touching it and the schema manager re-attempts the
    /// column add afterwards.
    pub fn update_task(&self, task: &Task) -> CoreResult<Task> {
        let now = now_ts();
        if self.has_column("tasks", "updated_at")? {
            let result = self.conn().execute(
                "UPDATE tasks SET
                    title = ?, project = ?, duration_minutes = ?, date = ?, status = ?,
                    category = ?, notes = ?, assignee_id = ?, sprint_id = ?,
                    is_archived = ?, end_date = ?, updated_at = ?
                 WHERE id = ?",
                params![
                    task.title,
                    task.project,
                    task.duration_minutes.max(0),
                    task.date,
                    task.status.as_str(),
                    task.category,
                    task.notes,
                    task.assignee_id,
                    task.sprint_id,
                    i64::from(task.is_archived),
                    task.end_date,
                    now,
                    task.id,
                ],
            );
            match result {
                Ok(0) => return Err(CoreError::TaskNotFound { id: task.id }),
                Ok(_) => {
                    return self
                        .get_task(task.id)?
                        .ok_or(CoreError::TaskNotFound { id: task.id })
                }
                Err(e) if e.to_string().contains("no such column: updated_at") => {
                    // The cache lied; fall through to the degraded write.
                    self.invalidate_column("tasks", "updated_at");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let changed = self.conn().execute(
            "UPDATE tasks SET
                title = ?, project = ?, duration_minutes = ?, date = ?, status = ?,
                category = ?, notes = ?, assignee_id = ?, sprint_id = ?,
                is_archived = ?, end_date = ?
             WHERE id = ?",
            params![
                task.title,
                task.project,
                task.duration_minutes.max(0),
                task.date,
                task.status.as_str(),
                task.category,
                task.notes,
                task.assignee_id,
                task.sprint_id,
                i64::from(task.is_archived),
                task.end_date,
                task.id,
            ],
        )?;
        if changed == 0 {
            return Err(CoreError::TaskNotFound { id: task.id });
        }
        self.heal_column("tasks", "updated_at", "TEXT NOT NULL DEFAULT ''")?;
        self.get_task(task.id)?
            .ok_or(CoreError::TaskNotFound { id: task.id })
    }

    /// Set just the status of a task.
    pub fn set_task_status(&self, id: i64, status: TaskStatus) -> CoreResult<Task> {
        let mut task = self.get_task(id)?.ok_or(CoreError::TaskNotFound { id })?;
        task.status = status;
        self.update_task(&task)
    }

    /// Delete a task.
    pub fn delete_task(&self, id: i64) -> CoreResult<()> {
        let changed = self
            .conn()
            .execute("DELETE FROM tasks WHERE id = ?", params![id])?;
        if changed == 0 {
            return Err(CoreError::TaskNotFound { id });
        }
        Ok(())
    }

    /// Archive every done, unarchived task in a sprint; returns the count.
    ///
    /// Tasks in the sprint that are not done are left for the caller to
    /// relocate.
    pub fn archive_sprint_tasks(&self, sprint_id: i64) -> CoreResult<usize> {
        let now = now_ts();
        let changed = self.conn().execute(
            "UPDATE tasks SET is_archived = 1, updated_at = ?
             WHERE sprint_id = ? AND status = 'done' AND is_archived = 0",
            params![now, sprint_id],
        )?;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SprintStatus;

    fn task(title: &str) -> NewTask {
        NewTask {
            title: title.to_string(),
            project: "deck".to_string(),
            date: "2026-03-01".to_string(),
            ..NewTask::default()
        }
    }

    #[test]
    fn test_create_and_get() {
        let store = Store::open_in_memory().unwrap();
        let created = store.create_task(task("write schema")).unwrap();
        assert_eq!(created.category, DEFAULT_CATEGORY);
        assert!(!created.created_at.is_empty());
        assert_eq!(created.created_at, created.updated_at);

        let fetched = store.get_task(created.id).unwrap().unwrap();
        assert_eq!(fetched, created);
    }

    #[test]
    fn test_update_advances_updated_at() {
        let store = Store::open_in_memory().unwrap();
        let mut t = store.create_task(task("first")).unwrap();
        t.title = "second".to_string();
        t.status = TaskStatus::InProgress;
        let updated = store.update_task(&t).unwrap();
        assert_eq!(updated.title, "second");
        assert_eq!(updated.status, TaskStatus::InProgress);
        assert!(crate::model::ts_at_least(
            &updated.updated_at,
            &t.created_at
        ));
        assert_ne!(updated.updated_at, t.created_at);
    }

    #[test]
    fn test_update_survives_missing_updated_at_column() {
        // Store created by the original schema, before updated_at existed.
        let store = Store::open_in_memory().unwrap();
        let t = store.create_task(task("legacy")).unwrap();
        store
            .conn()
            .execute_batch("ALTER TABLE tasks DROP COLUMN updated_at")
            .unwrap();
        store.invalidate_column("tasks", "updated_at");

        let mut changed = t.clone();
        changed.notes = "still works".to_string();
        let after = store.update_task(&changed).unwrap();
        assert_eq!(after.notes, "still works");
        // The schema manager healed the column during the write.
        assert!(store.has_column("tasks", "updated_at").unwrap());
    }

    #[test]
    fn test_delete_missing_task_errors() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.delete_task(42),
            Err(CoreError::TaskNotFound { id: 42 })
        ));
    }

    #[test]
    fn test_archive_sprint_tasks_only_done_unarchived() {
        let store = Store::open_in_memory().unwrap();
        let sprint = store
            .create_sprint("S1", "2026-03-01", "2026-03-14", SprintStatus::Active)
            .unwrap();

        let mut done = store.create_task(task("done")).unwrap();
        done.sprint_id = Some(sprint.id);
        done.status = TaskStatus::Done;
        store.update_task(&done).unwrap();

        let mut open = store.create_task(task("open")).unwrap();
        open.sprint_id = Some(sprint.id);
        store.update_task(&open).unwrap();

        let mut already = store.create_task(task("already archived")).unwrap();
        already.sprint_id = Some(sprint.id);
        already.status = TaskStatus::Done;
        already.is_archived = true;
        store.update_task(&already).unwrap();

        assert_eq!(store.archive_sprint_tasks(sprint.id).unwrap(), 1);
        assert!(store.get_task(done.id).unwrap().unwrap().is_archived);
        assert!(!store.get_task(open.id).unwrap().unwrap().is_archived);
    }
}
