//! Project operations.
//!
//! Tasks reference projects by denormalized name text, so rename and delete
//! both touch the tasks table inside one transaction.

use rusqlite::{params, OptionalExtension, Row};

use super::Store;
use crate::error::{CoreError, CoreResult};
use crate::model::{now_ts, Project};

pub(crate) const PROJECT_COLUMNS: &str = "id, name, repo_url, created_at";

pub(crate) fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    let repo_url: Option<String> = row.get(2)?;
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        repo_url: repo_url.filter(|u| !u.is_empty()),
        created_at: row.get(3)?,
    })
}

impl Store {
    /// Create a project. `name` must be unique.
    pub fn create_project(&self, name: &str, repo_url: Option<&str>) -> CoreResult<Project> {
        self.conn().execute(
            "INSERT INTO projects (name, repo_url, created_at) VALUES (?, ?, ?)",
            params![name, repo_url, now_ts()],
        )?;
        let id = self.conn().last_insert_rowid();
        self.get_project(id)?.ok_or(CoreError::ProjectNotFound {
            name: name.to_string(),
        })
    }

    pub fn get_project(&self, id: i64) -> CoreResult<Option<Project>> {
        let project = self
            .conn()
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?"),
                params![id],
                project_from_row,
            )
            .optional()?;
        Ok(project)
    }

    pub fn get_project_by_name(&self, name: &str) -> CoreResult<Option<Project>> {
        let project = self
            .conn()
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE name = ?"),
                params![name],
                project_from_row,
            )
            .optional()?;
        Ok(project)
    }

    pub fn list_projects(&self) -> CoreResult<Vec<Project>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {PROJECT_COLUMNS} FROM projects ORDER BY name"))?;
        let rows = stmt.query_map([], project_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Rename a project, propagating the new name to every task whose
    /// denormalized `project` text equals the old name.
    pub fn rename_project(&self, id: i64, new_name: &str) -> CoreResult<Project> {
        let old = self.get_project(id)?.ok_or(CoreError::ProjectNotFound {
            name: format!("#{id}"),
        })?;

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "UPDATE projects SET name = ? WHERE id = ?",
            params![new_name, id],
        )?;
        tx.execute(
            "UPDATE tasks SET project = ?, updated_at = ? WHERE project = ?",
            params![new_name, now_ts(), old.name],
        )?;
        tx.commit()?;

        self.get_project(id)?.ok_or(CoreError::ProjectNotFound {
            name: new_name.to_string(),
        })
    }

    /// Delete a project, blanking the `project` field on referencing tasks
    /// first. Task rows themselves are never deleted.
    pub fn delete_project(&self, id: i64) -> CoreResult<()> {
        let project = self.get_project(id)?.ok_or(CoreError::ProjectNotFound {
            name: format!("#{id}"),
        })?;

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "UPDATE tasks SET project = '', updated_at = ? WHERE project = ?",
            params![now_ts(), project.name],
        )?;
        tx.execute("DELETE FROM projects WHERE id = ?", params![id])?;
        tx.commit()?;
        Ok(())
    }
}
