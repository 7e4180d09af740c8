//! Merge engine: reconcile an incoming snapshot against the local store.
//!
//! Reconciliation is additive, never destructive: rows present locally but
//! absent from the snapshot are left alone (their count is observable for
//! diagnostics). Per-entity passes run in dependency order (projects,
//! assignees, and sprints before tasks, since tasks reference them) and the
//! whole merge is one transaction: a transaction-level failure rolls back
//! everything, while an individual bad row is skipped, logged, and counted.
//!
//! Conflict rule: a row with matching identity is updated only when its
//! significant fields differ AND the incoming row's `created_at` (the logical
//! write timestamp; there is no separate revision counter) is at least the
//! local row's `updated_at`. Equal timestamps with differing content favor
//! the incoming side, so both devices converge on the same value. Wall-clock
//! timestamps mean skewed clocks can pick the wrong winner; that limitation
//! is inherited deliberately.

use std::collections::HashMap;

use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::CoreResult;
use crate::model::{now_ts, ts_at_least, Assignee, Project, Sprint, Task, DEFAULT_ASSIGNEE_COLOR, DEFAULT_CATEGORY};
use crate::snapshot::{Snapshot, SnapshotAssignee, SnapshotProject, SnapshotSprint, SnapshotTask};
use crate::store::assignees::{assignee_from_row, ASSIGNEE_COLUMNS};
use crate::store::projects::{project_from_row, PROJECT_COLUMNS};
use crate::store::sprints::{sprint_from_row, SPRINT_COLUMNS};
use crate::store::tasks::{task_from_row, TASK_COLUMNS};
use crate::store::Store;

/// Counts for an entity type merged by name identity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub added: usize,
    pub updated: usize,
}

/// Counts for the task pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Rows that failed individually and were skipped.
    pub skipped: usize,
    /// Rows present locally but absent from the snapshot. Diagnostic only;
    /// merges never delete.
    pub local_only: usize,
}

/// Per-entity outcome of a merge.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub tasks: TaskCounts,
    pub projects: EntityCounts,
    pub assignees: EntityCounts,
    pub sprints: EntityCounts,
}

/// Rows written by an import (additive insert-only, no conflict handling).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportCounts {
    pub tasks: usize,
    pub projects: usize,
    pub assignees: usize,
    pub sprints: usize,
}

/// Identity maps built while merging assignees, used to remap task
/// references from the remote device's id space into ours.
#[derive(Debug, Default)]
struct AssigneeMaps {
    by_remote_id: HashMap<i64, i64>,
    by_name: HashMap<String, i64>,
}

/// Reconcile `snapshot` into `store` and report what happened.
pub fn merge_snapshot(store: &Store, snapshot: &Snapshot) -> CoreResult<MergeReport> {
    let tx = store.conn().unchecked_transaction()?;
    let mut report = MergeReport::default();

    merge_projects(&tx, &snapshot.projects, &mut report.projects)?;
    let assignee_maps = merge_assignees(&tx, &snapshot.assignees, &mut report.assignees)?;
    let sprint_map = merge_sprints(&tx, &snapshot.sprints, &mut report.sprints)?;
    merge_tasks(
        &tx,
        &snapshot.tasks,
        assignee_maps,
        &sprint_map,
        &mut report.tasks,
    )?;

    tx.commit()?;
    Ok(report)
}

/// Write snapshot rows that are not already present, by identity only.
///
/// Counts are rows written, independent of merge semantics: no timestamps
/// are compared and nothing is ever updated.
pub fn import_snapshot(store: &Store, snapshot: &Snapshot) -> CoreResult<ImportCounts> {
    let tx = store.conn().unchecked_transaction()?;
    let mut counts = ImportCounts::default();

    let mut assignee_maps = load_assignee_maps(&tx)?;
    for p in &snapshot.projects {
        if local_project_by_name(&tx, &p.name)?.is_none() {
            insert_project(&tx, p)?;
            counts.projects += 1;
        }
    }
    for a in &snapshot.assignees {
        if let Some(existing) = assignee_maps.by_name.get(&a.name) {
            if let Some(rid) = a.id {
                assignee_maps.by_remote_id.insert(rid, *existing);
            }
        } else {
            let local_id = insert_assignee(&tx, a)?;
            record_assignee(&mut assignee_maps, a, local_id);
            counts.assignees += 1;
        }
    }
    let mut sprint_map = HashMap::new();
    for s in &snapshot.sprints {
        if let Some(existing) = local_sprint_by_name(&tx, &s.name)? {
            if let Some(rid) = s.id {
                sprint_map.insert(rid, existing.id);
            }
        } else {
            let local_id = insert_sprint(&tx, s)?;
            if let Some(rid) = s.id {
                sprint_map.insert(rid, local_id);
            }
            counts.sprints += 1;
        }
    }
    for t in &snapshot.tasks {
        if let Some(id) = t.id {
            if local_task_exists(&tx, id)? {
                continue;
            }
        }
        let assignee = resolve_assignee(&tx, t, &mut assignee_maps)?;
        let sprint = resolve_sprint(&tx, t.sprint_id, &sprint_map)?;
        insert_task(&tx, t, assignee, sprint)?;
        counts.tasks += 1;
    }

    tx.commit()?;
    Ok(counts)
}

// ============================================================================
// Projects
// ============================================================================

fn merge_projects(
    conn: &Connection,
    incoming: &[SnapshotProject],
    counts: &mut EntityCounts,
) -> CoreResult<()> {
    let mut local: HashMap<String, Project> = {
        let mut stmt = conn.prepare(&format!("SELECT {PROJECT_COLUMNS} FROM projects"))?;
        let rows = stmt.query_map([], project_from_row)?;
        rows.map(|r| r.map(|p| (p.name.clone(), p)))
            .collect::<Result<_, _>>()?
    };

    for p in incoming {
        if p.name.trim().is_empty() {
            continue;
        }
        match local.remove(&p.name) {
            Some(existing) => {
                let differs = existing.repo_url != p.repo_url;
                let incoming_ts = p.created_at.as_deref().unwrap_or("");
                if differs && ts_at_least(incoming_ts, &existing.created_at) {
                    conn.execute(
                        "UPDATE projects SET repo_url = ? WHERE id = ?",
                        params![p.repo_url, existing.id],
                    )?;
                    counts.updated += 1;
                }
            }
            None => {
                insert_project(conn, p)?;
                counts.added += 1;
            }
        }
    }
    Ok(())
}

fn insert_project(conn: &Connection, p: &SnapshotProject) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO projects (name, repo_url, created_at) VALUES (?, ?, ?)",
        params![
            p.name,
            p.repo_url,
            p.created_at.clone().unwrap_or_else(now_ts)
        ],
    )?;
    Ok(())
}

fn local_project_by_name(conn: &Connection, name: &str) -> CoreResult<Option<Project>> {
    use rusqlite::OptionalExtension;
    let project = conn
        .query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE name = ?"),
            params![name],
            project_from_row,
        )
        .optional()?;
    Ok(project)
}

// ============================================================================
// Assignees
// ============================================================================

fn load_assignee_maps(conn: &Connection) -> CoreResult<AssigneeMaps> {
    let mut maps = AssigneeMaps::default();
    let mut stmt = conn.prepare(&format!("SELECT {ASSIGNEE_COLUMNS} FROM assignees"))?;
    let rows = stmt.query_map([], assignee_from_row)?;
    for row in rows {
        let a: Assignee = row?;
        maps.by_name.entry(a.name.clone()).or_insert(a.id);
    }
    Ok(maps)
}

fn record_assignee(maps: &mut AssigneeMaps, incoming: &SnapshotAssignee, local_id: i64) {
    maps.by_name.entry(incoming.name.clone()).or_insert(local_id);
    if let Some(rid) = incoming.id {
        maps.by_remote_id.insert(rid, local_id);
    }
}

fn merge_assignees(
    conn: &Connection,
    incoming: &[SnapshotAssignee],
    counts: &mut EntityCounts,
) -> CoreResult<AssigneeMaps> {
    let mut maps = load_assignee_maps(conn)?;

    let locals: Vec<Assignee> = {
        let mut stmt = conn.prepare(&format!("SELECT {ASSIGNEE_COLUMNS} FROM assignees"))?;
        let rows = stmt.query_map([], assignee_from_row)?;
        rows.collect::<Result<_, _>>()?
    };
    let by_name: HashMap<String, Assignee> =
        locals.into_iter().map(|a| (a.name.clone(), a)).collect();

    for a in incoming {
        if a.name.trim().is_empty() {
            continue;
        }
        if let Some(existing) = by_name.get(&a.name) {
            record_assignee(&mut maps, a, existing.id);
            let incoming_color = if a.color.is_empty() {
                existing.color.clone()
            } else {
                a.color.clone()
            };
            let differs =
                existing.color != incoming_color || existing.discord_id != a.discord_id;
            let incoming_ts = a.created_at.as_deref().unwrap_or("");
            if differs && ts_at_least(incoming_ts, &existing.created_at) {
                conn.execute(
                    "UPDATE assignees SET color = ?, discord_id = ? WHERE id = ?",
                    params![incoming_color, a.discord_id, existing.id],
                )?;
                counts.updated += 1;
            }
        } else {
            let local_id = insert_assignee(conn, a)?;
            record_assignee(&mut maps, a, local_id);
            counts.added += 1;
        }
    }
    Ok(maps)
}

fn insert_assignee(conn: &Connection, a: &SnapshotAssignee) -> CoreResult<i64> {
    let color = if a.color.is_empty() {
        DEFAULT_ASSIGNEE_COLOR
    } else {
        a.color.as_str()
    };
    conn.execute(
        "INSERT INTO assignees (name, color, discord_id, created_at) VALUES (?, ?, ?, ?)",
        params![
            a.name,
            color,
            a.discord_id,
            a.created_at.clone().unwrap_or_else(now_ts)
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

// ============================================================================
// Sprints
// ============================================================================

fn merge_sprints(
    conn: &Connection,
    incoming: &[SnapshotSprint],
    counts: &mut EntityCounts,
) -> CoreResult<HashMap<i64, i64>> {
    let locals: Vec<Sprint> = {
        let mut stmt = conn.prepare(&format!("SELECT {SPRINT_COLUMNS} FROM sprints"))?;
        let rows = stmt.query_map([], sprint_from_row)?;
        rows.collect::<Result<_, _>>()?
    };
    let by_name: HashMap<String, Sprint> =
        locals.into_iter().map(|s| (s.name.clone(), s)).collect();

    let mut remote_to_local = HashMap::new();
    for s in incoming {
        if s.name.trim().is_empty() {
            continue;
        }
        if let Some(existing) = by_name.get(&s.name) {
            if let Some(rid) = s.id {
                remote_to_local.insert(rid, existing.id);
            }
            let differs = existing.start_date != s.start_date
                || existing.end_date != s.end_date
                || existing.status != s.status;
            let incoming_ts = s.created_at.as_deref().unwrap_or("");
            if differs && ts_at_least(incoming_ts, &existing.created_at) {
                conn.execute(
                    "UPDATE sprints SET start_date = ?, end_date = ?, status = ? WHERE id = ?",
                    params![s.start_date, s.end_date, s.status.as_str(), existing.id],
                )?;
                counts.updated += 1;
            }
        } else {
            let local_id = insert_sprint(conn, s)?;
            if let Some(rid) = s.id {
                remote_to_local.insert(rid, local_id);
            }
            counts.added += 1;
        }
    }
    Ok(remote_to_local)
}

fn insert_sprint(conn: &Connection, s: &SnapshotSprint) -> CoreResult<i64> {
    conn.execute(
        "INSERT INTO sprints (name, start_date, end_date, status, created_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
            s.name,
            s.start_date,
            s.end_date,
            s.status.as_str(),
            s.created_at.clone().unwrap_or_else(now_ts)
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn local_sprint_by_name(conn: &Connection, name: &str) -> CoreResult<Option<Sprint>> {
    use rusqlite::OptionalExtension;
    let sprint = conn
        .query_row(
            &format!("SELECT {SPRINT_COLUMNS} FROM sprints WHERE name = ? ORDER BY id LIMIT 1"),
            params![name],
            sprint_from_row,
        )
        .optional()?;
    Ok(sprint)
}

// ============================================================================
// Tasks
// ============================================================================

fn local_task_exists(conn: &Connection, id: i64) -> CoreResult<bool> {
    use rusqlite::OptionalExtension;
    let found: Option<i64> = conn
        .query_row("SELECT id FROM tasks WHERE id = ?", params![id], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

fn merge_tasks(
    conn: &Connection,
    incoming: &[SnapshotTask],
    // Keeps growing as the pass creates assignees on the fly.
    mut assignee_maps: AssigneeMaps,
    sprint_map: &HashMap<i64, i64>,
    counts: &mut TaskCounts,
) -> CoreResult<()> {
    let mut local: HashMap<i64, Task> = {
        let mut stmt = conn.prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks"))?;
        let rows = stmt.query_map([], task_from_row)?;
        rows.map(|r| r.map(|t| (t.id, t)))
            .collect::<Result<_, _>>()?
    };

    for t in incoming {
        let matched = t.id.and_then(|id| local.remove(&id));
        let outcome = merge_one_task(conn, t, matched, &mut assignee_maps, sprint_map);
        match outcome {
            Ok(RowOutcome::Added) => counts.added += 1,
            Ok(RowOutcome::Updated) => counts.updated += 1,
            Ok(RowOutcome::Unchanged) => counts.unchanged += 1,
            Err(e) => {
                warn!(task = %t.title, error = %e, "skipping unmergeable task row");
                counts.skipped += 1;
            }
        }
    }

    counts.local_only = local.len();
    if counts.local_only > 0 {
        debug!(
            count = counts.local_only,
            "tasks present locally but absent from the snapshot (kept)"
        );
    }
    Ok(())
}

enum RowOutcome {
    Added,
    Updated,
    Unchanged,
}

fn merge_one_task(
    conn: &Connection,
    incoming: &SnapshotTask,
    matched: Option<Task>,
    assignee_maps: &mut AssigneeMaps,
    sprint_map: &HashMap<i64, i64>,
) -> CoreResult<RowOutcome> {
    let assignee = resolve_assignee(conn, incoming, assignee_maps)?;
    let sprint = resolve_sprint(conn, incoming.sprint_id, sprint_map)?;

    let Some(local) = matched else {
        insert_task(conn, incoming, assignee, sprint)?;
        return Ok(RowOutcome::Added);
    };

    let differs = local.title != incoming.title
        || local.status != incoming.status
        || local.project != incoming.project
        || local.notes != incoming.notes
        || local.sprint_id != sprint
        || local.is_archived != incoming.is_archived
        || local.end_date != incoming.end_date;
    if !differs {
        return Ok(RowOutcome::Unchanged);
    }

    // `>=`: equal timestamps with differing content take the incoming side,
    // favoring convergence over local precedence.
    let incoming_ts = incoming.created_at.as_deref().unwrap_or("");
    if !ts_at_least(incoming_ts, &local.updated_at) {
        return Ok(RowOutcome::Unchanged);
    }

    let updated_at = incoming
        .updated_at
        .clone()
        .or_else(|| incoming.created_at.clone())
        .unwrap_or_else(now_ts);
    conn.execute(
        "UPDATE tasks SET
            title = ?, project = ?, duration_minutes = ?, date = ?, status = ?,
            category = ?, notes = ?, assignee_id = ?, sprint_id = ?,
            is_archived = ?, end_date = ?, updated_at = ?
         WHERE id = ?",
        params![
            incoming.title,
            incoming.project,
            incoming.duration_minutes.max(0),
            incoming.date,
            incoming.status.as_str(),
            category_or_default(&incoming.category),
            incoming.notes,
            assignee,
            sprint,
            i64::from(incoming.is_archived),
            incoming.end_date,
            updated_at,
            local.id,
        ],
    )?;
    Ok(RowOutcome::Updated)
}

fn insert_task(
    conn: &Connection,
    t: &SnapshotTask,
    assignee: Option<i64>,
    sprint: Option<i64>,
) -> CoreResult<()> {
    let created_at = t.created_at.clone().unwrap_or_else(now_ts);
    let updated_at = t.updated_at.clone().unwrap_or_else(|| created_at.clone());
    conn.execute(
        "INSERT INTO tasks (
            id, title, project, duration_minutes, date, status, category, notes,
            assignee_id, sprint_id, is_archived, created_at, updated_at, end_date
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            t.id,
            t.title,
            t.project,
            t.duration_minutes.max(0),
            t.date,
            t.status.as_str(),
            category_or_default(&t.category),
            t.notes,
            assignee,
            sprint,
            i64::from(t.is_archived),
            created_at,
            updated_at,
            t.end_date,
        ],
    )?;
    Ok(())
}

fn category_or_default(category: &str) -> &str {
    if category.trim().is_empty() {
        DEFAULT_CATEGORY
    } else {
        category
    }
}

/// Resolve a task's assignee reference into a local id.
///
/// The human-readable name wins over the remote numeric id, since id spaces
/// differ across devices. An unknown name creates a new assignee on the fly.
fn resolve_assignee(
    conn: &Connection,
    t: &SnapshotTask,
    maps: &mut AssigneeMaps,
) -> CoreResult<Option<i64>> {
    if let Some(name) = t.assignee_name.as_deref().filter(|n| !n.trim().is_empty()) {
        if let Some(id) = maps.by_name.get(name) {
            return Ok(Some(*id));
        }
        conn.execute(
            "INSERT INTO assignees (name, color, created_at) VALUES (?, ?, ?)",
            params![name, DEFAULT_ASSIGNEE_COLOR, now_ts()],
        )?;
        let id = conn.last_insert_rowid();
        maps.by_name.insert(name.to_string(), id);
        return Ok(Some(id));
    }
    if let Some(rid) = t.assignee_id {
        return Ok(maps.by_remote_id.get(&rid).copied());
    }
    Ok(None)
}

/// Remap a remote sprint id into the local id space. Falls back to the raw
/// id when it happens to exist locally (same-device snapshots), else drops
/// the reference rather than pointing at the wrong sprint.
fn resolve_sprint(
    conn: &Connection,
    sprint_id: Option<i64>,
    sprint_map: &HashMap<i64, i64>,
) -> CoreResult<Option<i64>> {
    use rusqlite::OptionalExtension;
    let Some(rid) = sprint_id else {
        return Ok(None);
    };
    if let Some(local) = sprint_map.get(&rid) {
        return Ok(Some(*local));
    }
    let exists: Option<i64> = conn
        .query_row("SELECT id FROM sprints WHERE id = ?", params![rid], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(exists)
}
