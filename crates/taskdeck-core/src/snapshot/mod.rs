//! Snapshot codec: the complete dataset as one sectioned text document.
//!
//! Used for manual export/import and as the sync payload. Each section opens
//! with a marker line, then a header line naming its fields, then data rows.
//! Field values are comma-delimited with standard quoting (wrap in double
//! quotes when a value contains a comma, quote, or newline; double internal
//! quotes). Decoding is deliberately tolerant: unknown header layouts are
//! mapped by field name, rows with the wrong field count are skipped, and a
//! marker-less document is treated as the legacy tasks-only form.

use std::collections::HashMap;

use tracing::warn;

use crate::error::{CoreError, CoreResult};
use crate::model::{SprintStatus, Task, TaskStatus};
use crate::store::Store;

pub const TASKS_MARKER: &str = "# TASKS";
pub const PROJECTS_MARKER: &str = "# PROJECTS";
pub const ASSIGNEES_MARKER: &str = "# ASSIGNEES";
pub const SPRINTS_MARKER: &str = "# SPRINTS";

pub const TASK_FIELDS: &[&str] = &[
    "id",
    "title",
    "project",
    "duration_minutes",
    "date",
    "status",
    "category",
    "notes",
    "assignee_id",
    "assignee_name",
    "sprint_id",
    "is_archived",
    "created_at",
    "updated_at",
    "end_date",
];
pub const PROJECT_FIELDS: &[&str] = &["id", "name", "repo_url", "created_at"];
pub const ASSIGNEE_FIELDS: &[&str] = &["id", "name", "color", "discord_id", "created_at"];
pub const SPRINT_FIELDS: &[&str] = &["id", "name", "start_date", "end_date", "status", "created_at"];

/// Fields the legacy tasks-only form must name for the document to be
/// accepted at all.
const LEGACY_REQUIRED_FIELDS: &[&str] = &["title", "project", "date"];

/// A task row as carried by a snapshot.
///
/// Identity and timestamps are optional: hand-written or legacy documents may
/// omit them, in which case the importer assigns fresh ones. `assignee_name`
/// is the human-readable foreign reference the merge engine resolves when ids
/// don't line up across devices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotTask {
    pub id: Option<i64>,
    pub title: String,
    pub project: String,
    pub duration_minutes: i64,
    pub date: String,
    pub status: TaskStatus,
    pub category: String,
    pub notes: String,
    pub assignee_id: Option<i64>,
    pub assignee_name: Option<String>,
    pub sprint_id: Option<i64>,
    pub is_archived: bool,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotProject {
    pub id: Option<i64>,
    pub name: String,
    pub repo_url: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotAssignee {
    pub id: Option<i64>,
    pub name: String,
    pub color: String,
    pub discord_id: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotSprint {
    pub id: Option<i64>,
    pub name: String,
    pub start_date: String,
    pub end_date: String,
    pub status: SprintStatus,
    pub created_at: Option<String>,
}

/// A decoded (or to-be-encoded) full-dataset snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub tasks: Vec<SnapshotTask>,
    pub projects: Vec<SnapshotProject>,
    pub assignees: Vec<SnapshotAssignee>,
    pub sprints: Vec<SnapshotSprint>,
    /// Rows dropped during decode because their field count didn't match the
    /// active header. Diagnostic only.
    pub skipped_rows: usize,
}

impl Snapshot {
    /// Export the full dataset of a store, archived tasks included.
    pub fn from_store(store: &Store) -> CoreResult<Self> {
        let assignees = store.list_assignees()?;
        let name_of: HashMap<i64, String> = assignees
            .iter()
            .map(|a| (a.id, a.name.clone()))
            .collect();

        let tasks = store
            .list_tasks(true)?
            .iter()
            .map(|t| snapshot_task(t, &name_of))
            .collect();

        Ok(Self {
            tasks,
            projects: store
                .list_projects()?
                .into_iter()
                .map(|p| SnapshotProject {
                    id: Some(p.id),
                    name: p.name,
                    repo_url: p.repo_url,
                    created_at: Some(p.created_at),
                })
                .collect(),
            assignees: assignees
                .into_iter()
                .map(|a| SnapshotAssignee {
                    id: Some(a.id),
                    name: a.name,
                    color: a.color,
                    discord_id: a.discord_id,
                    created_at: Some(a.created_at),
                })
                .collect(),
            sprints: store
                .list_sprints()?
                .into_iter()
                .map(|s| SnapshotSprint {
                    id: Some(s.id),
                    name: s.name,
                    start_date: s.start_date,
                    end_date: s.end_date,
                    status: s.status,
                    created_at: Some(s.created_at),
                })
                .collect(),
            skipped_rows: 0,
        })
    }

    /// Serialize into the sectioned text document.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = String::new();

        out.push_str(TASKS_MARKER);
        out.push('\n');
        push_row(&mut out, TASK_FIELDS.iter().map(|f| (*f).to_string()));
        for t in &self.tasks {
            push_row(
                &mut out,
                [
                    opt_i64_field(t.id),
                    t.title.clone(),
                    t.project.clone(),
                    t.duration_minutes.to_string(),
                    t.date.clone(),
                    t.status.to_string(),
                    t.category.clone(),
                    t.notes.clone(),
                    opt_i64_field(t.assignee_id),
                    t.assignee_name.clone().unwrap_or_default(),
                    opt_i64_field(t.sprint_id),
                    if t.is_archived { "1" } else { "0" }.to_string(),
                    t.created_at.clone().unwrap_or_default(),
                    t.updated_at.clone().unwrap_or_default(),
                    t.end_date.clone().unwrap_or_default(),
                ],
            );
        }

        out.push('\n');
        out.push_str(PROJECTS_MARKER);
        out.push('\n');
        push_row(&mut out, PROJECT_FIELDS.iter().map(|f| (*f).to_string()));
        for p in &self.projects {
            push_row(
                &mut out,
                [
                    opt_i64_field(p.id),
                    p.name.clone(),
                    p.repo_url.clone().unwrap_or_default(),
                    p.created_at.clone().unwrap_or_default(),
                ],
            );
        }

        out.push('\n');
        out.push_str(ASSIGNEES_MARKER);
        out.push('\n');
        push_row(&mut out, ASSIGNEE_FIELDS.iter().map(|f| (*f).to_string()));
        for a in &self.assignees {
            push_row(
                &mut out,
                [
                    opt_i64_field(a.id),
                    a.name.clone(),
                    a.color.clone(),
                    a.discord_id.clone().unwrap_or_default(),
                    a.created_at.clone().unwrap_or_default(),
                ],
            );
        }

        out.push('\n');
        out.push_str(SPRINTS_MARKER);
        out.push('\n');
        push_row(&mut out, SPRINT_FIELDS.iter().map(|f| (*f).to_string()));
        for s in &self.sprints {
            push_row(
                &mut out,
                [
                    opt_i64_field(s.id),
                    s.name.clone(),
                    s.start_date.clone(),
                    s.end_date.clone(),
                    s.status.to_string(),
                    s.created_at.clone().unwrap_or_default(),
                ],
            );
        }

        out
    }

    /// Parse a snapshot document.
    ///
    /// Accepts the sectioned form and the legacy marker-less tasks-only form
    /// (a bare header plus rows). The legacy form must name at least the
    /// required task fields in its header or the document is rejected as
    /// malformed.
    pub fn decode(text: &str) -> CoreResult<Self> {
        let records = split_records(text);
        if records.iter().all(|r| r.trim().is_empty()) {
            return Err(CoreError::MalformedSnapshot {
                reason: "empty document".to_string(),
            });
        }

        let has_markers = records.iter().any(|r| section_for(r).is_some());
        if has_markers {
            Self::decode_sectioned(&records)
        } else {
            Self::decode_legacy_tasks(&records)
        }
    }

    fn decode_sectioned(records: &[String]) -> CoreResult<Self> {
        #[derive(Clone, Copy, PartialEq)]
        enum Section {
            Tasks,
            Projects,
            Assignees,
            Sprints,
        }

        let mut snapshot = Self::default();
        let mut section: Option<Section> = None;
        let mut header: Option<Header> = None;

        for record in records {
            if record.trim().is_empty() {
                continue;
            }
            if let Some(marker) = section_for(record) {
                section = Some(match marker {
                    TASKS_MARKER => Section::Tasks,
                    PROJECTS_MARKER => Section::Projects,
                    ASSIGNEES_MARKER => Section::Assignees,
                    _ => Section::Sprints,
                });
                header = None;
                continue;
            }
            let Some(active) = section else {
                // Prose before the first marker; ignore.
                continue;
            };

            let fields = parse_fields(record);
            match &header {
                None => header = Some(Header::new(&fields)),
                Some(h) => {
                    if fields.len() != h.len() {
                        warn!(
                            expected = h.len(),
                            got = fields.len(),
                            "skipping snapshot row with mismatched field count"
                        );
                        snapshot.skipped_rows += 1;
                        continue;
                    }
                    match active {
                        Section::Tasks => snapshot.tasks.push(task_from_fields(h, &fields)),
                        Section::Projects => {
                            snapshot.projects.push(project_from_fields(h, &fields));
                        }
                        Section::Assignees => {
                            snapshot.assignees.push(assignee_from_fields(h, &fields));
                        }
                        Section::Sprints => {
                            snapshot.sprints.push(sprint_from_fields(h, &fields));
                        }
                    }
                }
            }
        }

        Ok(snapshot)
    }

    fn decode_legacy_tasks(records: &[String]) -> CoreResult<Self> {
        let mut snapshot = Self::default();
        let mut header: Option<Header> = None;

        for record in records {
            if record.trim().is_empty() {
                continue;
            }
            let fields = parse_fields(record);
            match &header {
                None => {
                    let h = Header::new(&fields);
                    let missing: Vec<&str> = LEGACY_REQUIRED_FIELDS
                        .iter()
                        .copied()
                        .filter(|f| !h.contains(f))
                        .collect();
                    if !missing.is_empty() {
                        return Err(CoreError::MalformedSnapshot {
                            reason: format!(
                                "tasks header is missing required fields: {}",
                                missing.join(", ")
                            ),
                        });
                    }
                    header = Some(h);
                }
                Some(h) => {
                    if fields.len() != h.len() {
                        warn!(
                            expected = h.len(),
                            got = fields.len(),
                            "skipping legacy snapshot row with mismatched field count"
                        );
                        snapshot.skipped_rows += 1;
                        continue;
                    }
                    snapshot.tasks.push(task_from_fields(h, &fields));
                }
            }
        }

        Ok(snapshot)
    }
}

fn snapshot_task(t: &Task, assignee_names: &HashMap<i64, String>) -> SnapshotTask {
    SnapshotTask {
        id: Some(t.id),
        title: t.title.clone(),
        project: t.project.clone(),
        duration_minutes: t.duration_minutes,
        date: t.date.clone(),
        status: t.status,
        category: t.category.clone(),
        notes: t.notes.clone(),
        assignee_id: t.assignee_id,
        assignee_name: t
            .assignee_id
            .and_then(|id| assignee_names.get(&id).cloned()),
        sprint_id: t.sprint_id,
        is_archived: t.is_archived,
        created_at: Some(t.created_at.clone()),
        updated_at: Some(t.updated_at.clone()),
        end_date: t.end_date.clone(),
    }
}

// ============================================================================
// Row-level text machinery
// ============================================================================

/// Marker matching: exact text after trimming.
fn section_for(record: &str) -> Option<&'static str> {
    match record.trim() {
        TASKS_MARKER => Some(TASKS_MARKER),
        PROJECTS_MARKER => Some(PROJECTS_MARKER),
        ASSIGNEES_MARKER => Some(ASSIGNEES_MARKER),
        SPRINTS_MARKER => Some(SPRINTS_MARKER),
        _ => None,
    }
}

/// Header: field name → position, case-insensitive.
struct Header {
    index: HashMap<String, usize>,
    width: usize,
}

impl Header {
    fn new(fields: &[String]) -> Self {
        let index = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.trim().to_ascii_lowercase(), i))
            .collect();
        Self {
            index,
            width: fields.len(),
        }
    }

    const fn len(&self) -> usize {
        self.width
    }

    fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    fn get<'a>(&self, fields: &'a [String], name: &str) -> &'a str {
        self.index
            .get(name)
            .and_then(|&i| fields.get(i))
            .map_or("", String::as_str)
    }
}

fn task_from_fields(h: &Header, fields: &[String]) -> SnapshotTask {
    SnapshotTask {
        id: opt_i64(h.get(fields, "id")),
        title: h.get(fields, "title").to_string(),
        project: h.get(fields, "project").to_string(),
        duration_minutes: opt_i64(h.get(fields, "duration_minutes")).unwrap_or(0).max(0),
        date: h.get(fields, "date").to_string(),
        status: TaskStatus::parse(h.get(fields, "status")).unwrap_or_default(),
        category: h.get(fields, "category").to_string(),
        notes: h.get(fields, "notes").to_string(),
        assignee_id: opt_i64(h.get(fields, "assignee_id")),
        assignee_name: opt_str(h.get(fields, "assignee_name")),
        sprint_id: opt_i64(h.get(fields, "sprint_id")),
        is_archived: bool_field(h.get(fields, "is_archived")),
        created_at: opt_str(h.get(fields, "created_at")),
        updated_at: opt_str(h.get(fields, "updated_at")),
        end_date: opt_str(h.get(fields, "end_date")),
    }
}

fn project_from_fields(h: &Header, fields: &[String]) -> SnapshotProject {
    SnapshotProject {
        id: opt_i64(h.get(fields, "id")),
        name: h.get(fields, "name").to_string(),
        repo_url: opt_str(h.get(fields, "repo_url")),
        created_at: opt_str(h.get(fields, "created_at")),
    }
}

fn assignee_from_fields(h: &Header, fields: &[String]) -> SnapshotAssignee {
    SnapshotAssignee {
        id: opt_i64(h.get(fields, "id")),
        name: h.get(fields, "name").to_string(),
        color: h.get(fields, "color").to_string(),
        discord_id: opt_str(h.get(fields, "discord_id")),
        created_at: opt_str(h.get(fields, "created_at")),
    }
}

fn sprint_from_fields(h: &Header, fields: &[String]) -> SnapshotSprint {
    SnapshotSprint {
        id: opt_i64(h.get(fields, "id")),
        name: h.get(fields, "name").to_string(),
        start_date: h.get(fields, "start_date").to_string(),
        end_date: h.get(fields, "end_date").to_string(),
        status: SprintStatus::parse(h.get(fields, "status")).unwrap_or_default(),
        created_at: opt_str(h.get(fields, "created_at")),
    }
}

fn opt_str(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn opt_i64(s: &str) -> Option<i64> {
    s.trim().parse().ok()
}

fn opt_i64_field(v: Option<i64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

fn bool_field(s: &str) -> bool {
    matches!(s.trim(), "1" | "true" | "TRUE" | "True")
}

/// Append one row, quoting fields as needed.
fn push_row<I>(out: &mut String, fields: I)
where
    I: IntoIterator<Item = String>,
{
    let mut first = true;
    for field in fields {
        if !first {
            out.push(',');
        }
        first = false;
        if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
        {
            out.push('"');
            for c in field.chars() {
                if c == '"' {
                    out.push('"');
                }
                out.push(c);
            }
            out.push('"');
        } else {
            out.push_str(&field);
        }
    }
    out.push('\n');
}

/// Split a document into logical records: newline-delimited, except inside
/// quoted fields, where newlines belong to the field.
fn split_records(text: &str) -> Vec<String> {
    let mut records = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in text.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '\n' if !in_quotes => {
                if current.ends_with('\r') {
                    current.pop();
                }
                records.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        if current.ends_with('\r') {
            current.pop();
        }
        records.push(current);
    }
    records
}

/// Split one record into unquoted field values.
fn parse_fields(record: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = record.chars().peekable();
    let mut in_quotes = false;
    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else {
            match c {
                '"' => in_quotes = true,
                ',' => fields.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
    }
    fields.push(current);
    fields
}
