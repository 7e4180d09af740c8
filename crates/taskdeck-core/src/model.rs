//! Entity record types shared across the store, snapshot codec, and merge
//! engine, plus the timestamp helpers used for conflict resolution.
//!
//! Timestamps are stored as text. New rows are stamped with RFC 3339 UTC, but
//! snapshots produced by other devices may carry bare ISO dates, so comparison
//! parses leniently and falls back to lexical ordering.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder category applied to tasks created without one.
pub const DEFAULT_CATEGORY: &str = "general";

/// Default display color for assignees created implicitly (e.g. by the merge
/// engine resolving a name-only reference).
pub const DEFAULT_ASSIGNEE_COLOR: &str = "#8888aa";

/// Workflow status of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    InTest,
    Done,
}

impl TaskStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in-progress",
            Self::InTest => "in-test",
            Self::Done => "done",
        }
    }

    /// Parse a status string, returning `None` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "todo" => Some(Self::Todo),
            "in-progress" => Some(Self::InProgress),
            "in-test" => Some(Self::InTest),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a sprint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SprintStatus {
    #[default]
    Planned,
    Active,
    Completed,
}

impl SprintStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    /// Parse a status string, returning `None` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "planned" => Some(Self::Planned),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SprintStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task row.
///
/// `id` is assigned by the store and stable across merges; it is never reused
/// while the row exists. `project` is denormalized free text, optionally
/// matching a [`Project::name`]. `updated_at` advances on every mutating
/// write and is the local side of the merge engine's conflict comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub project: String,
    pub duration_minutes: i64,
    pub date: String,
    pub status: TaskStatus,
    pub category: String,
    pub notes: String,
    pub assignee_id: Option<i64>,
    pub sprint_id: Option<i64>,
    pub is_archived: bool,
    pub created_at: String,
    pub updated_at: String,
    pub end_date: Option<String>,
}

/// Fields for creating a new task; the store assigns id and timestamps.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub project: String,
    pub duration_minutes: i64,
    pub date: String,
    pub status: TaskStatus,
    pub category: Option<String>,
    pub notes: String,
    pub assignee_id: Option<i64>,
    pub sprint_id: Option<i64>,
    pub end_date: Option<String>,
}

/// A project row. `name` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub repo_url: Option<String>,
    pub created_at: String,
}

/// An assignee row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignee {
    pub id: i64,
    pub name: String,
    pub color: String,
    pub discord_id: Option<String>,
    pub created_at: String,
}

/// A sprint row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sprint {
    pub id: i64,
    pub name: String,
    pub start_date: String,
    pub end_date: String,
    pub status: SprintStatus,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub archived_count: Option<i64>,
}

/// Current wall-clock timestamp in the canonical column format.
#[must_use]
pub fn now_ts() -> String {
    Utc::now().to_rfc3339()
}

/// Parse a stored timestamp leniently.
///
/// Accepts RFC 3339, a bare `YYYY-MM-DDTHH:MM:SS` datetime, or a bare
/// `YYYY-MM-DD` date (interpreted as midnight UTC).
#[must_use]
pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.and_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

/// `true` if timestamp `a` is at least as recent as timestamp `b`.
///
/// Unparseable timestamps fall back to lexical comparison, which is correct
/// for same-format ISO text and deterministic for everything else.
#[must_use]
pub fn ts_at_least(a: &str, b: &str) -> bool {
    match (parse_ts(a), parse_ts(b)) {
        (Some(ta), Some(tb)) => ta >= tb,
        _ => a >= b,
    }
}

/// `true` if timestamp `a` is strictly more recent than timestamp `b`.
#[must_use]
pub fn ts_greater(a: &str, b: &str) -> bool {
    match (parse_ts(a), parse_ts(b)) {
        (Some(ta), Some(tb)) => ta > tb,
        _ => a > b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in [
            TaskStatus::Todo,
            TaskStatus::InProgress,
            TaskStatus::InTest,
            TaskStatus::Done,
        ] {
            assert_eq!(TaskStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(TaskStatus::parse("bogus"), None);
    }

    #[test]
    fn test_parse_ts_formats() {
        assert!(parse_ts("2026-02-10").is_some());
        assert!(parse_ts("2026-02-10T08:30:00").is_some());
        assert!(parse_ts("2026-02-10T08:30:00.123+00:00").is_some());
        assert!(parse_ts("not a date").is_none());
    }

    #[test]
    fn test_ts_ordering_mixed_formats() {
        // Bare date vs full datetime on the same day.
        assert!(ts_at_least("2026-02-10T08:00:00+00:00", "2026-02-10"));
        assert!(!ts_greater("2026-02-10", "2026-02-10"));
        assert!(ts_at_least("2026-02-10", "2026-02-10"));
        assert!(ts_greater("2026-02-12", "2026-02-10"));
    }
}
