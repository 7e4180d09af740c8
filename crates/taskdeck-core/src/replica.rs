//! Convergent replication document: the alternative sync path.
//!
//! Represents tasks as per-task, per-field last-writer-wins registers keyed
//! by a logical clock, independent of the relational store. Two documents
//! merge commutatively and idempotently: each register keeps the value with
//! the greater `(clock, node)` pair, and the node id tie-break is a fixed
//! total order, so both sides converge without further communication.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::CoreResult;
use crate::model::{ts_greater, NewTask, TaskStatus};
use crate::store::Store;

/// One field register: the value plus the logical and wall-clock times of
/// the write that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    pub value: Value,
    pub clock: u64,
    pub node: String,
    /// Wall-clock time of the write, used only when projecting back into the
    /// relational store (which orders by `updated_at`).
    pub at: String,
}

impl Register {
    /// Whether this register beats `other` under the LWW rule.
    fn wins_over(&self, other: &Self) -> bool {
        (self.clock, self.node.as_str()) > (other.clock, other.node.as_str())
    }
}

/// Field registers for every known task, keyed by task id then field name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaDoc {
    node_id: String,
    clock: u64,
    tasks: BTreeMap<i64, BTreeMap<String, Register>>,
}

impl ReplicaDoc {
    #[must_use]
    pub fn new(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            clock: 0,
            tasks: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    #[must_use]
    pub const fn clock(&self) -> u64 {
        self.clock
    }

    /// Write one field of one task at a fresh logical time.
    pub fn upsert_field(&mut self, task_id: i64, field: &str, value: Value) {
        self.clock += 1;
        let register = Register {
            value,
            clock: self.clock,
            node: self.node_id.clone(),
            at: crate::model::now_ts(),
        };
        self.tasks
            .entry(task_id)
            .or_default()
            .insert(field.to_string(), register);
    }

    /// Merge a remote document into this one.
    ///
    /// For every register present in either document, the value with the
    /// greater `(clock, node)` wins. The local clock advances to at least
    /// the remote's, so later local writes still dominate merged state.
    pub fn merge(&mut self, remote: &Self) {
        self.clock = self.clock.max(remote.clock);
        for (task_id, fields) in &remote.tasks {
            let local = self.tasks.entry(*task_id).or_default();
            for (field, register) in fields {
                match local.get(field) {
                    Some(existing) if !register.wins_over(existing) => {}
                    _ => {
                        local.insert(field.clone(), register.clone());
                    }
                }
            }
        }
    }

    /// Project the register set back into concrete field maps per task.
    #[must_use]
    pub fn materialize(&self) -> BTreeMap<i64, BTreeMap<String, Value>> {
        self.tasks
            .iter()
            .map(|(id, fields)| {
                let values = fields
                    .iter()
                    .map(|(name, r)| (name.clone(), r.value.clone()))
                    .collect();
                (*id, values)
            })
            .collect()
    }

    /// Re-import the document into the relational store.
    ///
    /// Per task, the newest register wall-time is compared against the
    /// stored row's `updated_at`; the fields are applied only when the
    /// document strictly dominates. Unknown task ids are created, which
    /// requires at least a title register. Returns the number of rows
    /// written.
    pub fn apply_to_store(&self, store: &Store) -> CoreResult<usize> {
        let mut applied = 0;
        for (task_id, fields) in &self.tasks {
            let newest = fields.values().map(|r| r.at.as_str()).max().unwrap_or("");

            match store.get_task(*task_id)? {
                Some(mut task) => {
                    if !ts_greater(newest, &task.updated_at) {
                        continue;
                    }
                    apply_fields(&mut ProjectedTask::Existing(&mut task), fields);
                    store.update_task(&task)?;
                    applied += 1;
                }
                None => {
                    let mut new = NewTask::default();
                    apply_fields(&mut ProjectedTask::New(&mut new), fields);
                    if new.title.is_empty() {
                        warn!(task_id, "replica document has no title register; skipping");
                        continue;
                    }
                    let created = store.create_task(new)?;
                    // Preserve the document's identity so later merges line up.
                    if created.id != *task_id {
                        store.conn().execute(
                            "UPDATE tasks SET id = ? WHERE id = ?",
                            rusqlite::params![task_id, created.id],
                        )?;
                    }
                    applied += 1;
                }
            }
        }
        Ok(applied)
    }
}

enum ProjectedTask<'a> {
    Existing(&'a mut crate::model::Task),
    New(&'a mut NewTask),
}

fn apply_fields(target: &mut ProjectedTask<'_>, fields: &BTreeMap<String, Register>) {
    for (name, register) in fields {
        let v = &register.value;
        match target {
            ProjectedTask::Existing(task) => match name.as_str() {
                "title" => set_string(&mut task.title, v),
                "project" => set_string(&mut task.project, v),
                "date" => set_string(&mut task.date, v),
                "category" => set_string(&mut task.category, v),
                "notes" => set_string(&mut task.notes, v),
                "status" => set_status(&mut task.status, v),
                "duration_minutes" => set_i64(&mut task.duration_minutes, v),
                "end_date" => task.end_date = v.as_str().map(String::from),
                "is_archived" => task.is_archived = v.as_bool().unwrap_or(task.is_archived),
                _ => warn!(field = %name, "unknown replica field ignored"),
            },
            ProjectedTask::New(new) => match name.as_str() {
                "title" => set_string(&mut new.title, v),
                "project" => set_string(&mut new.project, v),
                "date" => set_string(&mut new.date, v),
                "category" => {
                    new.category = v.as_str().map(String::from);
                }
                "notes" => set_string(&mut new.notes, v),
                "status" => set_status(&mut new.status, v),
                "duration_minutes" => set_i64(&mut new.duration_minutes, v),
                "end_date" => new.end_date = v.as_str().map(String::from),
                "is_archived" => {}
                _ => warn!(field = %name, "unknown replica field ignored"),
            },
        }
    }
}

fn set_string(slot: &mut String, v: &Value) {
    if let Some(s) = v.as_str() {
        *slot = s.to_string();
    }
}

fn set_status(slot: &mut TaskStatus, v: &Value) {
    if let Some(parsed) = v.as_str().and_then(TaskStatus::parse) {
        *slot = parsed;
    }
}

fn set_i64(slot: &mut i64, v: &Value) {
    if let Some(n) = v.as_i64() {
        *slot = n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upsert_advances_clock() {
        let mut doc = ReplicaDoc::new("node-a");
        doc.upsert_field(1, "title", json!("first"));
        doc.upsert_field(1, "title", json!("second"));
        assert_eq!(doc.clock(), 2);
        assert_eq!(doc.materialize()[&1]["title"], json!("second"));
    }

    #[test]
    fn test_merge_is_commutative() {
        let mut a = ReplicaDoc::new("node-a");
        let mut b = ReplicaDoc::new("node-b");
        a.upsert_field(1, "title", json!("from a"));
        a.upsert_field(1, "notes", json!("a notes"));
        b.upsert_field(1, "title", json!("from b"));
        b.upsert_field(2, "title", json!("only b"));

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);

        assert_eq!(ab.materialize(), ba.materialize());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut a = ReplicaDoc::new("node-a");
        let mut b = ReplicaDoc::new("node-b");
        a.upsert_field(1, "title", json!("from a"));
        b.upsert_field(1, "title", json!("from b"));

        let mut once = a.clone();
        once.merge(&b);
        let mut twice = once.clone();
        twice.merge(&b);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_tie_breaks_by_node_identity() {
        // Same logical clock on both sides; the greater node id must win on
        // both, regardless of merge direction.
        let mut a = ReplicaDoc::new("node-a");
        let mut b = ReplicaDoc::new("node-b");
        a.upsert_field(1, "title", json!("a value"));
        b.upsert_field(1, "title", json!("b value"));

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);
        assert_eq!(ab.materialize()[&1]["title"], json!("b value"));
        assert_eq!(ba.materialize()[&1]["title"], json!("b value"));
    }

    #[test]
    fn test_later_local_write_beats_merged_state() {
        let mut a = ReplicaDoc::new("node-a");
        let mut b = ReplicaDoc::new("node-b");
        for _ in 0..5 {
            b.upsert_field(1, "title", json!("busy b"));
        }
        a.merge(&b);
        // a's clock caught up during merge, so its next write dominates.
        a.upsert_field(1, "title", json!("a after merge"));
        b.merge(&a);
        assert_eq!(b.materialize()[&1]["title"], json!("a after merge"));
    }

    #[test]
    fn test_round_trips_through_json() {
        let mut doc = ReplicaDoc::new("node-a");
        doc.upsert_field(1, "title", json!("persisted"));
        let text = serde_json::to_string(&doc).unwrap();
        let back: ReplicaDoc = serde_json::from_str(&text).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_apply_to_store_respects_updated_at() {
        let store = Store::open_in_memory().unwrap();
        let task = store
            .create_task(NewTask {
                title: "fresh local".to_string(),
                date: "2026-03-01".to_string(),
                ..NewTask::default()
            })
            .unwrap();

        // Stale document: registers older than the row's updated_at.
        let mut stale = ReplicaDoc::new("node-b");
        stale.upsert_field(task.id, "title", json!("stale"));
        if let Some(fields) = stale.tasks.get_mut(&task.id) {
            for r in fields.values_mut() {
                r.at = "2020-01-01T00:00:00+00:00".to_string();
            }
        }
        assert_eq!(stale.apply_to_store(&store).unwrap(), 0);
        assert_eq!(store.get_task(task.id).unwrap().unwrap().title, "fresh local");

        // Dominant document wins.
        let mut newer = ReplicaDoc::new("node-b");
        newer.upsert_field(task.id, "title", json!("replicated"));
        if let Some(fields) = newer.tasks.get_mut(&task.id) {
            for r in fields.values_mut() {
                r.at = "2126-01-01T00:00:00+00:00".to_string();
            }
        }
        assert_eq!(newer.apply_to_store(&store).unwrap(), 1);
        assert_eq!(store.get_task(task.id).unwrap().unwrap().title, "replicated");
    }

    #[test]
    fn test_apply_creates_unknown_tasks() {
        let store = Store::open_in_memory().unwrap();
        let mut doc = ReplicaDoc::new("node-b");
        doc.upsert_field(41, "title", json!("made by replica"));
        doc.upsert_field(41, "status", json!("in-progress"));

        assert_eq!(doc.apply_to_store(&store).unwrap(), 1);
        let task = store.get_task(41).unwrap().unwrap();
        assert_eq!(task.title, "made by replica");
        assert_eq!(task.status, TaskStatus::InProgress);
    }
}
