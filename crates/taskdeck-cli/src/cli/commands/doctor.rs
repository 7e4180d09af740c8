//! Implementation of `taskdeck doctor`: storage health report.

use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use taskdeck_core::codec;
use taskdeck_core::persist::{CURRENT_KEY, LEGACY_BACKUP_KEY, LEGACY_KEYS};
use taskdeck_core::storage::KvStorage;
use taskdeck_core::store::schema::SCHEMA_VERSION;

use crate::cli::commands::helpers::App;
use crate::output::Formatter;

#[derive(Serialize)]
struct KeyReport {
    key: String,
    bytes: usize,
    decodes: bool,
}

#[derive(Serialize)]
struct DoctorOutput {
    schema_version: i64,
    expected_schema_version: i64,
    tasks: usize,
    projects: usize,
    assignees: usize,
    sprints: usize,
    keys: Vec<KeyReport>,
    backup_present: bool,
    legacy_keys_cleared: usize,
}

pub fn run_doctor(data_dir: &Path, clear_legacy: bool, formatter: &Formatter) -> Result<()> {
    let mut app = App::open(data_dir)?;

    let schema_version: i64 =
        app.store()
            .conn()
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
    let tasks = app.store().list_tasks(true)?.len();
    let projects = app.store().list_projects()?.len();
    let assignees = app.store().list_assignees()?.len();
    let sprints = app.store().list_sprints()?.len();

    let mut keys = Vec::new();
    for key in std::iter::once(CURRENT_KEY).chain(LEGACY_KEYS.iter().copied()) {
        if let Some(text) = app.persistence_mut().storage().get(key)? {
            keys.push(KeyReport {
                key: key.to_string(),
                bytes: text.len(),
                decodes: codec::decode(&text).is_ok(),
            });
        }
    }
    let backup_present = app
        .persistence_mut()
        .storage()
        .get(LEGACY_BACKUP_KEY)?
        .is_some();

    let legacy_keys_cleared = if clear_legacy {
        app.persistence_mut().clear_legacy()?
    } else {
        0
    };

    formatter.print(&DoctorOutput {
        schema_version,
        expected_schema_version: SCHEMA_VERSION,
        tasks,
        projects,
        assignees,
        sprints,
        keys,
        backup_present,
        legacy_keys_cleared,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use tempfile::tempdir;

    #[test]
    fn test_doctor_runs_on_fresh_store() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("deck");
        let mut app = App::open_or_create(&data_dir).unwrap();
        app.save().unwrap();
        drop(app);

        let formatter = Formatter::new(OutputFormat::Text);
        run_doctor(&data_dir, false, &formatter).unwrap();
    }
}
