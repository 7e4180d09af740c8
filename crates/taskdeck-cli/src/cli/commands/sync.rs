//! Implementation of `taskdeck export`, `import`, and `merge`.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use taskdeck_core::merge::{import_snapshot, merge_snapshot};
use taskdeck_core::snapshot::Snapshot;

use crate::cli::commands::helpers::App;
use crate::output::Formatter;

#[derive(Serialize)]
struct ExportOutput {
    tasks: usize,
    projects: usize,
    assignees: usize,
    sprints: usize,
    destination: String,
}

pub fn run_export(data_dir: &Path, path: Option<&Path>, formatter: &Formatter) -> Result<()> {
    let app = App::open(data_dir)?;
    let snapshot = Snapshot::from_store(app.store())?;
    let text = snapshot.encode();

    match path {
        Some(path) => {
            std::fs::write(path, &text)
                .with_context(|| format!("failed to write snapshot: {}", path.display()))?;
            formatter.print(&ExportOutput {
                tasks: snapshot.tasks.len(),
                projects: snapshot.projects.len(),
                assignees: snapshot.assignees.len(),
                sprints: snapshot.sprints.len(),
                destination: path.display().to_string(),
            })
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            Ok(())
        }
    }
}

fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot: {}", path.display()))?;
    Ok(Snapshot::decode(&text)?)
}

pub fn run_import(data_dir: &Path, path: &Path, formatter: &Formatter) -> Result<()> {
    let mut app = App::open(data_dir)?;
    let snapshot = read_snapshot(path)?;
    let counts = import_snapshot(app.store(), &snapshot)?;
    app.save()?;
    formatter.print(&counts)
}

pub fn run_merge(data_dir: &Path, path: &Path, formatter: &Formatter) -> Result<()> {
    let mut app = App::open(data_dir)?;
    let snapshot = read_snapshot(path)?;
    let report = merge_snapshot(app.store(), &snapshot)?;
    app.save()?;
    formatter.print(&report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{Formatter, OutputFormat};
    use taskdeck_core::model::NewTask;
    use tempfile::tempdir;

    fn seed(data_dir: &Path, titles: &[&str]) {
        let mut app = App::open_or_create(data_dir).unwrap();
        for title in titles {
            app.store()
                .create_task(NewTask {
                    title: (*title).to_string(),
                    date: "2026-03-01".to_string(),
                    ..NewTask::default()
                })
                .unwrap();
        }
        app.save().unwrap();
    }

    #[test]
    fn test_export_then_merge_between_devices() {
        let dir = tempdir().unwrap();
        let device_a = dir.path().join("a");
        let device_b = dir.path().join("b");
        let snapshot_path = dir.path().join("a.csv");
        let formatter = Formatter::new(OutputFormat::Text);

        seed(&device_a, &["from a"]);
        seed(&device_b, &[]);

        run_export(&device_a, Some(&snapshot_path), &formatter).unwrap();
        run_merge(&device_b, &snapshot_path, &formatter).unwrap();

        let app = App::open(&device_b).unwrap();
        let titles: Vec<String> = app
            .store()
            .list_tasks(true)
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["from a".to_string()]);
    }

    #[test]
    fn test_import_is_insert_only() {
        let dir = tempdir().unwrap();
        let device = dir.path().join("a");
        let snapshot_path = dir.path().join("snap.csv");
        let formatter = Formatter::new(OutputFormat::Text);

        seed(&device, &["keep me"]);
        run_export(&device, Some(&snapshot_path), &formatter).unwrap();

        // Importing our own export adds nothing and changes nothing.
        run_import(&device, &snapshot_path, &formatter).unwrap();
        let app = App::open(&device).unwrap();
        assert_eq!(app.store().list_tasks(true).unwrap().len(), 1);
    }
}
