//! Implementation of `taskdeck sprint` subcommands.

use std::path::Path;

use anyhow::{anyhow, Result};
use clap::Subcommand;

use taskdeck_core::model::SprintStatus;

use crate::cli::commands::helpers::App;
use crate::output::Formatter;

#[derive(Subcommand)]
pub enum SprintCommand {
    /// Create a sprint.
    Add {
        name: String,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        /// Create as active instead of planned.
        #[arg(long)]
        active: bool,
    },
    /// List sprints.
    List,
    /// Complete a sprint and archive its finished tasks.
    Archive { name: String },
}

pub fn run(data_dir: &Path, command: SprintCommand, formatter: &Formatter) -> Result<()> {
    let mut app = App::open(data_dir)?;
    match command {
        SprintCommand::Add {
            name,
            start,
            end,
            active,
        } => {
            let status = if active {
                SprintStatus::Active
            } else {
                SprintStatus::Planned
            };
            let sprint = app.store().create_sprint(&name, &start, &end, status)?;
            app.save()?;
            formatter.print(&sprint)
        }
        SprintCommand::List => {
            let sprints = app.store().list_sprints()?;
            formatter.print_list(&sprints, "No sprints.")
        }
        SprintCommand::Archive { name } => {
            let id = app
                .store()
                .get_sprint_by_name(&name)?
                .map(|s| s.id)
                .ok_or_else(|| anyhow!("Unknown sprint: {name}"))?;
            let sprint = app.store().complete_sprint(id)?;
            app.save()?;
            formatter.print(&sprint)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use taskdeck_core::model::{NewTask, TaskStatus};
    use tempfile::tempdir;

    #[test]
    fn test_archive_counts_done_tasks() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("deck");
        let formatter = Formatter::new(OutputFormat::Text);
        {
            let mut app = App::open_or_create(&data_dir).unwrap();
            let sprint = app
                .store()
                .create_sprint("S1", "2026-03-01", "2026-03-14", SprintStatus::Active)
                .unwrap();
            let task = app
                .store()
                .create_task(NewTask {
                    title: "t".to_string(),
                    date: "2026-03-02".to_string(),
                    sprint_id: Some(sprint.id),
                    ..NewTask::default()
                })
                .unwrap();
            app.store()
                .set_task_status(task.id, TaskStatus::Done)
                .unwrap();
            app.save().unwrap();
        }

        run(
            &data_dir,
            SprintCommand::Archive {
                name: "S1".to_string(),
            },
            &formatter,
        )
        .unwrap();

        let app = App::open(&data_dir).unwrap();
        let sprint = app.store().get_sprint_by_name("S1").unwrap().unwrap();
        assert_eq!(sprint.status, SprintStatus::Completed);
        assert_eq!(sprint.archived_count, Some(1));
    }
}
