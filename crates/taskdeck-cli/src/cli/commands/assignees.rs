//! Implementation of `taskdeck assignee` subcommands.

use std::path::Path;

use anyhow::{anyhow, Result};
use clap::Subcommand;

use crate::cli::commands::helpers::App;
use crate::output::Formatter;

#[derive(Subcommand)]
pub enum AssigneeCommand {
    /// Create an assignee.
    Add {
        name: String,
        /// Display color, e.g. #aa3322.
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        discord_id: Option<String>,
    },
    /// List assignees.
    List,
    /// Delete an assignee; their tasks become unassigned.
    Rm { name: String },
}

pub fn run(data_dir: &Path, command: AssigneeCommand, formatter: &Formatter) -> Result<()> {
    let mut app = App::open(data_dir)?;
    match command {
        AssigneeCommand::Add {
            name,
            color,
            discord_id,
        } => {
            let assignee =
                app.store()
                    .create_assignee(&name, color.as_deref(), discord_id.as_deref())?;
            app.save()?;
            formatter.print(&assignee)
        }
        AssigneeCommand::List => {
            let assignees = app.store().list_assignees()?;
            formatter.print_list(&assignees, "No assignees.")
        }
        AssigneeCommand::Rm { name } => {
            let id = app
                .store()
                .get_assignee_by_name(&name)?
                .map(|a| a.id)
                .ok_or_else(|| anyhow!("Unknown assignee: {name}"))?;
            app.store().delete_assignee(id)?;
            app.save()?;
            formatter.print(&serde_json::json!({ "deleted": name }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use tempfile::tempdir;

    #[test]
    fn test_rm_unassigns_tasks() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("deck");
        let formatter = Formatter::new(OutputFormat::Text);
        {
            let mut app = App::open_or_create(&data_dir).unwrap();
            let a = app.store().create_assignee("sam", None, None).unwrap();
            app.store()
                .create_task(taskdeck_core::model::NewTask {
                    title: "t".to_string(),
                    date: "2026-03-01".to_string(),
                    assignee_id: Some(a.id),
                    ..taskdeck_core::model::NewTask::default()
                })
                .unwrap();
            app.save().unwrap();
        }

        run(
            &data_dir,
            AssigneeCommand::Rm {
                name: "sam".to_string(),
            },
            &formatter,
        )
        .unwrap();

        let app = App::open(&data_dir).unwrap();
        let tasks = app.store().list_tasks(true).unwrap();
        assert_eq!(tasks[0].assignee_id, None);
    }
}
