//! Implementation of `taskdeck task` subcommands.

use std::path::Path;

use anyhow::{anyhow, Result};
use clap::Subcommand;

use taskdeck_core::model::{NewTask, TaskStatus};

use crate::cli::commands::helpers::App;
use crate::output::Formatter;

#[derive(Subcommand)]
pub enum TaskCommand {
    /// Create a task.
    Add {
        title: String,
        /// Project name; must already exist when given.
        #[arg(long)]
        project: Option<String>,
        /// Scheduled date, e.g. 2026-03-01.
        #[arg(long)]
        date: String,
        /// Estimated duration in minutes.
        #[arg(long, default_value_t = 0)]
        duration: i64,
        #[arg(long)]
        category: Option<String>,
        #[arg(long, default_value = "")]
        notes: String,
        /// Assignee name; must already exist when given.
        #[arg(long)]
        assignee: Option<String>,
        /// Sprint name; must already exist when given.
        #[arg(long)]
        sprint: Option<String>,
    },
    /// List tasks.
    List {
        /// Include archived tasks.
        #[arg(long)]
        all: bool,
    },
    /// Mark a task done.
    Done { id: i64 },
    /// Delete a task.
    Rm { id: i64 },
}

pub fn run(data_dir: &Path, command: TaskCommand, formatter: &Formatter) -> Result<()> {
    let mut app = App::open(data_dir)?;
    match command {
        TaskCommand::Add {
            title,
            project,
            date,
            duration,
            category,
            notes,
            assignee,
            sprint,
        } => {
            let store = app.store();
            let project = match project {
                Some(name) => {
                    store
                        .get_project_by_name(&name)?
                        .ok_or_else(|| anyhow!("Unknown project: {name}"))?;
                    name
                }
                None => String::new(),
            };
            let assignee_id = match assignee {
                Some(name) => Some(
                    store
                        .get_assignee_by_name(&name)?
                        .ok_or_else(|| anyhow!("Unknown assignee: {name}"))?
                        .id,
                ),
                None => None,
            };
            let sprint_id = match sprint {
                Some(name) => Some(
                    store
                        .get_sprint_by_name(&name)?
                        .ok_or_else(|| anyhow!("Unknown sprint: {name}"))?
                        .id,
                ),
                None => None,
            };
            let task = store.create_task(NewTask {
                title,
                project,
                duration_minutes: duration,
                date,
                status: TaskStatus::Todo,
                category,
                notes,
                assignee_id,
                sprint_id,
                end_date: None,
            })?;
            app.save()?;
            formatter.print(&task)
        }
        TaskCommand::List { all } => {
            let tasks = app.store().list_tasks(all)?;
            formatter.print_list(&tasks, "No tasks.")
        }
        TaskCommand::Done { id } => {
            let task = app.store().set_task_status(id, TaskStatus::Done)?;
            app.save()?;
            formatter.print(&task)
        }
        TaskCommand::Rm { id } => {
            app.store().delete_task(id)?;
            app.save()?;
            formatter.print(&serde_json::json!({ "deleted": id }))
        }
    }
}
