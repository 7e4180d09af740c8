//! Implementation of `taskdeck project` subcommands.

use std::path::Path;

use anyhow::{anyhow, Result};
use clap::Subcommand;

use crate::cli::commands::helpers::App;
use crate::output::Formatter;

#[derive(Subcommand)]
pub enum ProjectCommand {
    /// Create a project.
    Add {
        name: String,
        #[arg(long)]
        repo_url: Option<String>,
    },
    /// List projects.
    List,
    /// Rename a project; tasks referencing it follow the new name.
    Rename { name: String, new_name: String },
    /// Delete a project; its tasks survive with a blank project.
    Rm { name: String },
}

fn require_project(app: &App, name: &str) -> Result<i64> {
    app.store()
        .get_project_by_name(name)?
        .map(|p| p.id)
        .ok_or_else(|| anyhow!("Unknown project: {name}"))
}

pub fn run(data_dir: &Path, command: ProjectCommand, formatter: &Formatter) -> Result<()> {
    let mut app = App::open(data_dir)?;
    match command {
        ProjectCommand::Add { name, repo_url } => {
            let project = app.store().create_project(&name, repo_url.as_deref())?;
            app.save()?;
            formatter.print(&project)
        }
        ProjectCommand::List => {
            let projects = app.store().list_projects()?;
            formatter.print_list(&projects, "No projects.")
        }
        ProjectCommand::Rename { name, new_name } => {
            let id = require_project(&app, &name)?;
            let project = app.store().rename_project(id, &new_name)?;
            app.save()?;
            formatter.print(&project)
        }
        ProjectCommand::Rm { name } => {
            let id = require_project(&app, &name)?;
            app.store().delete_project(id)?;
            app.save()?;
            formatter.print(&serde_json::json!({ "deleted": name }))
        }
    }
}
