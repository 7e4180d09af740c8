//! Command-line interface definition and dispatch.

pub mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::output::{Formatter, OutputFormat};

#[derive(Parser)]
#[command(name = "taskdeck", version, about = "Local-first task tracker")]
pub struct Cli {
    /// Directory holding the store and its key-value backend.
    #[arg(long, global = true, default_value = ".taskdeck")]
    pub data_dir: PathBuf,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the data directory and an empty store.
    Init,
    /// Task operations.
    Task {
        #[command(subcommand)]
        command: commands::tasks::TaskCommand,
    },
    /// Project operations.
    Project {
        #[command(subcommand)]
        command: commands::projects::ProjectCommand,
    },
    /// Assignee operations.
    Assignee {
        #[command(subcommand)]
        command: commands::assignees::AssigneeCommand,
    },
    /// Sprint operations.
    Sprint {
        #[command(subcommand)]
        command: commands::sprints::SprintCommand,
    },
    /// Write a snapshot of the store to a file or stdout.
    Export {
        /// Destination file; stdout when omitted.
        path: Option<PathBuf>,
    },
    /// Add records from a snapshot without touching existing rows.
    Import {
        /// Snapshot file to read.
        path: PathBuf,
    },
    /// Reconcile a snapshot from another device into the store.
    Merge {
        /// Snapshot file to read.
        path: PathBuf,
    },
    /// Inspect stored blobs and report on store health.
    Doctor {
        /// Also delete legacy storage keys after the report.
        #[arg(long)]
        clear_legacy: bool,
    },
}

/// Dispatch a parsed command line.
pub fn run(cli: Cli) -> Result<()> {
    let formatter = Formatter::new(cli.format);
    match cli.command {
        Commands::Init => commands::init::run_init(&cli.data_dir, &formatter),
        Commands::Task { command } => commands::tasks::run(&cli.data_dir, command, &formatter),
        Commands::Project { command } => {
            commands::projects::run(&cli.data_dir, command, &formatter)
        }
        Commands::Assignee { command } => {
            commands::assignees::run(&cli.data_dir, command, &formatter)
        }
        Commands::Sprint { command } => commands::sprints::run(&cli.data_dir, command, &formatter),
        Commands::Export { path } => {
            commands::sync::run_export(&cli.data_dir, path.as_deref(), &formatter)
        }
        Commands::Import { path } => commands::sync::run_import(&cli.data_dir, &path, &formatter),
        Commands::Merge { path } => commands::sync::run_merge(&cli.data_dir, &path, &formatter),
        Commands::Doctor { clear_legacy } => {
            commands::doctor::run_doctor(&cli.data_dir, clear_legacy, &formatter)
        }
    }
}
