//! Implementation of `taskdeck init`.

use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use crate::cli::commands::helpers::App;
use crate::output::Formatter;

#[derive(Serialize)]
struct InitOutput {
    data_dir: String,
    created: bool,
}

pub fn run_init(data_dir: &Path, formatter: &Formatter) -> Result<()> {
    let created = !data_dir.exists();
    let mut app = App::open_or_create(data_dir)?;
    app.save()?;
    formatter.print(&InitOutput {
        data_dir: data_dir.display().to_string(),
        created,
    })
}
