use std::path::Path;

use yatra_core::db::SqliteStore;
use yatra_core::roster::{import_roster, ImportSummary, RosterFile};

use crate::error::CliError;

pub fn run_import(roster_path: &Path, db_path: &Path) -> Result<(), CliError> {
    let summary = import_into(roster_path, db_path)?;
    println!(
        "Imported {} participants and {} checkpoints into {}",
        summary.participants,
        summary.checkpoints,
        db_path.display()
    );
    Ok(())
}

pub fn import_into(roster_path: &Path, db_path: &Path) -> Result<ImportSummary, CliError> {
    let roster = RosterFile::from_json_file(roster_path)?;
    let store = SqliteStore::open(db_path)?;
    Ok(import_roster(&store, &roster)?)
}
