//! Database migrations

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;
    if version >= CURRENT_VERSION {
        return Ok(());
    }

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .optional()?
        .flatten()
        .unwrap_or(0);

    Ok(version)
}

fn apply(conn: &mut Connection, version: i32, statements: &str) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(statements)?;
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: canonical roster and scan log
///
/// `UNIQUE (participant_id, checkpoint_id)` is the uniqueness invariant;
/// `seq` is the cursor handed to incremental readers. `scanned_at` holds unix
/// nanoseconds.
fn migrate_v1(conn: &mut Connection) -> Result<()> {
    apply(
        conn,
        1,
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS participants (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            qr_token TEXT NOT NULL UNIQUE,
            mobile TEXT,
            emergency_contact TEXT,
            blood_group TEXT,
            age INTEGER,
            photo_uri TEXT,
            notes TEXT,
            is_active INTEGER NOT NULL DEFAULT 1
        );
        CREATE TABLE IF NOT EXISTS checkpoints (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            day INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS scan_logs (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            participant_id TEXT NOT NULL REFERENCES participants(id),
            checkpoint_id INTEGER NOT NULL REFERENCES checkpoints(id),
            scanned_at INTEGER NOT NULL,
            device_id TEXT NOT NULL,
            lat REAL,
            lng REAL,
            received_at INTEGER NOT NULL,
            UNIQUE (participant_id, checkpoint_id)
        );
        CREATE INDEX IF NOT EXISTS idx_scan_logs_checkpoint ON scan_logs(checkpoint_id);",
    )
}

/// Migration to version 2: device-side journal for the pending overlay
fn migrate_v2(conn: &mut Connection) -> Result<()> {
    apply(
        conn,
        2,
        "CREATE TABLE IF NOT EXISTS pending_scans (
            id TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );",
    )
}
