//! Device-side journal that lets the pending overlay survive restarts

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection};

use super::Database;
use crate::error::{Error, Result};
use crate::models::{ScanId, ScanLogEntry, ScanSubmission};

/// A journaled, not-yet-confirmed scan
#[derive(Debug, Clone, PartialEq)]
pub struct JournaledScan {
    pub entry: ScanLogEntry,
    pub attempts: u32,
}

/// `SQLite`-backed store of pending scans on a device
pub struct PendingJournal {
    conn: Mutex<Connection>,
}

impl PendingJournal {
    pub fn new(database: Database) -> Self {
        Self {
            conn: Mutex::new(database.into_connection()),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::poisoned("journal connection"))
    }

    /// Record or update a pending scan
    pub fn save(&self, entry: &ScanLogEntry, attempts: u32) -> Result<()> {
        let payload = serde_json::to_string(&ScanSubmission::from(entry))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO pending_scans (id, payload, attempts, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET attempts = excluded.attempts",
            params![
                entry.id.as_str(),
                payload,
                attempts,
                Utc::now().timestamp_millis()
            ],
        )?;
        Ok(())
    }

    /// Forget a scan once the server has settled it
    pub fn remove(&self, id: &ScanId) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM pending_scans WHERE id = ?1", params![id.as_str()])?;
        Ok(())
    }

    /// Everything still pending, oldest first
    pub fn load(&self) -> Result<Vec<JournaledScan>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT payload, attempts FROM pending_scans ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(payload, attempts)| {
                let submission: ScanSubmission = serde_json::from_str(&payload)?;
                Ok(JournaledScan {
                    entry: submission.into_entry(),
                    attempts,
                })
            })
            .collect()
    }
}
