//! `SQLite` implementation of `CanonicalStore`

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};

use super::store::{CanonicalStore, InsertOutcome};
use super::Database;
use crate::error::{Error, Result};
use crate::models::{
    Checkpoint, CheckpointId, GeoPoint, Participant, ParticipantId, ScanCursor, ScanId,
    ScanLogEntry, ScanLogPage,
};

const ENTRY_COLUMNS: &str =
    "seq, id, participant_id, checkpoint_id, scanned_at, device_id, lat, lng";

/// Canonical store backed by a single `SQLite` database
///
/// The pair uniqueness is a schema constraint, so the guarantee holds even if
/// several processes share the database file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Wrap an already-migrated database
    pub fn new(database: Database) -> Self {
        Self {
            conn: Mutex::new(database.into_connection()),
        }
    }

    /// Open (and migrate) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    /// Open an in-memory store (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::poisoned("sqlite connection"))
    }

    /// Parse a scan entry from a row selected with `ENTRY_COLUMNS`
    fn parse_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, ScanLogEntry)> {
        let seq: i64 = row.get(0)?;
        let id: String = row.get(1)?;
        let id = id.parse().map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(error))
        })?;
        let scanned_at: i64 = row.get(4)?;
        let lat: Option<f64> = row.get(6)?;
        let lng: Option<f64> = row.get(7)?;

        Ok((
            seq,
            ScanLogEntry {
                id,
                participant_id: ParticipantId::new(row.get::<_, String>(2)?),
                checkpoint_id: CheckpointId::new(row.get(3)?),
                scanned_at: DateTime::from_timestamp_nanos(scanned_at),
                device_id: row.get(5)?,
                geo: lat.zip(lng).map(|(lat, lng)| GeoPoint { lat, lng }),
                synced: true,
            },
        ))
    }

    fn parse_participant(row: &rusqlite::Row<'_>) -> rusqlite::Result<Participant> {
        Ok(Participant {
            id: ParticipantId::new(row.get::<_, String>(0)?),
            name: row.get(1)?,
            qr_token: row.get(2)?,
            mobile: row.get(3)?,
            emergency_contact: row.get(4)?,
            blood_group: row.get(5)?,
            age: row.get(6)?,
            photo_uri: row.get(7)?,
            notes: row.get(8)?,
            is_active: row.get::<_, i32>(9)? != 0,
        })
    }

    fn parse_checkpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<Checkpoint> {
        Ok(Checkpoint {
            id: CheckpointId::new(row.get(0)?),
            name: row.get(1)?,
            day: row.get(2)?,
            sort_order: row.get(3)?,
        })
    }
}

impl CanonicalStore for SqliteStore {
    fn upsert_participant(&self, participant: &Participant) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO participants
                (id, name, qr_token, mobile, emergency_contact, blood_group, age, photo_uri, notes, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                qr_token = excluded.qr_token,
                mobile = excluded.mobile,
                emergency_contact = excluded.emergency_contact,
                blood_group = excluded.blood_group,
                age = excluded.age,
                photo_uri = excluded.photo_uri,
                notes = excluded.notes,
                is_active = excluded.is_active",
            params![
                participant.id.as_str(),
                participant.name,
                participant.qr_token,
                participant.mobile,
                participant.emergency_contact,
                participant.blood_group,
                participant.age,
                participant.photo_uri,
                participant.notes,
                i32::from(participant.is_active),
            ],
        )
        .map_err(|error| constraint_as_validation(error, "participant"))?;
        Ok(())
    }

    fn upsert_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO checkpoints (id, name, day, sort_order) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                day = excluded.day,
                sort_order = excluded.sort_order",
            params![
                checkpoint.id.get(),
                checkpoint.name,
                checkpoint.day,
                checkpoint.sort_order
            ],
        )?;
        Ok(())
    }

    fn get_participant(&self, id: &ParticipantId) -> Result<Option<Participant>> {
        let conn = self.lock()?;
        let participant = conn
            .query_row(
                "SELECT id, name, qr_token, mobile, emergency_contact, blood_group, age, photo_uri, notes, is_active
                 FROM participants WHERE id = ?1",
                params![id.as_str()],
                Self::parse_participant,
            )
            .optional()?;
        Ok(participant)
    }

    fn get_checkpoint(&self, id: CheckpointId) -> Result<Option<Checkpoint>> {
        let conn = self.lock()?;
        let checkpoint = conn
            .query_row(
                "SELECT id, name, day, sort_order FROM checkpoints WHERE id = ?1",
                params![id.get()],
                Self::parse_checkpoint,
            )
            .optional()?;
        Ok(checkpoint)
    }

    fn list_participants(&self) -> Result<Vec<Participant>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, qr_token, mobile, emergency_contact, blood_group, age, photo_uri, notes, is_active
             FROM participants ORDER BY id",
        )?;
        let participants = stmt
            .query_map([], Self::parse_participant)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(participants)
    }

    fn list_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, day, sort_order FROM checkpoints ORDER BY day, sort_order, id",
        )?;
        let checkpoints = stmt
            .query_map([], Self::parse_checkpoint)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(checkpoints)
    }

    fn get_scan(&self, id: &ScanId) -> Result<Option<ScanLogEntry>> {
        let conn = self.lock()?;
        let entry = conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM scan_logs WHERE id = ?1"),
                params![id.as_str()],
                Self::parse_entry,
            )
            .optional()?;
        Ok(entry.map(|(_, entry)| entry))
    }

    fn insert_scan(&self, entry: &ScanLogEntry) -> Result<InsertOutcome> {
        // Nanoseconds, so a resubmitted payload compares equal to the stored one.
        let scanned_at = entry.scanned_at.timestamp_nanos_opt().ok_or_else(|| {
            Error::Validation(format!("scannedAt {} out of range", entry.scanned_at))
        })?;
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = tx
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM scan_logs WHERE id = ?1"),
                params![entry.id.as_str()],
                Self::parse_entry,
            )
            .optional()?;
        if let Some((_, stored)) = existing {
            return if stored.same_payload(entry) {
                Ok(InsertOutcome::Replayed)
            } else {
                Err(Error::Conflict(format!(
                    "scan id {} already stored for {}",
                    entry.id,
                    stored.key()
                )))
            };
        }

        let (lat, lng) = entry.geo.map_or((None, None), |geo| (Some(geo.lat), Some(geo.lng)));
        let inserted = tx
            .execute(
                "INSERT INTO scan_logs
                    (id, participant_id, checkpoint_id, scanned_at, device_id, lat, lng, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(participant_id, checkpoint_id) DO NOTHING",
                params![
                    entry.id.as_str(),
                    entry.participant_id.as_str(),
                    entry.checkpoint_id.get(),
                    scanned_at,
                    entry.device_id,
                    lat,
                    lng,
                    Utc::now().timestamp_millis(),
                ],
            )
            .map_err(|error| constraint_as_validation(error, "scan"))?;

        let outcome = if inserted == 1 {
            InsertOutcome::Inserted
        } else {
            let holder: String = tx.query_row(
                "SELECT id FROM scan_logs WHERE participant_id = ?1 AND checkpoint_id = ?2",
                params![entry.participant_id.as_str(), entry.checkpoint_id.get()],
                |row| row.get(0),
            )?;
            let existing = holder
                .parse()
                .map_err(|_| Error::Database(format!("invalid stored scan id {holder}")))?;
            InsertOutcome::Duplicate { existing }
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn scans_since(&self, since: ScanCursor, limit: usize) -> Result<ScanLogPage> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM scan_logs WHERE seq > ?1 ORDER BY seq LIMIT ?2"
        ))?;
        let fetch = i64::try_from(limit.saturating_add(1)).unwrap_or(i64::MAX);
        let mut rows = stmt
            .query_map(params![since.get(), fetch], Self::parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let has_more = rows.len() > limit;
        rows.truncate(limit);
        let cursor = rows.last().map_or(since, |(seq, _)| ScanCursor::new(*seq));

        Ok(ScanLogPage {
            entries: rows.into_iter().map(|(_, entry)| entry).collect(),
            cursor,
            has_more,
        })
    }

    fn scan_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM scan_logs", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

/// Foreign-key and unique violations mean the caller sent bad references.
fn constraint_as_validation(error: rusqlite::Error, what: &str) -> Error {
    match &error {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            Error::Validation(format!("{what} rejected by store: {error}"))
        }
        _ => error.into(),
    }
}
