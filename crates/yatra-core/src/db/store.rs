//! Canonical store contract

use crate::error::Result;
use crate::models::{
    Checkpoint, CheckpointId, Participant, ParticipantId, ScanCursor, ScanId, ScanLogEntry,
    ScanLogPage,
};

/// What an atomic check-and-insert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// New entry stored
    Inserted,
    /// The same scan id with the same payload was already stored
    Replayed,
    /// Another entry already holds the (participant, checkpoint) pair
    Duplicate { existing: ScanId },
}

/// Single source of truth for participants, checkpoints and scans
///
/// Implementations must make [`insert_scan`](Self::insert_scan) atomic: two
/// racing inserts for the same pair yield exactly one `Inserted`.
pub trait CanonicalStore: Send + Sync {
    /// Insert or replace a participant by id
    fn upsert_participant(&self, participant: &Participant) -> Result<()>;

    /// Insert or replace a checkpoint by id
    fn upsert_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Get a participant by id
    fn get_participant(&self, id: &ParticipantId) -> Result<Option<Participant>>;

    /// Get a checkpoint by id
    fn get_checkpoint(&self, id: CheckpointId) -> Result<Option<Checkpoint>>;

    /// All participants, ordered by id
    fn list_participants(&self) -> Result<Vec<Participant>>;

    /// All checkpoints, in route order
    fn list_checkpoints(&self) -> Result<Vec<Checkpoint>>;

    /// Get a stored scan by its id
    fn get_scan(&self, id: &ScanId) -> Result<Option<ScanLogEntry>>;

    /// Atomically store `entry` unless its id or pair is already present.
    ///
    /// Returns `Error::Conflict` when the id exists with a different payload.
    fn insert_scan(&self, entry: &ScanLogEntry) -> Result<InsertOutcome>;

    /// Entries stored after `since`, oldest first, at most `limit`
    fn scans_since(&self, since: ScanCursor, limit: usize) -> Result<ScanLogPage>;

    /// Number of stored scan entries
    fn scan_count(&self) -> Result<usize>;
}
