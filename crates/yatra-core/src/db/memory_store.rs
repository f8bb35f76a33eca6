//! In-memory implementation of `CanonicalStore`

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, RwLock};

use super::store::{CanonicalStore, InsertOutcome};
use crate::error::{Error, Result};
use crate::models::{
    sort_route, Checkpoint, CheckpointId, Participant, ParticipantId, ScanCursor, ScanId, ScanKey,
    ScanLogEntry, ScanLogPage,
};

const SHARD_COUNT: usize = 16;

/// Canonical store held in process memory
///
/// The check-and-insert is serialized per pair key: each key hashes to one
/// shard mutex, so submissions for unrelated pairs rarely contend. Only the
/// final append to the ordered log takes a global (short) write lock.
pub struct MemoryStore {
    participants: RwLock<BTreeMap<ParticipantId, Participant>>,
    checkpoints: RwLock<BTreeMap<CheckpointId, Checkpoint>>,
    shards: Vec<Mutex<HashMap<ScanKey, ScanId>>>,
    log: RwLock<ScanLog>,
}

#[derive(Default)]
struct ScanLog {
    entries: Vec<ScanLogEntry>,
    by_id: HashMap<ScanId, usize>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            participants: RwLock::new(BTreeMap::new()),
            checkpoints: RwLock::new(BTreeMap::new()),
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            log: RwLock::new(ScanLog::default()),
        }
    }

    fn shard(&self, key: &ScanKey) -> &Mutex<HashMap<ScanKey, ScanId>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }

    fn replay_check(stored: &ScanLogEntry, entry: &ScanLogEntry) -> Result<InsertOutcome> {
        if stored.same_payload(entry) {
            Ok(InsertOutcome::Replayed)
        } else {
            Err(Error::Conflict(format!(
                "scan id {} already stored for {}",
                entry.id,
                stored.key()
            )))
        }
    }
}

impl CanonicalStore for MemoryStore {
    fn upsert_participant(&self, participant: &Participant) -> Result<()> {
        let mut participants = self
            .participants
            .write()
            .map_err(|_| Error::poisoned("participants"))?;
        let clash = participants.values().any(|existing| {
            existing.qr_token == participant.qr_token && existing.id != participant.id
        });
        if clash {
            return Err(Error::Validation(format!(
                "qr token {} already assigned",
                participant.qr_token
            )));
        }
        participants.insert(participant.id.clone(), participant.clone());
        Ok(())
    }

    fn upsert_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints
            .write()
            .map_err(|_| Error::poisoned("checkpoints"))?
            .insert(checkpoint.id, checkpoint.clone());
        Ok(())
    }

    fn get_participant(&self, id: &ParticipantId) -> Result<Option<Participant>> {
        Ok(self
            .participants
            .read()
            .map_err(|_| Error::poisoned("participants"))?
            .get(id)
            .cloned())
    }

    fn get_checkpoint(&self, id: CheckpointId) -> Result<Option<Checkpoint>> {
        Ok(self
            .checkpoints
            .read()
            .map_err(|_| Error::poisoned("checkpoints"))?
            .get(&id)
            .cloned())
    }

    fn list_participants(&self) -> Result<Vec<Participant>> {
        Ok(self
            .participants
            .read()
            .map_err(|_| Error::poisoned("participants"))?
            .values()
            .cloned()
            .collect())
    }

    fn list_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        let mut checkpoints: Vec<Checkpoint> = self
            .checkpoints
            .read()
            .map_err(|_| Error::poisoned("checkpoints"))?
            .values()
            .cloned()
            .collect();
        sort_route(&mut checkpoints);
        Ok(checkpoints)
    }

    fn get_scan(&self, id: &ScanId) -> Result<Option<ScanLogEntry>> {
        let log = self.log.read().map_err(|_| Error::poisoned("scan log"))?;
        Ok(log.by_id.get(id).map(|&index| log.entries[index].clone()))
    }

    fn insert_scan(&self, entry: &ScanLogEntry) -> Result<InsertOutcome> {
        if self.get_participant(&entry.participant_id)?.is_none() {
            return Err(Error::Validation(format!(
                "unknown participant {}",
                entry.participant_id
            )));
        }
        if self.get_checkpoint(entry.checkpoint_id)?.is_none() {
            return Err(Error::Validation(format!(
                "unknown checkpoint {}",
                entry.checkpoint_id
            )));
        }

        let key = entry.key();
        let mut shard = self
            .shard(&key)
            .lock()
            .map_err(|_| Error::poisoned("scan shard"))?;

        {
            let log = self.log.read().map_err(|_| Error::poisoned("scan log"))?;
            if let Some(&index) = log.by_id.get(&entry.id) {
                return Self::replay_check(&log.entries[index], entry);
            }
        }

        if let Some(existing) = shard.get(&key) {
            return Ok(InsertOutcome::Duplicate {
                existing: *existing,
            });
        }

        {
            let mut log = self.log.write().map_err(|_| Error::poisoned("scan log"))?;
            // The same id may have landed under another key's shard meanwhile.
            if let Some(&index) = log.by_id.get(&entry.id) {
                return Self::replay_check(&log.entries[index], entry);
            }
            let mut stored = entry.clone();
            stored.synced = true;
            let index = log.entries.len();
            log.entries.push(stored);
            log.by_id.insert(entry.id, index);
        }

        shard.insert(key, entry.id);
        Ok(InsertOutcome::Inserted)
    }

    fn scans_since(&self, since: ScanCursor, limit: usize) -> Result<ScanLogPage> {
        let log = self.log.read().map_err(|_| Error::poisoned("scan log"))?;
        let start = usize::try_from(since.get().max(0)).unwrap_or(usize::MAX);
        let available = log.entries.get(start..).unwrap_or_default();
        let entries: Vec<ScanLogEntry> = available.iter().take(limit).cloned().collect();
        let end = start + entries.len();

        Ok(ScanLogPage {
            has_more: available.len() > entries.len(),
            cursor: ScanCursor::new(i64::try_from(end).unwrap_or(i64::MAX)),
            entries,
        })
    }

    fn scan_count(&self) -> Result<usize> {
        Ok(self
            .log
            .read()
            .map_err(|_| Error::poisoned("scan log"))?
            .entries
            .len())
    }
}
