//! Roster files, import into the canonical store, and the device-side cache

mod verify;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::db::CanonicalStore;
use crate::error::{Error, Result};
use crate::models::{sort_route, Checkpoint, CheckpointId, Participant, ParticipantId};

pub use verify::{
    compare_with_reference, verify_roster, Discrepancy, ReferenceAge, ReferenceRecord,
    RosterIssue, RosterReport,
};

/// Token prefix printed on badges; the badge number follows it.
pub const DEFAULT_TOKEN_PREFIX: &str = "PALITANA_YATRA_";

/// Roster file as produced by registration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RosterFile {
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
}

impl RosterFile {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Reject rosters that could never import cleanly
    pub fn validate(&self) -> Result<()> {
        let mut tokens = HashSet::new();
        let mut ids = HashSet::new();
        for participant in &self.participants {
            if participant.id.as_str().trim().is_empty() {
                return Err(Error::Validation(format!(
                    "participant '{}' has an empty id",
                    participant.name
                )));
            }
            if participant.qr_token.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "participant {} has an empty qr token",
                    participant.id
                )));
            }
            if !ids.insert(&participant.id) {
                return Err(Error::Validation(format!(
                    "participant {} listed twice",
                    participant.id
                )));
            }
            if !tokens.insert(participant.qr_token.as_str()) {
                return Err(Error::Validation(format!(
                    "qr token {} assigned to more than one participant",
                    participant.qr_token
                )));
            }
        }

        let mut checkpoint_ids = HashSet::new();
        for checkpoint in &self.checkpoints {
            if !checkpoint_ids.insert(checkpoint.id) {
                return Err(Error::Validation(format!(
                    "checkpoint {} listed twice",
                    checkpoint.id
                )));
            }
        }
        Ok(())
    }
}

/// Counts from a roster import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub participants: usize,
    pub checkpoints: usize,
}

/// Upsert every checkpoint and participant in `roster`.
///
/// Existing records with the same id are replaced. Scans are untouched.
pub fn import_roster(store: &dyn CanonicalStore, roster: &RosterFile) -> Result<ImportSummary> {
    roster.validate()?;

    for checkpoint in &roster.checkpoints {
        store.upsert_checkpoint(checkpoint)?;
    }
    for participant in &roster.participants {
        store.upsert_participant(participant)?;
    }

    let summary = ImportSummary {
        participants: roster.participants.len(),
        checkpoints: roster.checkpoints.len(),
    };
    tracing::info!(
        participants = summary.participants,
        checkpoints = summary.checkpoints,
        "Roster imported"
    );
    Ok(summary)
}

/// Read-only roster snapshot kept by a device
#[derive(Debug, Clone, Default)]
pub struct Roster {
    participants: BTreeMap<ParticipantId, Participant>,
    by_token: HashMap<String, ParticipantId>,
    checkpoints: Vec<Checkpoint>,
}

impl Roster {
    pub fn new(participants: Vec<Participant>, mut checkpoints: Vec<Checkpoint>) -> Self {
        sort_route(&mut checkpoints);
        let by_token = participants
            .iter()
            .map(|participant| {
                (
                    participant.qr_token.trim().to_string(),
                    participant.id.clone(),
                )
            })
            .collect();
        let participants = participants
            .into_iter()
            .map(|participant| (participant.id.clone(), participant))
            .collect();
        Self {
            participants,
            by_token,
            checkpoints,
        }
    }

    /// Resolve a scanned QR payload to its participant
    pub fn find_by_token(&self, token: &str) -> Option<&Participant> {
        let id = self.by_token.get(token.trim())?;
        self.participants.get(id)
    }

    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn checkpoint(&self, id: CheckpointId) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|checkpoint| checkpoint.id == id)
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Checkpoints in route order
    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty() && self.checkpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use pretty_assertions::assert_eq;

    const ROSTER_JSON: &str = r#"{
        "participants": [
            {"id": "0b9e4c1a-8f1e-4c43-9f0a-1d2b3c4d5e6f", "name": "Asha Shah", "qrToken": "PALITANA_YATRA_1", "age": 16},
            {"id": "7c1d2e3f-4a5b-4c6d-8e9f-a0b1c2d3e4f5", "name": "Bela Mehta", "qrToken": "PALITANA_YATRA_2", "bloodGroup": "B+"}
        ],
        "checkpoints": [
            {"id": 2, "name": "Summit", "day": 1, "sortOrder": 2},
            {"id": 1, "name": "Base", "day": 1, "sortOrder": 1}
        ]
    }"#;

    #[test]
    fn parses_and_imports() {
        let roster = RosterFile::from_json_str(ROSTER_JSON).unwrap();
        let store = MemoryStore::new();

        let summary = import_roster(&store, &roster).unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                participants: 2,
                checkpoints: 2
            }
        );
        assert_eq!(store.list_participants().unwrap().len(), 2);

        // Re-import is an upsert
        import_roster(&store, &roster).unwrap();
        assert_eq!(store.list_checkpoints().unwrap().len(), 2);
    }

    #[test]
    fn rejects_unknown_fields_and_shared_tokens() {
        assert!(RosterFile::from_json_str(r#"{"volunteers": []}"#).is_err());

        let mut roster = RosterFile::from_json_str(ROSTER_JSON).unwrap();
        roster.participants[1].qr_token = "PALITANA_YATRA_1".to_string();
        assert!(matches!(roster.validate(), Err(Error::Validation(_))));
        assert!(import_roster(&MemoryStore::new(), &roster).is_err());
    }

    #[test]
    fn finds_participant_by_token() {
        let file = RosterFile::from_json_str(ROSTER_JSON).unwrap();
        let roster = Roster::new(file.participants, file.checkpoints);

        let found = roster.find_by_token(" PALITANA_YATRA_2\n").unwrap();
        assert_eq!(found.name, "Bela Mehta");
        assert!(roster.find_by_token("PALITANA_YATRA_3").is_none());
        assert_eq!(roster.checkpoints()[0].name, "Base");
        assert!(roster.checkpoint(CheckpointId::new(2)).is_some());
    }
}
