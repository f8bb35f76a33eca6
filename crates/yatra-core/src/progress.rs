//! Progress projection: fold participants and a scan log into per-participant
//! progress and per-checkpoint statistics.
//!
//! [`project`] is pure and deterministic, so devices and the server compute
//! identical numbers from identical inputs.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Checkpoint, CheckpointId, Participant, ParticipantId, ScanLogEntry};

/// How far one participant has come
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantProgress {
    pub participant_id: ParticipantId,
    pub scanned_checkpoints: BTreeSet<CheckpointId>,
    /// Distinct checkpoints reached
    pub total_scans: usize,
    pub last_scan_time: Option<DateTime<Utc>>,
    pub last_checkpoint: Option<CheckpointId>,
    pub completed: bool,
}

impl ParticipantProgress {
    fn empty(participant_id: ParticipantId) -> Self {
        Self {
            participant_id,
            scanned_checkpoints: BTreeSet::new(),
            total_scans: 0,
            last_scan_time: None,
            last_checkpoint: None,
            completed: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointStats {
    pub checkpoint_id: CheckpointId,
    pub unique_participants_reached: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    pub total_participants: usize,
    pub total_checkpoints: usize,
    /// Participants with at least one checkpoint
    pub started: usize,
    pub completed: usize,
    /// Entries naming a participant or checkpoint outside the inputs
    pub ignored_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub per_participant: BTreeMap<ParticipantId, ParticipantProgress>,
    pub per_checkpoint: BTreeMap<CheckpointId, CheckpointStats>,
    pub summary: ProgressSummary,
}

impl Projection {
    pub fn participant(&self, id: &ParticipantId) -> Option<&ParticipantProgress> {
        self.per_participant.get(id)
    }

    pub fn total_scans(&self, id: &ParticipantId) -> usize {
        self.participant(id).map_or(0, |progress| progress.total_scans)
    }
}

/// Fold `entries` over the roster.
///
/// Repeated entries for one (participant, checkpoint) count once. A
/// participant is complete when they have reached every checkpoint. Among
/// entries with equal timestamps the one applied later sets
/// `last_checkpoint`.
pub fn project<'a>(
    participants: &[Participant],
    checkpoints: &[Checkpoint],
    entries: impl IntoIterator<Item = &'a ScanLogEntry>,
) -> Projection {
    let known_checkpoints: HashSet<CheckpointId> =
        checkpoints.iter().map(|checkpoint| checkpoint.id).collect();
    let total_checkpoints = known_checkpoints.len();

    let mut per_participant: BTreeMap<ParticipantId, ParticipantProgress> = participants
        .iter()
        .map(|participant| {
            (
                participant.id.clone(),
                ParticipantProgress::empty(participant.id.clone()),
            )
        })
        .collect();

    let mut ignored_entries = 0;
    for entry in entries {
        let Some(progress) = per_participant.get_mut(&entry.participant_id) else {
            ignored_entries += 1;
            continue;
        };
        if !known_checkpoints.contains(&entry.checkpoint_id) {
            ignored_entries += 1;
            continue;
        }

        progress.scanned_checkpoints.insert(entry.checkpoint_id);
        if progress
            .last_scan_time
            .map_or(true, |last| entry.scanned_at >= last)
        {
            progress.last_scan_time = Some(entry.scanned_at);
            progress.last_checkpoint = Some(entry.checkpoint_id);
        }
    }

    let mut per_checkpoint: BTreeMap<CheckpointId, CheckpointStats> = known_checkpoints
        .iter()
        .map(|&checkpoint_id| {
            (
                checkpoint_id,
                CheckpointStats {
                    checkpoint_id,
                    unique_participants_reached: 0,
                },
            )
        })
        .collect();

    let mut summary = ProgressSummary {
        total_participants: per_participant.len(),
        total_checkpoints,
        ignored_entries,
        ..ProgressSummary::default()
    };

    for progress in per_participant.values_mut() {
        progress.total_scans = progress.scanned_checkpoints.len();
        progress.completed = total_checkpoints > 0 && progress.total_scans == total_checkpoints;

        if progress.total_scans > 0 {
            summary.started += 1;
        }
        if progress.completed {
            summary.completed += 1;
        }
        for checkpoint_id in &progress.scanned_checkpoints {
            if let Some(stats) = per_checkpoint.get_mut(checkpoint_id) {
                stats.unique_participants_reached += 1;
            }
        }
    }

    Projection {
        per_participant,
        per_checkpoint,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScanId;
    use pretty_assertions::assert_eq;

    fn roster() -> (Vec<Participant>, Vec<Checkpoint>) {
        (
            vec![
                Participant::new("p-1", "Asha", "T1"),
                Participant::new("p-2", "Bela", "T2"),
            ],
            vec![
                Checkpoint::new(1, "Base", 1, 1),
                Checkpoint::new(2, "Gate", 1, 2),
                Checkpoint::new(3, "Summit", 2, 1),
            ],
        )
    }

    fn scan(participant: &str, checkpoint: i64, millis: i64) -> ScanLogEntry {
        ScanLogEntry {
            id: ScanId::new(),
            participant_id: ParticipantId::new(participant),
            checkpoint_id: CheckpointId::new(checkpoint),
            scanned_at: DateTime::from_timestamp_millis(millis).unwrap(),
            device_id: "device".to_string(),
            geo: None,
            synced: true,
        }
    }

    #[test]
    fn counts_distinct_checkpoints() {
        let (participants, checkpoints) = roster();
        let log = vec![scan("p-1", 1, 10), scan("p-1", 1, 20), scan("p-1", 2, 30)];

        let projection = project(&participants, &checkpoints, &log);
        let progress = projection.participant(&"p-1".into()).unwrap();
        assert_eq!(progress.total_scans, 2);
        assert_eq!(
            progress.scanned_checkpoints,
            BTreeSet::from([CheckpointId::new(1), CheckpointId::new(2)])
        );
        assert!(!progress.completed);
        assert_eq!(projection.per_checkpoint[&CheckpointId::new(1)].unique_participants_reached, 1);
    }

    #[test]
    fn completion_requires_every_checkpoint() {
        let (participants, checkpoints) = roster();
        let log = vec![scan("p-2", 1, 1), scan("p-2", 2, 2), scan("p-2", 3, 3)];

        let projection = project(&participants, &checkpoints, &log);
        assert!(projection.participant(&"p-2".into()).unwrap().completed);
        assert_eq!(projection.summary.completed, 1);
        assert_eq!(projection.summary.started, 1);
        assert_eq!(projection.summary.total_participants, 2);
    }

    #[test]
    fn no_checkpoints_means_nobody_complete() {
        let (participants, _) = roster();
        let projection = project(&participants, &[], &[]);
        assert!(projection
            .per_participant
            .values()
            .all(|progress| !progress.completed));
    }

    #[test]
    fn last_scan_time_is_maximum_and_ties_go_to_later_entry() {
        let (participants, checkpoints) = roster();
        let log = vec![scan("p-1", 2, 50), scan("p-1", 1, 10), scan("p-1", 3, 50)];

        let projection = project(&participants, &checkpoints, &log);
        let progress = projection.participant(&"p-1".into()).unwrap();
        assert_eq!(progress.last_scan_time, DateTime::from_timestamp_millis(50));
        assert_eq!(progress.last_checkpoint, Some(CheckpointId::new(3)));
    }

    #[test]
    fn ignores_entries_outside_roster() {
        let (participants, checkpoints) = roster();
        let log = vec![scan("ghost", 1, 1), scan("p-1", 99, 2), scan("p-1", 1, 3)];

        let projection = project(&participants, &checkpoints, &log);
        assert_eq!(projection.summary.ignored_entries, 2);
        assert_eq!(projection.total_scans(&"p-1".into()), 1);
        assert_eq!(projection.total_scans(&"ghost".into()), 0);
    }

    #[test]
    fn deterministic_across_input_order_for_counts() {
        let (participants, checkpoints) = roster();
        let log = vec![scan("p-1", 1, 1), scan("p-2", 2, 2), scan("p-1", 3, 3)];
        let reversed: Vec<ScanLogEntry> = log.iter().rev().cloned().collect();

        let forward = project(&participants, &checkpoints, &log);
        let backward = project(&participants, &checkpoints, &reversed);
        assert_eq!(forward.per_checkpoint, backward.per_checkpoint);
        assert_eq!(forward.summary, backward.summary);
        assert_eq!(forward, project(&participants, &checkpoints, &log));
    }
}
