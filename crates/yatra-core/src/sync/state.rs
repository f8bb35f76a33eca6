//! Device-side sync state: the canonical cache, the pending overlay, and the
//! merged view built from both.
//!
//! Every pending scan moves through
//!
//! ```text
//! Created -> Pending -> Confirmed | RejectedDuplicate | RejectedInvalid
//!            Pending <-> RetryScheduled
//! ```
//!
//! and each move is queued as a [`ScanTransition`] for the owner to publish.
//! The state is plain data; the actor in `agent` owns it and feeds it the
//! results of network calls.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use super::transport::TransportError;
use crate::config::{BackoffPolicy, DeviceConfig};
use crate::error::{Error, Result};
use crate::models::{
    Checkpoint, CheckpointId, GeoPoint, Participant, ParticipantId, ScanCursor, ScanId, ScanKey,
    ScanLogEntry, ScanLogPage, ScanSubmission, SubmitReceipt,
};
use crate::progress::{project, Projection};
use crate::roster::Roster;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanStatus {
    Pending,
    Confirmed,
    RejectedDuplicate,
    RetryScheduled,
    RejectedInvalid,
}

impl ScanStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Confirmed | Self::RejectedDuplicate | Self::RejectedInvalid
        )
    }
}

/// One step of a scan's lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanTransition {
    pub scan_id: ScanId,
    pub participant_id: ParticipantId,
    pub checkpoint_id: CheckpointId,
    /// `None` when the scan was just created on this device
    pub from: Option<ScanStatus>,
    pub to: ScanStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Immediate answer to an operator's scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum LocalOutcome {
    #[serde(rename_all = "camelCase")]
    Recorded { scan_id: ScanId },
    /// The pair is already in the merged view
    #[serde(rename_all = "camelCase")]
    AlreadyScanned { existing: ScanId, confirmed: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending { in_flight: bool },
    RetryScheduled { due: Instant },
    /// Rejected as a duplicate; keeps the pair marked until the canonical
    /// holder shows up in a poll.
    AwaitingCanonical { existing: Option<ScanId> },
}

impl Phase {
    const fn status(self) -> ScanStatus {
        match self {
            Self::Pending { .. } => ScanStatus::Pending,
            Self::RetryScheduled { .. } => ScanStatus::RetryScheduled,
            Self::AwaitingCanonical { .. } => ScanStatus::RejectedDuplicate,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingScan {
    entry: ScanLogEntry,
    phase: Phase,
    attempts: u32,
}

/// A pending scan as shown to the operator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingView {
    pub entry: ScanLogEntry,
    pub status: ScanStatus,
    pub attempts: u32,
}

/// What the UI reads: the merged log and the progress computed from it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
    /// Canonical entries followed by unconfirmed ones; one entry per pair
    pub entries: Vec<ScanLogEntry>,
    pub pending: Vec<PendingView>,
    pub projection: Projection,
    pub cursor: ScanCursor,
    pub last_poll: Option<DateTime<Utc>>,
}

impl Default for SyncSnapshot {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            pending: Vec::new(),
            projection: project(&[], &[], &[]),
            cursor: ScanCursor::START,
            last_poll: None,
        }
    }
}

enum Settle {
    Confirmed,
    Duplicate { holder: ScanId },
    BridgeDone,
}

pub struct SyncState {
    device: DeviceConfig,
    retry: BackoffPolicy,
    roster: Roster,
    canonical: Vec<ScanLogEntry>,
    canonical_by_key: HashMap<ScanKey, usize>,
    canonical_ids: HashSet<ScanId>,
    cursor: ScanCursor,
    last_poll: Option<DateTime<Utc>>,
    pending: BTreeMap<ScanId, PendingScan>,
    outbox: Vec<ScanTransition>,
}

impl SyncState {
    pub fn new(device: DeviceConfig, retry: BackoffPolicy) -> Self {
        Self {
            device,
            retry,
            roster: Roster::default(),
            canonical: Vec::new(),
            canonical_by_key: HashMap::new(),
            canonical_ids: HashSet::new(),
            cursor: ScanCursor::START,
            last_poll: None,
            pending: BTreeMap::new(),
            outbox: Vec::new(),
        }
    }

    pub const fn device(&self) -> &DeviceConfig {
        &self.device
    }

    pub const fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn set_roster(&mut self, roster: Roster) {
        self.roster = roster;
    }

    pub const fn cursor(&self) -> ScanCursor {
        self.cursor
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// The unconfirmed entry for `scan_id`, if it is still pending
    pub fn pending_entry(&self, scan_id: &ScanId) -> Option<&ScanLogEntry> {
        self.pending.get(scan_id).map(|pending| &pending.entry)
    }

    /// Transitions queued since the last call, oldest first
    pub fn drain_transitions(&mut self) -> Vec<ScanTransition> {
        std::mem::take(&mut self.outbox)
    }

    /// Record a scan locally and answer at once from the merged view.
    ///
    /// `checkpoint_id` falls back to the device's configured checkpoint.
    pub fn record_scan(
        &mut self,
        participant_id: &ParticipantId,
        checkpoint_id: Option<CheckpointId>,
        geo: Option<GeoPoint>,
    ) -> Result<LocalOutcome> {
        let checkpoint_id = checkpoint_id
            .or(self.device.checkpoint_id)
            .ok_or_else(|| Error::Validation("no checkpoint selected on this device".into()))?;
        self.check_known(participant_id, checkpoint_id)?;
        if let Some(geo) = geo {
            if !geo.is_valid() {
                return Err(Error::Validation(format!(
                    "geo out of range: lat={}, lng={}",
                    geo.lat, geo.lng
                )));
            }
        }

        let key = ScanKey::new(participant_id.clone(), checkpoint_id);
        if let Some((existing, confirmed)) = self.lookup(&key) {
            return Ok(LocalOutcome::AlreadyScanned {
                existing,
                confirmed,
            });
        }

        let entry = ScanLogEntry {
            id: ScanId::new(),
            participant_id: participant_id.clone(),
            checkpoint_id,
            scanned_at: Utc::now(),
            device_id: self.device.device_id.clone(),
            geo,
            synced: false,
        };
        let scan_id = entry.id;
        self.outbox
            .push(transition(&entry, None, ScanStatus::Pending, 0, None));
        self.pending.insert(
            scan_id,
            PendingScan {
                entry,
                phase: Phase::Pending { in_flight: false },
                attempts: 0,
            },
        );
        Ok(LocalOutcome::Recorded { scan_id })
    }

    /// Record a scan from a badge's QR payload
    ///
    /// A token missing from the cached roster is `Error::NotFound`; a known
    /// badge that cannot be recorded is `Error::Validation`.
    pub fn record_token_scan(
        &mut self,
        token: &str,
        checkpoint_id: Option<CheckpointId>,
        geo: Option<GeoPoint>,
    ) -> Result<LocalOutcome> {
        let participant_id = self
            .roster
            .find_by_token(token)
            .map(|participant| participant.id.clone())
            .ok_or_else(|| Error::NotFound(format!("unknown badge token {}", token.trim())))?;
        self.record_scan(&participant_id, checkpoint_id, geo)
    }

    /// Put back a scan that was still pending when the device stopped
    pub fn restore(&mut self, entry: ScanLogEntry, attempts: u32) {
        if self.canonical_ids.contains(&entry.id) || self.pending.contains_key(&entry.id) {
            return;
        }
        self.outbox.push(transition(
            &entry,
            None,
            ScanStatus::Pending,
            attempts,
            Some("restored from journal".to_string()),
        ));
        self.pending.insert(
            entry.id,
            PendingScan {
                entry: ScanLogEntry {
                    synced: false,
                    ..entry
                },
                phase: Phase::Pending { in_flight: false },
                attempts,
            },
        );
    }

    /// Mark every scan that should be sent now as in flight and return them
    pub fn take_due(&mut self, now: Instant) -> Vec<ScanSubmission> {
        let mut due = Vec::new();
        for pending in self.pending.values_mut() {
            match pending.phase {
                Phase::Pending { in_flight: false } => {}
                Phase::RetryScheduled { due: at } if at <= now => {
                    self.outbox.push(transition(
                        &pending.entry,
                        Some(ScanStatus::RetryScheduled),
                        ScanStatus::Pending,
                        pending.attempts,
                        None,
                    ));
                }
                _ => continue,
            }
            pending.phase = Phase::Pending { in_flight: true };
            due.push(ScanSubmission::from(&pending.entry));
        }
        due
    }

    /// Earliest scheduled retry, if any
    pub fn next_retry_due(&self) -> Option<Instant> {
        self.pending
            .values()
            .filter_map(|pending| match pending.phase {
                Phase::RetryScheduled { due } => Some(due),
                _ => None,
            })
            .min()
    }

    /// Fold a submission receipt. Returns `true` when the canonical holder of
    /// a duplicate has not been seen yet and a poll should follow.
    pub fn apply_receipt(&mut self, scan_id: ScanId, receipt: SubmitReceipt, now: Instant) -> bool {
        let Some(pending) = self.pending.get(&scan_id) else {
            // Already settled by a poll
            return false;
        };
        let key = pending.entry.key();

        if receipt.success {
            if let Some(pending) = self.pending.remove(&scan_id) {
                self.outbox.push(transition(
                    &pending.entry,
                    Some(pending.phase.status()),
                    ScanStatus::Confirmed,
                    pending.attempts,
                    None,
                ));
                self.fold_canonical(pending.entry);
            }
            return false;
        }

        if !receipt.duplicate {
            self.apply_failure(
                scan_id,
                TransportError::Transient("receipt neither accepted nor duplicate".to_string()),
                now,
            );
            return false;
        }

        let existing = receipt.existing_scan_id;
        let detail = existing.map(|existing| format!("held by {existing}"));
        if self.canonical_by_key.contains_key(&key) {
            if let Some(pending) = self.pending.remove(&scan_id) {
                self.outbox.push(transition(
                    &pending.entry,
                    Some(pending.phase.status()),
                    ScanStatus::RejectedDuplicate,
                    pending.attempts,
                    detail,
                ));
            }
            return false;
        }

        if let Some(pending) = self.pending.get_mut(&scan_id) {
            self.outbox.push(transition(
                &pending.entry,
                Some(pending.phase.status()),
                ScanStatus::RejectedDuplicate,
                pending.attempts,
                detail,
            ));
            pending.phase = Phase::AwaitingCanonical { existing };
        }
        true
    }

    /// Fold a failed submission
    pub fn apply_failure(&mut self, scan_id: ScanId, error: TransportError, now: Instant) {
        match error {
            TransportError::Transient(message) => {
                let Some(pending) = self.pending.get_mut(&scan_id) else {
                    return;
                };
                pending.attempts = pending.attempts.saturating_add(1);
                let delay = self.retry.delay_for(pending.attempts);
                tracing::debug!(
                    scan_id = %scan_id,
                    attempts = pending.attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %message,
                    "Submission will be retried"
                );
                self.outbox.push(transition(
                    &pending.entry,
                    Some(pending.phase.status()),
                    ScanStatus::RetryScheduled,
                    pending.attempts,
                    Some(message),
                ));
                pending.phase = Phase::RetryScheduled { due: now + delay };
            }
            TransportError::Validation(message) => self.reject(scan_id, message),
            TransportError::Conflict(message) => {
                tracing::error!(scan_id = %scan_id, detail = %message, "Scan conflict reported by server");
                self.reject(scan_id, message);
            }
        }
    }

    fn reject(&mut self, scan_id: ScanId, message: String) {
        if let Some(pending) = self.pending.remove(&scan_id) {
            self.outbox.push(transition(
                &pending.entry,
                Some(pending.phase.status()),
                ScanStatus::RejectedInvalid,
                pending.attempts,
                Some(message),
            ));
        }
    }

    /// Replace the cached roster with a fresh fetch
    pub fn apply_roster(&mut self, participants: Vec<Participant>, checkpoints: Vec<Checkpoint>) {
        self.roster = Roster::new(participants, checkpoints);
    }

    /// Fold a page of the canonical log and settle pending scans it answers
    pub fn apply_canonical_page(&mut self, page: ScanLogPage) {
        for entry in page.entries {
            self.fold_canonical(entry);
        }
        self.cursor = self.cursor.max(page.cursor);
        self.last_poll = Some(Utc::now());
        self.settle_against_canonical();
    }

    fn fold_canonical(&mut self, mut entry: ScanLogEntry) {
        if self.canonical_ids.contains(&entry.id) {
            return;
        }
        let key = entry.key();
        if let Some(&index) = self.canonical_by_key.get(&key) {
            tracing::error!(
                pair = %key,
                kept = %self.canonical[index].id,
                dropped = %entry.id,
                "Canonical log holds two entries for one pair"
            );
            return;
        }
        entry.synced = true;
        self.canonical_ids.insert(entry.id);
        self.canonical_by_key.insert(key, self.canonical.len());
        self.canonical.push(entry);
    }

    fn canonical_holder(&self, key: &ScanKey) -> Option<ScanId> {
        self.canonical_by_key
            .get(key)
            .map(|&index| self.canonical[index].id)
    }

    fn settle_against_canonical(&mut self) {
        let settled: Vec<(ScanId, Settle)> = self
            .pending
            .iter()
            .filter_map(|(id, pending)| {
                let holder = self.canonical_holder(&pending.entry.key())?;
                if holder == *id {
                    return Some((*id, Settle::Confirmed));
                }
                match pending.phase {
                    // The receipt will settle it
                    Phase::Pending { in_flight: true } => None,
                    Phase::AwaitingCanonical { .. } => Some((*id, Settle::BridgeDone)),
                    Phase::Pending { in_flight: false } | Phase::RetryScheduled { .. } => {
                        Some((*id, Settle::Duplicate { holder }))
                    }
                }
            })
            .collect();

        for (id, settle) in settled {
            let Some(pending) = self.pending.remove(&id) else {
                continue;
            };
            let from = Some(pending.phase.status());
            match settle {
                Settle::Confirmed => self.outbox.push(transition(
                    &pending.entry,
                    from,
                    ScanStatus::Confirmed,
                    pending.attempts,
                    None,
                )),
                Settle::Duplicate { holder } => self.outbox.push(transition(
                    &pending.entry,
                    from,
                    ScanStatus::RejectedDuplicate,
                    pending.attempts,
                    Some(format!("held by {holder}")),
                )),
                Settle::BridgeDone => {}
            }
        }
    }

    fn check_known(&self, participant_id: &ParticipantId, checkpoint_id: CheckpointId) -> Result<()> {
        if self.roster.participant_count() > 0 {
            match self.roster.participant(participant_id) {
                None => {
                    return Err(Error::Validation(format!(
                        "unknown participant {participant_id}"
                    )))
                }
                Some(participant) if !participant.is_active => {
                    return Err(Error::Validation(format!(
                        "participant {participant_id} is not active"
                    )))
                }
                Some(_) => {}
            }
        }
        if !self.roster.checkpoints().is_empty() && self.roster.checkpoint(checkpoint_id).is_none() {
            return Err(Error::Validation(format!(
                "unknown checkpoint {checkpoint_id}"
            )));
        }
        Ok(())
    }

    /// Who holds `key` in the merged view, and whether that entry is canonical
    fn lookup(&self, key: &ScanKey) -> Option<(ScanId, bool)> {
        if let Some(holder) = self.canonical_holder(key) {
            return Some((holder, true));
        }
        self.pending
            .values()
            .find(|pending| pending.entry.key() == *key)
            .map(|pending| match pending.phase {
                Phase::AwaitingCanonical {
                    existing: Some(existing),
                } => (existing, false),
                _ => (pending.entry.id, false),
            })
    }

    /// Canonical entries, then pending entries for pairs not yet canonical
    pub fn merged_entries(&self) -> Vec<ScanLogEntry> {
        let mut seen: HashSet<ScanKey> = HashSet::new();
        let mut entries = self.canonical.clone();
        for pending in self.pending.values() {
            let key = pending.entry.key();
            if self.canonical_by_key.contains_key(&key) || !seen.insert(key) {
                continue;
            }
            entries.push(pending.entry.clone());
        }
        entries
    }

    pub fn pending_views(&self) -> Vec<PendingView> {
        self.pending
            .values()
            .map(|pending| PendingView {
                entry: pending.entry.clone(),
                status: pending.phase.status(),
                attempts: pending.attempts,
            })
            .collect()
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        let entries = self.merged_entries();
        let participants: Vec<Participant> = self.roster.participants().cloned().collect();
        let projection = project(&participants, self.roster.checkpoints(), &entries);
        SyncSnapshot {
            entries,
            pending: self.pending_views(),
            projection,
            cursor: self.cursor,
            last_poll: self.last_poll,
        }
    }
}

fn transition(
    entry: &ScanLogEntry,
    from: Option<ScanStatus>,
    to: ScanStatus,
    attempts: u32,
    detail: Option<String>,
) -> ScanTransition {
    ScanTransition {
        scan_id: entry.id,
        participant_id: entry.participant_id.clone(),
        checkpoint_id: entry.checkpoint_id,
        from,
        to,
        attempts,
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn state() -> SyncState {
        let mut device = DeviceConfig::new("gate-a");
        device.checkpoint_id = Some(CheckpointId::new(1));
        let mut state = SyncState::new(
            device,
            BackoffPolicy {
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
                multiplier: 2.0,
            },
        );
        state.apply_roster(
            vec![
                Participant::new("p-1", "Asha", "PALITANA_YATRA_1"),
                Participant::new("p-2", "Bela", "PALITANA_YATRA_2"),
            ],
            vec![
                Checkpoint::new(1, "Base", 1, 1),
                Checkpoint::new(2, "Summit", 1, 2),
            ],
        );
        state
    }

    fn recorded(outcome: LocalOutcome) -> ScanId {
        match outcome {
            LocalOutcome::Recorded { scan_id } => scan_id,
            LocalOutcome::AlreadyScanned { .. } => panic!("expected a new scan"),
        }
    }

    fn canonical_entry(participant: &str, checkpoint: i64, device: &str) -> ScanLogEntry {
        ScanLogEntry {
            id: ScanId::new(),
            participant_id: participant.into(),
            checkpoint_id: CheckpointId::new(checkpoint),
            scanned_at: Utc::now(),
            device_id: device.to_string(),
            geo: None,
            synced: true,
        }
    }

    fn page(entries: Vec<ScanLogEntry>, cursor: i64) -> ScanLogPage {
        ScanLogPage {
            entries,
            cursor: ScanCursor::new(cursor),
            has_more: false,
        }
    }

    fn statuses(state: &mut SyncState) -> Vec<ScanStatus> {
        state
            .drain_transitions()
            .into_iter()
            .map(|transition| transition.to)
            .collect()
    }

    #[test]
    fn second_scan_of_pair_answers_already_scanned() {
        let mut state = state();
        let first = recorded(state.record_scan(&"p-1".into(), None, None).unwrap());

        let again = state.record_scan(&"p-1".into(), None, None).unwrap();
        assert_eq!(
            again,
            LocalOutcome::AlreadyScanned {
                existing: first,
                confirmed: false
            }
        );
        assert_eq!(state.snapshot().projection.total_scans(&"p-1".into()), 1);
        assert_eq!(statuses(&mut state), vec![ScanStatus::Pending]);
    }

    #[test]
    fn accepted_receipt_folds_without_double_counting() {
        let mut state = state();
        let now = Instant::now();
        let scan_id = recorded(state.record_scan(&"p-1".into(), None, None).unwrap());
        let sent = state.take_due(now);
        assert_eq!(sent.len(), 1);

        assert!(!state.apply_receipt(scan_id, SubmitReceipt::accepted(scan_id), now));
        assert_eq!(state.pending_count(), 0);
        assert_eq!(state.snapshot().projection.total_scans(&"p-1".into()), 1);

        // A later poll returns the same entry
        let mut landed = sent[0].clone().into_entry();
        landed.synced = true;
        state.apply_canonical_page(page(vec![landed], 1));
        let snapshot = state.snapshot();
        assert_eq!(snapshot.entries.len(), 1);
        assert!(snapshot.entries[0].synced);
        assert_eq!(
            statuses(&mut state),
            vec![ScanStatus::Pending, ScanStatus::Confirmed]
        );
    }

    #[test]
    fn poll_racing_receipt_confirms_once() {
        let mut state = state();
        let now = Instant::now();
        let scan_id = recorded(state.record_scan(&"p-1".into(), None, None).unwrap());
        let sent = state.take_due(now);

        state.apply_canonical_page(page(vec![sent[0].clone().into_entry()], 1));
        assert_eq!(state.snapshot().projection.total_scans(&"p-1".into()), 1);
        assert!(!state.apply_receipt(scan_id, SubmitReceipt::accepted(scan_id), now));

        assert_eq!(state.snapshot().entries.len(), 1);
        assert_eq!(
            statuses(&mut state),
            vec![ScanStatus::Pending, ScanStatus::Confirmed]
        );
    }

    #[test]
    fn duplicate_bridges_until_holder_is_fetched() {
        let mut state = state();
        let now = Instant::now();
        let scan_id = recorded(state.record_scan(&"p-2".into(), None, None).unwrap());
        state.take_due(now);

        let holder = canonical_entry("p-2", 1, "gate-b");
        assert!(state.apply_receipt(scan_id, SubmitReceipt::duplicate(scan_id, holder.id), now));

        let bridged = state.snapshot();
        assert_eq!(bridged.projection.total_scans(&"p-2".into()), 1);
        assert_eq!(bridged.pending[0].status, ScanStatus::RejectedDuplicate);
        assert_eq!(
            state.record_scan(&"p-2".into(), None, None).unwrap(),
            LocalOutcome::AlreadyScanned {
                existing: holder.id,
                confirmed: false
            }
        );

        state.apply_canonical_page(page(vec![holder.clone()], 1));
        let settled = state.snapshot();
        assert_eq!(settled.projection.total_scans(&"p-2".into()), 1);
        assert!(settled.pending.is_empty());
        assert_eq!(settled.entries[0].id, holder.id);
        assert_eq!(
            statuses(&mut state),
            vec![ScanStatus::Pending, ScanStatus::RejectedDuplicate]
        );
    }

    #[test]
    fn transient_failure_schedules_retry_with_same_id() {
        let mut state = state();
        let now = Instant::now();
        let scan_id = recorded(state.record_scan(&"p-1".into(), Some(CheckpointId::new(2)), None).unwrap());
        state.take_due(now);

        state.apply_failure(scan_id, TransportError::Transient("timed out".into()), now);
        assert_eq!(state.next_retry_due(), Some(now + Duration::from_millis(100)));
        assert!(state.take_due(now).is_empty());

        let retried = state.take_due(now + Duration::from_millis(100));
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].scan_id, scan_id);

        state.apply_failure(scan_id, TransportError::Transient("offline".into()), now);
        assert_eq!(state.next_retry_due(), Some(now + Duration::from_millis(200)));
        assert_eq!(state.snapshot().projection.total_scans(&"p-1".into()), 1);
        assert_eq!(
            statuses(&mut state),
            vec![
                ScanStatus::Pending,
                ScanStatus::RetryScheduled,
                ScanStatus::Pending,
                ScanStatus::RetryScheduled
            ]
        );
    }

    #[test]
    fn validation_failure_is_terminal() {
        let mut state = state();
        let now = Instant::now();
        let scan_id = recorded(state.record_scan(&"p-1".into(), None, None).unwrap());
        state.take_due(now);
        state.apply_failure(scan_id, TransportError::Validation("unknown participant".into()), now);

        assert_eq!(state.pending_count(), 0);
        assert!(state.snapshot().entries.is_empty());
        let last = state.drain_transitions().pop().unwrap();
        assert_eq!(last.to, ScanStatus::RejectedInvalid);
        assert_eq!(last.detail.as_deref(), Some("unknown participant"));
    }

    #[test]
    fn poll_settles_queued_scan_taken_by_another_device() {
        let mut state = state();
        let now = Instant::now();
        let scan_id = recorded(state.record_scan(&"p-1".into(), None, None).unwrap());
        state.take_due(now);
        state.apply_failure(scan_id, TransportError::Transient("offline".into()), now);

        state.apply_canonical_page(page(vec![canonical_entry("p-1", 1, "gate-b")], 1));
        assert_eq!(state.pending_count(), 0);
        assert_eq!(state.snapshot().projection.total_scans(&"p-1".into()), 1);
        assert_eq!(
            state.drain_transitions().pop().unwrap().to,
            ScanStatus::RejectedDuplicate
        );
    }

    #[test]
    fn token_scans_and_unknown_references() {
        let mut state = state();
        let outcome = state.record_token_scan("PALITANA_YATRA_2", None, None).unwrap();
        assert!(matches!(outcome, LocalOutcome::Recorded { .. }));

        assert!(matches!(
            state.record_token_scan("PALITANA_YATRA_99", None, None),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            state.record_scan(&"p-1".into(), Some(CheckpointId::new(7)), None),
            Err(Error::Validation(_))
        ));

        let mut roaming = SyncState::new(DeviceConfig::new("roaming"), BackoffPolicy::default());
        assert!(matches!(
            roaming.record_scan(&"p-1".into(), None, None),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn restored_scans_resume_pending() {
        let mut state = state();
        let entry = canonical_entry("p-1", 2, "gate-a");
        state.restore(entry.clone(), 3);
        state.restore(entry.clone(), 3);

        assert_eq!(state.pending_count(), 1);
        let sent = state.take_due(Instant::now());
        assert_eq!(sent[0].scan_id, entry.id);
        assert!(!state.snapshot().entries[0].synced);
    }

    #[test]
    fn cursor_only_moves_forward() {
        let mut state = state();
        state.apply_canonical_page(page(Vec::new(), 5));
        state.apply_canonical_page(page(Vec::new(), 3));
        assert_eq!(state.cursor(), ScanCursor::new(5));
    }
}
