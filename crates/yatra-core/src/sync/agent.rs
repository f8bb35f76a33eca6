//! Per-device sync actor.
//!
//! One task owns the [`SyncState`]. Submissions and polls run as separate
//! tasks whose results come back to that owner, so the pending set has a
//! single writer. Callers talk to it through a cloneable [`SyncHandle`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::state::{LocalOutcome, ScanStatus, ScanTransition, SyncSnapshot, SyncState};
use super::transport::{SyncTransport, TransportError, TransportResult};
use crate::config::{AgentConfig, DeviceConfig};
use crate::db::PendingJournal;
use crate::error::{Error, Result};
use crate::models::{
    Checkpoint, CheckpointId, GeoPoint, Participant, ParticipantId, ScanCursor, ScanId,
    ScanLogPage, SubmitReceipt,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const COMMAND_CHANNEL_CAPACITY: usize = 64;

enum Command {
    Record {
        participant_id: ParticipantId,
        checkpoint_id: Option<CheckpointId>,
        geo: Option<GeoPoint>,
        reply: oneshot::Sender<Result<LocalOutcome>>,
    },
    RecordToken {
        token: String,
        checkpoint_id: Option<CheckpointId>,
        geo: Option<GeoPoint>,
        reply: oneshot::Sender<Result<LocalOutcome>>,
    },
    PollNow,
}

struct PollBatch {
    participants: Vec<Participant>,
    checkpoints: Vec<Checkpoint>,
    pages: Vec<ScanLogPage>,
}

pub struct SyncAgent {
    transport: Arc<dyn SyncTransport>,
    config: AgentConfig,
    state: SyncState,
    journal: Option<Arc<PendingJournal>>,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<ScanTransition>,
    snapshots: watch::Sender<SyncSnapshot>,
    cancel: CancellationToken,
    submissions: JoinSet<(ScanId, TransportResult<SubmitReceipt>)>,
    polls: JoinSet<TransportResult<PollBatch>>,
    poll_requested: bool,
    dirty: bool,
}

/// Cloneable front door to a running [`SyncAgent`]
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<ScanTransition>,
    snapshots: watch::Receiver<SyncSnapshot>,
    cancel: CancellationToken,
}

impl SyncAgent {
    pub fn new(
        transport: Arc<dyn SyncTransport>,
        device: DeviceConfig,
        config: AgentConfig,
    ) -> (Self, SyncHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(SyncSnapshot::default());
        let cancel = CancellationToken::new();

        let handle = SyncHandle {
            commands: command_tx,
            events: events.clone(),
            snapshots: snapshot_rx,
            cancel: cancel.clone(),
        };
        let agent = Self {
            transport,
            state: SyncState::new(device, config.retry),
            config,
            journal: None,
            commands: command_rx,
            events,
            snapshots: snapshot_tx,
            cancel,
            submissions: JoinSet::new(),
            polls: JoinSet::new(),
            poll_requested: false,
            dirty: true,
        };
        (agent, handle)
    }

    /// Persist pending scans so they survive a restart
    #[must_use]
    pub fn with_journal(mut self, journal: Arc<PendingJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub const fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn record_scan(
        &mut self,
        participant_id: &ParticipantId,
        checkpoint_id: Option<CheckpointId>,
        geo: Option<GeoPoint>,
    ) -> Result<LocalOutcome> {
        let outcome = self.state.record_scan(participant_id, checkpoint_id, geo);
        self.after_record(&outcome);
        outcome
    }

    /// Resolve a badge token through the cached roster and record it
    pub fn record_token_scan(
        &mut self,
        token: &str,
        checkpoint_id: Option<CheckpointId>,
        geo: Option<GeoPoint>,
    ) -> Result<LocalOutcome> {
        let outcome = self.state.record_token_scan(token, checkpoint_id, geo);
        self.after_record(&outcome);
        outcome
    }

    fn after_record(&mut self, outcome: &Result<LocalOutcome>) {
        match outcome {
            Ok(LocalOutcome::Recorded { scan_id }) => {
                tracing::debug!(scan_id = %scan_id, "Scan recorded locally");
                self.dirty = true;
            }
            Ok(LocalOutcome::AlreadyScanned { existing, confirmed }) => {
                tracing::debug!(existing = %existing, confirmed, "Pair already scanned");
            }
            Err(error) => tracing::warn!(error = %error, "Scan not recorded"),
        }
        self.flush();
    }

    /// Drive the agent until cancelled
    pub async fn run(mut self) {
        self.restore_journal();
        self.flush();

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            device = %self.state.device().device_id,
            poll_interval_ms = u64::try_from(self.config.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "Sync agent started"
        );

        loop {
            self.dispatch_due();
            let retry_at = self.state.next_retry_due();

            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.poll_requested = true,
                Some(command) = self.commands.recv() => self.handle_command(command),
                Some(joined) = self.submissions.join_next() => self.handle_submission(joined),
                Some(joined) = self.polls.join_next() => self.handle_poll(joined),
                () = sleep_until(retry_at) => {}
            }

            if self.poll_requested && self.polls.is_empty() {
                self.start_poll();
            }
            self.flush();
        }

        self.submissions.shutdown().await;
        self.polls.shutdown().await;
        tracing::info!(
            device = %self.state.device().device_id,
            pending = self.state.pending_count(),
            "Sync agent stopped"
        );
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Record {
                participant_id,
                checkpoint_id,
                geo,
                reply,
            } => {
                let outcome = self.record_scan(&participant_id, checkpoint_id, geo);
                let _ = reply.send(outcome);
            }
            Command::RecordToken {
                token,
                checkpoint_id,
                geo,
                reply,
            } => {
                let outcome = self.record_token_scan(&token, checkpoint_id, geo);
                let _ = reply.send(outcome);
            }
            Command::PollNow => self.poll_requested = true,
        }
    }

    fn dispatch_due(&mut self) {
        for submission in self.state.take_due(Instant::now()) {
            let transport = Arc::clone(&self.transport);
            let limit = self.config.submit_timeout;
            self.dirty = true;
            self.submissions.spawn(async move {
                let scan_id = submission.scan_id;
                let result = with_timeout(limit, transport.submit_scan(&submission)).await;
                (scan_id, result)
            });
        }
    }

    fn handle_submission(
        &mut self,
        joined: std::result::Result<(ScanId, TransportResult<SubmitReceipt>), JoinError>,
    ) {
        let (scan_id, result) = match joined {
            Ok(output) => output,
            Err(error) => {
                tracing::error!(error = %error, "Submission task failed");
                return;
            }
        };

        let now = Instant::now();
        match result {
            Ok(receipt) => {
                if self.state.apply_receipt(scan_id, receipt, now) {
                    self.poll_requested = true;
                }
            }
            Err(error) => self.state.apply_failure(scan_id, error, now),
        }
        self.dirty = true;
    }

    fn start_poll(&mut self) {
        self.poll_requested = false;
        let transport = Arc::clone(&self.transport);
        let cursor = self.state.cursor();
        let page_size = self.config.page_size;
        let limit = self.config.submit_timeout;
        self.polls
            .spawn(fetch_updates(transport, cursor, page_size, limit));
    }

    fn handle_poll(&mut self, joined: std::result::Result<TransportResult<PollBatch>, JoinError>) {
        match joined {
            Ok(Ok(batch)) => {
                let fetched: usize = batch.pages.iter().map(|page| page.entries.len()).sum();
                self.state.apply_roster(batch.participants, batch.checkpoints);
                for page in batch.pages {
                    self.state.apply_canonical_page(page);
                }
                tracing::debug!(
                    fetched,
                    cursor = %self.state.cursor(),
                    pending = self.state.pending_count(),
                    "Canonical log refreshed"
                );
                self.dirty = true;
            }
            Ok(Err(error)) => {
                tracing::warn!(error = %error, "Poll failed; keeping cached state");
            }
            Err(error) => tracing::error!(error = %error, "Poll task failed"),
        }
    }

    fn restore_journal(&mut self) {
        let Some(journal) = self.journal.clone() else {
            return;
        };
        match journal.load() {
            Ok(scans) => {
                if !scans.is_empty() {
                    tracing::info!(count = scans.len(), "Restoring pending scans");
                }
                for scan in scans {
                    self.state.restore(scan.entry, scan.attempts);
                }
                self.dirty = true;
            }
            Err(error) => tracing::warn!(error = %error, "Failed to load pending journal"),
        }
    }

    /// Publish queued transitions and, if anything changed, a new snapshot
    fn flush(&mut self) {
        for transition in self.state.drain_transitions() {
            self.journal_transition(&transition);
            if transition.to.is_terminal() {
                tracing::info!(
                    scan_id = %transition.scan_id,
                    participant = %transition.participant_id,
                    checkpoint = %transition.checkpoint_id,
                    status = ?transition.to,
                    "Scan settled"
                );
            }
            // No subscribers is fine
            let _ = self.events.send(transition);
            self.dirty = true;
        }

        if self.dirty {
            self.snapshots.send_replace(self.state.snapshot());
            self.dirty = false;
        }
    }

    fn journal_transition(&self, transition: &ScanTransition) {
        let Some(journal) = self.journal.as_deref() else {
            return;
        };
        let result = match transition.to {
            ScanStatus::Pending if transition.from.is_some() => return,
            ScanStatus::Pending | ScanStatus::RetryScheduled => {
                match self.state.pending_entry(&transition.scan_id) {
                    Some(entry) => journal.save(entry, transition.attempts),
                    None => return,
                }
            }
            ScanStatus::Confirmed | ScanStatus::RejectedDuplicate | ScanStatus::RejectedInvalid => {
                journal.remove(&transition.scan_id)
            }
        };
        if let Err(error) = result {
            tracing::warn!(scan_id = %transition.scan_id, error = %error, "Pending journal write failed");
        }
    }
}

async fn fetch_updates(
    transport: Arc<dyn SyncTransport>,
    since: ScanCursor,
    page_size: usize,
    limit: Duration,
) -> TransportResult<PollBatch> {
    let participants = with_timeout(limit, transport.list_participants()).await?;
    let checkpoints = with_timeout(limit, transport.list_checkpoints()).await?;

    let mut pages = Vec::new();
    let mut cursor = since;
    loop {
        let page = with_timeout(limit, transport.list_scan_logs(cursor, page_size)).await?;
        let has_more = page.has_more && page.cursor > cursor;
        cursor = page.cursor;
        pages.push(page);
        if !has_more {
            break;
        }
    }

    Ok(PollBatch {
        participants,
        checkpoints,
        pages,
    })
}

/// A call that outlives `limit` counts as transient: it may still land,
/// which the scan id makes safe to retry.
async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = TransportResult<T>>,
) -> TransportResult<T> {
    tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
        Err(TransportError::Transient(format!(
            "no response within {}ms",
            limit.as_millis()
        )))
    })
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl SyncHandle {
    /// Record a scan; answers as soon as the local view is updated
    pub async fn record_scan(
        &self,
        participant_id: impl Into<ParticipantId>,
        checkpoint_id: Option<CheckpointId>,
        geo: Option<GeoPoint>,
    ) -> Result<LocalOutcome> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Record {
            participant_id: participant_id.into(),
            checkpoint_id,
            geo,
            reply,
        })
        .await?;
        response.await.map_err(|_| agent_stopped())?
    }

    pub async fn record_token_scan(
        &self,
        token: impl Into<String>,
        checkpoint_id: Option<CheckpointId>,
        geo: Option<GeoPoint>,
    ) -> Result<LocalOutcome> {
        let (reply, response) = oneshot::channel();
        self.send(Command::RecordToken {
            token: token.into(),
            checkpoint_id,
            geo,
            reply,
        })
        .await?;
        response.await.map_err(|_| agent_stopped())?
    }

    /// Ask for a canonical refresh without waiting for the next interval
    pub async fn poll_now(&self) -> Result<()> {
        self.send(Command::PollNow).await
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| agent_stopped())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanTransition> {
        self.events.subscribe()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn snapshots(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshots.clone()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.commands.is_closed()
    }
}

fn agent_stopped() -> Error {
    Error::Transient("sync agent stopped".to_string())
}
