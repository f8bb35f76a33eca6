//! End-to-end scenarios: several sync agents sharing one canonical store.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use pretty_assertions::assert_eq;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use yatra_core::config::{AgentConfig, BackoffPolicy, DeviceConfig};
use yatra_core::db::{CanonicalStore, MemoryStore, SqliteStore};
use yatra_core::models::{
    Checkpoint, CheckpointId, Participant, ScanCursor, ScanId, ScanLogEntry, ScanLogPage,
    ScanSubmission, SubmitReceipt,
};
use yatra_core::services::IngestionService;
use yatra_core::sync::{
    InProcessTransport, LocalOutcome, ScanStatus, ScanTransition, SyncAgent, SyncHandle,
    SyncSnapshot, SyncTransport, TransportError, TransportResult,
};

const WAIT: Duration = Duration::from_secs(30);

fn seed(store: &dyn CanonicalStore, participants: usize) {
    for index in 1..=participants {
        store
            .upsert_participant(&Participant::new(
                format!("p-{index}"),
                format!("Walker {index}"),
                format!("PALITANA_YATRA_{index}"),
            ))
            .unwrap();
    }
    for id in 1..=3 {
        store
            .upsert_checkpoint(&Checkpoint::new(
                id,
                format!("Checkpoint {id}"),
                1,
                i32::try_from(id).unwrap(),
            ))
            .unwrap();
    }
}

fn fast_config() -> AgentConfig {
    AgentConfig {
        poll_interval: Duration::from_millis(25),
        submit_timeout: Duration::from_millis(500),
        retry: BackoffPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
        },
        page_size: 50,
    }
}

struct Device {
    handle: SyncHandle,
    events: broadcast::Receiver<ScanTransition>,
    task: JoinHandle<()>,
}

fn start_device(transport: Arc<dyn SyncTransport>, name: &str, config: AgentConfig) -> Device {
    let (agent, handle) = SyncAgent::new(transport, DeviceConfig::new(name), config);
    let events = handle.subscribe();
    let task = agent.spawn();
    Device {
        handle,
        events,
        task,
    }
}

impl Device {
    async fn stop(self) {
        self.handle.shutdown();
        self.task.await.unwrap();
    }
}

async fn wait_until(handle: &SyncHandle, mut predicate: impl FnMut(&SyncSnapshot) -> bool) {
    let mut snapshots = handle.snapshots();
    tokio::time::timeout(WAIT, snapshots.wait_for(|snapshot| predicate(snapshot)))
        .await
        .expect("timed out waiting for snapshot")
        .expect("agent stopped");
}

async fn roster_loaded(handle: &SyncHandle, participants: usize) {
    wait_until(handle, |snapshot| {
        snapshot.projection.summary.total_participants == participants
    })
    .await;
}

async fn next_settled(events: &mut broadcast::Receiver<ScanTransition>) -> ScanTransition {
    tokio::time::timeout(WAIT, async {
        loop {
            let transition = events.recv().await.unwrap();
            if transition.to.is_terminal() {
                return transition;
            }
        }
    })
    .await
    .expect("timed out waiting for a settled scan")
}

fn recorded(outcome: LocalOutcome) -> ScanId {
    match outcome {
        LocalOutcome::Recorded { scan_id } => scan_id,
        LocalOutcome::AlreadyScanned { .. } => panic!("expected a new scan, got {outcome:?}"),
    }
}

/// Wraps a transport with a switchable outage and lost responses
struct FlakyTransport {
    inner: InProcessTransport,
    online: AtomicBool,
    lose_responses: AtomicUsize,
    submissions: AtomicUsize,
}

impl FlakyTransport {
    fn new(store: Arc<dyn CanonicalStore>) -> Self {
        Self {
            inner: InProcessTransport::new(store),
            online: AtomicBool::new(true),
            lose_responses: AtomicUsize::new(0),
            submissions: AtomicUsize::new(0),
        }
    }

    fn check_online(&self) -> TransportResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Transient("network unreachable".to_string()))
        }
    }
}

#[async_trait]
impl SyncTransport for FlakyTransport {
    async fn submit_scan(&self, submission: &ScanSubmission) -> TransportResult<SubmitReceipt> {
        self.check_online()?;
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let receipt = self.inner.submit_scan(submission).await?;
        let lost = self
            .lose_responses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if lost {
            return Err(TransportError::Transient("response lost".to_string()));
        }
        Ok(receipt)
    }

    async fn list_participants(&self) -> TransportResult<Vec<Participant>> {
        self.check_online()?;
        self.inner.list_participants().await
    }

    async fn list_checkpoints(&self) -> TransportResult<Vec<Checkpoint>> {
        self.check_online()?;
        self.inner.list_checkpoints().await
    }

    async fn list_scan_logs(
        &self,
        since: ScanCursor,
        limit: usize,
    ) -> TransportResult<ScanLogPage> {
        self.check_online()?;
        self.inner.list_scan_logs(since, limit).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_devices_racing_on_one_pair_store_one_scan() {
    let tmp = tempfile::tempdir().unwrap();
    let store: Arc<dyn CanonicalStore> =
        Arc::new(SqliteStore::open(tmp.path().join("canonical.db")).unwrap());
    seed(store.as_ref(), 1);

    let transport: Arc<dyn SyncTransport> = Arc::new(InProcessTransport::new(Arc::clone(&store)));
    let mut device_a = start_device(Arc::clone(&transport), "device-a", fast_config());
    let mut device_b = start_device(Arc::clone(&transport), "device-b", fast_config());
    roster_loaded(&device_a.handle, 1).await;
    roster_loaded(&device_b.handle, 1).await;

    let checkpoint = Some(CheckpointId::new(1));
    let (a, b) = tokio::join!(
        device_a.handle.record_scan("p-1", checkpoint, None),
        device_b.handle.record_scan("p-1", checkpoint, None),
    );
    let (a, b) = (recorded(a.unwrap()), recorded(b.unwrap()));

    let settled_a = next_settled(&mut device_a.events).await;
    let settled_b = next_settled(&mut device_b.events).await;
    let mut outcomes = vec![settled_a.to, settled_b.to];
    outcomes.sort_by_key(|status| format!("{status:?}"));
    assert_eq!(
        outcomes,
        vec![ScanStatus::Confirmed, ScanStatus::RejectedDuplicate]
    );
    assert_eq!(store.scan_count().unwrap(), 1);

    let winner = if settled_a.to == ScanStatus::Confirmed { a } else { b };
    for device in [&device_a, &device_b] {
        wait_until(&device.handle, |snapshot| {
            snapshot.pending.is_empty() && snapshot.entries.len() == 1
        })
        .await;
        let snapshot = device.handle.snapshot();
        assert_eq!(snapshot.entries[0].id, winner);
        assert_eq!(snapshot.projection.total_scans(&"p-1".into()), 1);
    }

    device_a.stop().await;
    device_b.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn twenty_five_devices_cycling_three_checkpoints() {
    const DEVICES: usize = 25;
    const PARTICIPANTS: usize = 25;

    let store = Arc::new(MemoryStore::new());
    seed(store.as_ref(), PARTICIPANTS);
    let transport: Arc<dyn SyncTransport> = Arc::new(InProcessTransport::new(store.clone()));

    let devices: Vec<Device> = (0..DEVICES)
        .map(|index| {
            start_device(
                Arc::clone(&transport),
                &format!("device-{index}"),
                fast_config(),
            )
        })
        .collect();

    let scans = devices.iter().enumerate().map(|(index, device)| {
        let handle = device.handle.clone();
        async move {
            for round in 0..3 {
                for participant in 1..=PARTICIPANTS {
                    // Devices start at different checkpoints so they collide
                    let checkpoint = i64::try_from((index + round) % 3 + 1).unwrap();
                    handle
                        .record_scan(
                            format!("p-{participant}"),
                            Some(CheckpointId::new(checkpoint)),
                            None,
                        )
                        .await
                        .unwrap();
                }
            }
        }
    });
    run_all(scans).await;

    for device in &devices {
        wait_until(&device.handle, |snapshot| {
            snapshot.pending.is_empty()
                && snapshot.projection.summary.completed == PARTICIPANTS
        })
        .await;
        let snapshot = device.handle.snapshot();
        assert_eq!(snapshot.entries.len(), PARTICIPANTS * 3);
        assert!(snapshot
            .projection
            .per_participant
            .values()
            .all(|progress| progress.total_scans == 3));
    }
    assert_eq!(store.scan_count().unwrap(), PARTICIPANTS * 3);

    for device in devices {
        device.stop().await;
    }
}

async fn run_all<F>(futures: impl IntoIterator<Item = F>)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let tasks: Vec<JoinHandle<()>> = futures.into_iter().map(tokio::spawn).collect();
    for task in tasks {
        task.await.unwrap();
    }
}

/// Both store implementations, seeded. The directory holds the `SQLite` file.
fn seeded_stores(
    participants: usize,
) -> (tempfile::TempDir, Vec<(&'static str, Arc<dyn CanonicalStore>)>) {
    let tmp = tempfile::tempdir().unwrap();
    let stores: Vec<(&'static str, Arc<dyn CanonicalStore>)> = vec![
        ("memory", Arc::new(MemoryStore::new())),
        (
            "sqlite",
            Arc::new(SqliteStore::open(tmp.path().join("canonical.db")).unwrap()),
        ),
    ];
    for (_, store) in &stores {
        seed(store.as_ref(), participants);
    }
    (tmp, stores)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lost_response_is_retried_with_the_same_id() {
    let (_tmp, stores) = seeded_stores(1);
    for (name, store) in stores {
        let flaky = Arc::new(FlakyTransport::new(Arc::clone(&store)));
        flaky.lose_responses.store(1, Ordering::SeqCst);
        // No poll after the first, so only the resubmission can confirm
        let config = AgentConfig {
            poll_interval: Duration::from_secs(3_600),
            ..fast_config()
        };

        let mut device = start_device(flaky.clone(), "device-a", config);
        roster_loaded(&device.handle, 1).await;

        let scan_id = recorded(
            device
                .handle
                .record_scan("p-1", Some(CheckpointId::new(2)), None)
                .await
                .unwrap(),
        );

        let settled = next_settled(&mut device.events).await;
        assert_eq!(settled.scan_id, scan_id, "{name}");
        assert_eq!(settled.to, ScanStatus::Confirmed, "{name}");
        assert_eq!(flaky.submissions.load(Ordering::SeqCst), 2, "{name}");
        assert_eq!(store.scan_count().unwrap(), 1, "{name}");
        assert_eq!(
            store.scans_since(ScanCursor::START, 10).unwrap().entries[0].id,
            scan_id,
            "{name}"
        );

        device.stop().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn progress_never_double_counts_or_goes_backward() {
    let (_tmp, stores) = seeded_stores(2);
    for (name, store) in stores {
        let flaky = Arc::new(FlakyTransport::new(Arc::clone(&store)));
        flaky.lose_responses.store(2, Ordering::SeqCst);

        let device = start_device(flaky.clone(), "device-a", fast_config());
        roster_loaded(&device.handle, 2).await;

        let mut snapshots = device.handle.snapshots();
        snapshots.mark_unchanged();
        device
            .handle
            .record_scan("p-2", Some(CheckpointId::new(3)), None)
            .await
            .unwrap();

        let observed = tokio::time::timeout(WAIT, async {
            let mut observed = Vec::new();
            loop {
                snapshots.changed().await.unwrap();
                let snapshot = snapshots.borrow_and_update().clone();
                observed.push(snapshot.projection.total_scans(&"p-2".into()));
                if snapshot.pending.is_empty()
                    && !snapshot.entries.is_empty()
                    && snapshot.entries.iter().all(|entry| entry.synced)
                {
                    return observed;
                }
            }
        })
        .await
        .expect("timed out waiting for confirmation");

        // Snapshots published before the scan was recorded show zero
        let after_record: Vec<usize> = observed
            .iter()
            .copied()
            .skip_while(|&count| count == 0)
            .collect();
        assert!(!after_record.is_empty(), "{name}");
        assert!(
            after_record.iter().all(|&count| count == 1),
            "{name}: {observed:?}"
        );
        assert_eq!(store.scan_count().unwrap(), 1, "{name}");

        device.stop().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_keeps_pair_marked_until_holder_arrives() {
    let store = Arc::new(MemoryStore::new());
    seed(store.as_ref(), 1);
    let config = AgentConfig {
        poll_interval: Duration::from_secs(3_600),
        ..fast_config()
    };
    let transport: Arc<dyn SyncTransport> = Arc::new(InProcessTransport::new(store.clone()));
    let mut device = start_device(transport, "device-b", config);
    roster_loaded(&device.handle, 1).await;

    // Another device wins the pair after this one's last poll
    let holder = ScanLogEntry {
        id: ScanId::new(),
        participant_id: "p-1".into(),
        checkpoint_id: CheckpointId::new(1),
        scanned_at: Utc::now(),
        device_id: "device-a".to_string(),
        geo: None,
        synced: false,
    };
    IngestionService::new(store.clone())
        .submit_scan(ScanSubmission::from(&holder))
        .unwrap();

    let local = recorded(
        device
            .handle
            .record_scan("p-1", Some(CheckpointId::new(1)), None)
            .await
            .unwrap(),
    );
    let settled = next_settled(&mut device.events).await;
    assert_eq!(settled.scan_id, local);
    assert_eq!(settled.to, ScanStatus::RejectedDuplicate);

    // The duplicate triggers a poll well before the hour-long interval
    wait_until(&device.handle, |snapshot| snapshot.pending.is_empty()).await;
    let snapshot = device.handle.snapshot();
    assert_eq!(snapshot.entries.len(), 1);
    assert_eq!(snapshot.entries[0].id, holder.id);
    assert_eq!(snapshot.projection.total_scans(&"p-1".into()), 1);

    device.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn offline_scans_stay_visible_and_sync_when_back_online() {
    let store = Arc::new(MemoryStore::new());
    seed(store.as_ref(), 3);
    let flaky = Arc::new(FlakyTransport::new(store.clone()));
    let device = start_device(flaky.clone(), "device-a", fast_config());
    roster_loaded(&device.handle, 3).await;

    flaky.online.store(false, Ordering::SeqCst);
    for participant in 1..=3 {
        device
            .handle
            .record_scan(
                format!("p-{participant}"),
                Some(CheckpointId::new(1)),
                None,
            )
            .await
            .unwrap();
    }

    wait_until(&device.handle, |snapshot| {
        snapshot.pending.len() == 3
            && snapshot
                .pending
                .iter()
                .all(|pending| pending.status == ScanStatus::RetryScheduled && pending.attempts >= 2)
    })
    .await;
    let offline = device.handle.snapshot();
    assert_eq!(offline.projection.summary.started, 3);
    assert_eq!(store.scan_count().unwrap(), 0);

    flaky.online.store(true, Ordering::SeqCst);
    wait_until(&device.handle, |snapshot| {
        snapshot.pending.is_empty() && snapshot.entries.len() == 3
    })
    .await;
    assert_eq!(store.scan_count().unwrap(), 3);
    assert_eq!(device.handle.snapshot().projection.summary.started, 3);

    device.stop().await;
}

#[test]
fn concurrent_submitters_against_sqlite_store_one_wins() {
    const SUBMITTERS: usize = 20;

    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(tmp.path().join("race.db")).unwrap());
    seed(store.as_ref(), 1);
    let ingest = IngestionService::new(store.clone());
    let barrier = Arc::new(Barrier::new(SUBMITTERS));

    let receipts: Vec<SubmitReceipt> = (0..SUBMITTERS)
        .map(|index| {
            let ingest = ingest.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let submission = ScanSubmission {
                    scan_id: ScanId::new(),
                    participant_id: "p-1".into(),
                    checkpoint_id: CheckpointId::new(3),
                    device_id: format!("device-{index}"),
                    geo: None,
                    scanned_at: Utc::now(),
                };
                barrier.wait();
                ingest.submit_scan(submission).unwrap()
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    let accepted: Vec<&SubmitReceipt> = receipts.iter().filter(|receipt| receipt.success).collect();
    assert_eq!(accepted.len(), 1);
    assert!(receipts
        .iter()
        .filter(|receipt| !receipt.success)
        .all(|receipt| receipt.duplicate && receipt.existing_scan_id == Some(accepted[0].scan_id)));
    assert_eq!(store.scan_count().unwrap(), 1);
}
