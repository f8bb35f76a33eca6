//! Transport that calls the services directly, for single-process setups and
//! tests

use std::sync::Arc;

use async_trait::async_trait;

use super::transport::{SyncTransport, TransportError, TransportResult};
use crate::db::CanonicalStore;
use crate::models::{Checkpoint, Participant, ScanCursor, ScanLogPage, ScanSubmission, SubmitReceipt};
use crate::services::{IngestionService, RosterQuery};

#[derive(Clone)]
pub struct InProcessTransport {
    ingest: IngestionService,
    query: RosterQuery,
}

impl InProcessTransport {
    pub fn new(store: Arc<dyn CanonicalStore>) -> Self {
        Self {
            ingest: IngestionService::new(Arc::clone(&store)),
            query: RosterQuery::new(store),
        }
    }

    pub const fn from_services(ingest: IngestionService, query: RosterQuery) -> Self {
        Self { ingest, query }
    }
}

async fn blocking<T, F>(task: F) -> TransportResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> crate::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|error| TransportError::Transient(format!("store task failed: {error}")))?
        .map_err(TransportError::from)
}

#[async_trait]
impl SyncTransport for InProcessTransport {
    async fn submit_scan(&self, submission: &ScanSubmission) -> TransportResult<SubmitReceipt> {
        let ingest = self.ingest.clone();
        let submission = submission.clone();
        blocking(move || ingest.submit_scan(submission)).await
    }

    async fn list_participants(&self) -> TransportResult<Vec<Participant>> {
        let query = self.query.clone();
        blocking(move || query.list_participants()).await
    }

    async fn list_checkpoints(&self) -> TransportResult<Vec<Checkpoint>> {
        let query = self.query.clone();
        blocking(move || query.list_checkpoints()).await
    }

    async fn list_scan_logs(
        &self,
        since: ScanCursor,
        limit: usize,
    ) -> TransportResult<ScanLogPage> {
        let query = self.query.clone();
        blocking(move || query.list_scan_logs(Some(since), Some(limit))).await
    }
}
