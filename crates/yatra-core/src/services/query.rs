//! Read side: roster listings, scan log pages and progress

use std::sync::Arc;

use crate::db::CanonicalStore;
use crate::error::Result;
use crate::models::{Checkpoint, Participant, ScanCursor, ScanLogEntry, ScanLogPage};
use crate::progress::{project, Projection};

pub const DEFAULT_MAX_PAGE_SIZE: usize = 1000;

/// Queries over the canonical store
#[derive(Clone)]
pub struct RosterQuery {
    store: Arc<dyn CanonicalStore>,
    max_page_size: usize,
}

impl RosterQuery {
    pub fn new(store: Arc<dyn CanonicalStore>) -> Self {
        Self::with_max_page_size(store, DEFAULT_MAX_PAGE_SIZE)
    }

    pub fn with_max_page_size(store: Arc<dyn CanonicalStore>, max_page_size: usize) -> Self {
        Self {
            store,
            max_page_size: max_page_size.max(1),
        }
    }

    pub const fn max_page_size(&self) -> usize {
        self.max_page_size
    }

    pub fn list_participants(&self) -> Result<Vec<Participant>> {
        self.store.list_participants()
    }

    /// Checkpoints in route order
    pub fn list_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        self.store.list_checkpoints()
    }

    /// Entries after `since` (from the start when `None`).
    ///
    /// `limit` is clamped to `1..=max_page_size`; a missing limit means the
    /// maximum.
    pub fn list_scan_logs(
        &self,
        since: Option<ScanCursor>,
        limit: Option<usize>,
    ) -> Result<ScanLogPage> {
        let limit = limit
            .unwrap_or(self.max_page_size)
            .clamp(1, self.max_page_size);
        self.store
            .scans_since(since.unwrap_or(ScanCursor::START), limit)
    }

    /// Walk every page of the scan log
    pub fn full_scan_log(&self) -> Result<Vec<ScanLogEntry>> {
        let mut entries = Vec::new();
        let mut cursor = ScanCursor::START;
        loop {
            let page = self.store.scans_since(cursor, self.max_page_size)?;
            entries.extend(page.entries);
            cursor = page.cursor;
            if !page.has_more {
                return Ok(entries);
            }
        }
    }

    /// Progress computed from the canonical log
    pub fn progress(&self) -> Result<Projection> {
        let participants = self.list_participants()?;
        let checkpoints = self.list_checkpoints()?;
        let entries = self.full_scan_log()?;
        Ok(project(&participants, &checkpoints, &entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{CheckpointId, ScanId};
    use chrono::Utc;

    fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for index in 0..5 {
            store
                .upsert_participant(&Participant::new(
                    format!("p-{index}"),
                    format!("Walker {index}"),
                    format!("PALITANA_YATRA_{index}"),
                ))
                .unwrap();
        }
        store
            .upsert_checkpoint(&Checkpoint::new(1, "Base", 1, 1))
            .unwrap();
        store
            .upsert_checkpoint(&Checkpoint::new(2, "Summit", 1, 2))
            .unwrap();
        for index in 0..5 {
            store
                .insert_scan(&ScanLogEntry {
                    id: ScanId::new(),
                    participant_id: format!("p-{index}").into(),
                    checkpoint_id: CheckpointId::new(1),
                    scanned_at: Utc::now(),
                    device_id: "gate".to_string(),
                    geo: None,
                    synced: false,
                })
                .unwrap();
        }
        store
    }

    #[test]
    fn limit_is_clamped() {
        let query = RosterQuery::with_max_page_size(seeded(), 2);
        assert_eq!(query.list_scan_logs(None, Some(50)).unwrap().entries.len(), 2);
        assert_eq!(query.list_scan_logs(None, Some(0)).unwrap().entries.len(), 1);
        assert_eq!(query.list_scan_logs(None, None).unwrap().entries.len(), 2);
    }

    #[test]
    fn full_log_walks_all_pages() {
        let query = RosterQuery::with_max_page_size(seeded(), 2);
        assert_eq!(query.full_scan_log().unwrap().len(), 5);
    }

    #[test]
    fn progress_from_canonical_log() {
        let query = RosterQuery::new(seeded());
        let progress = query.progress().unwrap();
        assert_eq!(progress.summary.started, 5);
        assert_eq!(progress.summary.completed, 0);
        assert_eq!(
            progress.per_checkpoint[&CheckpointId::new(1)].unique_participants_reached,
            5
        );
    }
}
