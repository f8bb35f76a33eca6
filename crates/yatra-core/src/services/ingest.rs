//! Ingestion: validate a submission and run the atomic check-and-insert.

use std::sync::Arc;

use crate::db::{CanonicalStore, InsertOutcome};
use crate::error::{Error, Result};
use crate::models::{ScanSubmission, SubmitReceipt};

/// Accepts scan submissions from devices
#[derive(Clone)]
pub struct IngestionService {
    store: Arc<dyn CanonicalStore>,
}

impl IngestionService {
    pub fn new(store: Arc<dyn CanonicalStore>) -> Self {
        Self { store }
    }

    /// Record a scan unless its pair is already taken.
    ///
    /// Duplicates come back as a receipt with `duplicate: true`. Resubmitting
    /// an id that was already accepted returns an accepted receipt again and
    /// stores nothing. The device timestamp is stored as given.
    pub fn submit_scan(&self, submission: ScanSubmission) -> Result<SubmitReceipt> {
        validate_submission(&submission)?;

        // A stored id is a retry; it gets its original outcome even if the
        // participant was deactivated since.
        let known = self
            .store
            .get_scan(&submission.scan_id)
            .map_err(as_transient)?
            .is_some();
        if !known {
            check_references(self.store.as_ref(), &submission)?;
        }

        let entry = submission.into_entry();
        match self.store.insert_scan(&entry) {
            Ok(InsertOutcome::Inserted) => {
                tracing::info!(
                    scan_id = %entry.id,
                    participant = %entry.participant_id,
                    checkpoint = %entry.checkpoint_id,
                    device = %entry.device_id,
                    "Scan accepted"
                );
                Ok(SubmitReceipt::accepted(entry.id))
            }
            Ok(InsertOutcome::Replayed) => {
                tracing::debug!(scan_id = %entry.id, device = %entry.device_id, "Scan replayed");
                Ok(SubmitReceipt::accepted(entry.id))
            }
            Ok(InsertOutcome::Duplicate { existing }) => {
                tracing::info!(
                    scan_id = %entry.id,
                    existing = %existing,
                    participant = %entry.participant_id,
                    checkpoint = %entry.checkpoint_id,
                    device = %entry.device_id,
                    "Duplicate scan"
                );
                Ok(SubmitReceipt::duplicate(entry.id, existing))
            }
            Err(Error::Conflict(message)) => {
                tracing::error!(
                    scan_id = %entry.id,
                    device = %entry.device_id,
                    detail = %message,
                    "Scan conflict: storage invariant violated"
                );
                Err(Error::Conflict(message))
            }
            Err(error) => Err(as_transient(error)),
        }
    }
}

fn check_references(store: &dyn CanonicalStore, submission: &ScanSubmission) -> Result<()> {
    let participant = store
        .get_participant(&submission.participant_id)
        .map_err(as_transient)?
        .ok_or_else(|| {
            Error::Validation(format!("unknown participant {}", submission.participant_id))
        })?;
    if !participant.is_active {
        return Err(Error::Validation(format!(
            "participant {} is not active",
            participant.id
        )));
    }
    if store
        .get_checkpoint(submission.checkpoint_id)
        .map_err(as_transient)?
        .is_none()
    {
        return Err(Error::Validation(format!(
            "unknown checkpoint {}",
            submission.checkpoint_id
        )));
    }
    Ok(())
}

fn validate_submission(submission: &ScanSubmission) -> Result<()> {
    if submission.participant_id.as_str().trim().is_empty() {
        return Err(Error::Validation("participantId must not be empty".into()));
    }
    if submission.device_id.trim().is_empty() {
        return Err(Error::Validation("deviceId must not be empty".into()));
    }
    if let Some(geo) = submission.geo {
        if !geo.is_valid() {
            return Err(Error::Validation(format!(
                "geo out of range: lat={}, lng={}",
                geo.lat, geo.lng
            )));
        }
    }
    Ok(())
}

/// Infrastructure failures are retryable; never report them as rejections.
fn as_transient(error: Error) -> Error {
    match error {
        Error::Validation(_) | Error::Conflict(_) | Error::Transient(_) => error,
        other => {
            tracing::warn!(error = %other, "Canonical store unavailable");
            Error::Transient(other.to_string())
        }
    }
}
