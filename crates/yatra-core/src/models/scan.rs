//! Scan log model and the submission wire types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{CheckpointId, ParticipantId};

/// A unique identifier for a scan, using UUID v7 (time-sortable)
///
/// Minted on the device so that resubmissions after a lost response carry the
/// same id and the ingestion side can recognise them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanId(Uuid);

impl ScanId {
    /// Create a new unique scan ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ScanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ScanId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The pair protected by the uniqueness invariant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScanKey {
    pub participant_id: ParticipantId,
    pub checkpoint_id: CheckpointId,
}

impl ScanKey {
    pub fn new(participant_id: impl Into<ParticipantId>, checkpoint_id: CheckpointId) -> Self {
        Self {
            participant_id: participant_id.into(),
            checkpoint_id,
        }
    }
}

impl fmt::Display for ScanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.participant_id, self.checkpoint_id)
    }
}

/// Optional capture location
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }
}

/// One scan event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanLogEntry {
    pub id: ScanId,
    pub participant_id: ParticipantId,
    pub checkpoint_id: CheckpointId,
    /// Device clock at capture time. Advisory only.
    pub scanned_at: DateTime<Utc>,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoPoint>,
    /// Device-local bookkeeping; never leaves the device.
    #[serde(skip)]
    pub synced: bool,
}

impl ScanLogEntry {
    pub fn key(&self) -> ScanKey {
        ScanKey::new(self.participant_id.clone(), self.checkpoint_id)
    }

    /// Equality on everything that travels over the wire.
    pub fn same_payload(&self, other: &Self) -> bool {
        self.id == other.id
            && self.participant_id == other.participant_id
            && self.checkpoint_id == other.checkpoint_id
            && self.scanned_at == other.scanned_at
            && self.device_id == other.device_id
            && self.geo == other.geo
    }
}

/// Body of `POST /v1/scans`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSubmission {
    pub scan_id: ScanId,
    pub participant_id: ParticipantId,
    pub checkpoint_id: CheckpointId,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoPoint>,
    pub scanned_at: DateTime<Utc>,
}

impl ScanSubmission {
    pub fn key(&self) -> ScanKey {
        ScanKey::new(self.participant_id.clone(), self.checkpoint_id)
    }

    pub fn into_entry(self) -> ScanLogEntry {
        ScanLogEntry {
            id: self.scan_id,
            participant_id: self.participant_id,
            checkpoint_id: self.checkpoint_id,
            scanned_at: self.scanned_at,
            device_id: self.device_id,
            geo: self.geo,
            synced: false,
        }
    }
}

impl From<&ScanLogEntry> for ScanSubmission {
    fn from(entry: &ScanLogEntry) -> Self {
        Self {
            scan_id: entry.id,
            participant_id: entry.participant_id.clone(),
            checkpoint_id: entry.checkpoint_id,
            device_id: entry.device_id.clone(),
            geo: entry.geo,
            scanned_at: entry.scanned_at,
        }
    }
}

/// Outcome of a submission
///
/// `success` and `duplicate` are never both true. On a duplicate,
/// `existing_scan_id` names the canonical entry that already holds the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub success: bool,
    pub duplicate: bool,
    pub scan_id: ScanId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_scan_id: Option<ScanId>,
}

impl SubmitReceipt {
    pub const fn accepted(scan_id: ScanId) -> Self {
        Self {
            success: true,
            duplicate: false,
            scan_id,
            existing_scan_id: None,
        }
    }

    pub const fn duplicate(scan_id: ScanId, existing: ScanId) -> Self {
        Self {
            success: false,
            duplicate: true,
            scan_id,
            existing_scan_id: Some(existing),
        }
    }
}

/// Opaque position in the canonical scan log
///
/// Backed by the store's insertion sequence, so it orders by arrival at the
/// store rather than by device clocks.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ScanCursor(i64);

impl ScanCursor {
    /// Cursor before the first entry
    pub const START: Self = Self(0);

    pub const fn new(seq: i64) -> Self {
        Self(seq)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ScanCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A slice of the canonical scan log, in insertion order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanLogPage {
    pub entries: Vec<ScanLogEntry>,
    /// Pass back as `since` to continue after the last entry of this page
    pub cursor: ScanCursor,
    pub has_more: bool,
}
