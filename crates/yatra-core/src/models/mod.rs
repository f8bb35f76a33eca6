//! Data models for Yatra

mod checkpoint;
mod participant;
mod scan;

pub use checkpoint::{sort_route, Checkpoint, CheckpointId};
pub use participant::{badge_number, Participant, ParticipantId};
pub use scan::{
    GeoPoint, ScanCursor, ScanId, ScanKey, ScanLogEntry, ScanLogPage, ScanSubmission,
    SubmitReceipt,
};
