//! yatra-core - Core library for Yatra check-in sync
//!
//! Models, the canonical store, ingestion and query services, the progress
//! projector, roster tooling, and the device-side sync agent shared by the
//! API server and the CLI.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod progress;
pub mod roster;
pub mod services;
pub mod sync;
mod util;

pub use error::{Error, Result};
pub use models::{Checkpoint, CheckpointId, Participant, ParticipantId, ScanId, ScanLogEntry};
