//! Database layer for Yatra

mod connection;
mod journal;
mod memory_store;
mod migrations;
mod sqlite_store;
mod store;

pub use connection::Database;
pub use journal::{JournaledScan, PendingJournal};
pub use memory_store::MemoryStore;
pub use sqlite_store::SqliteStore;
pub use store::{CanonicalStore, InsertOutcome};
