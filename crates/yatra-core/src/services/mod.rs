//! Server-side services over a canonical store

mod ingest;
mod query;

pub use ingest::IngestionService;
pub use query::{RosterQuery, DEFAULT_MAX_PAGE_SIZE};
