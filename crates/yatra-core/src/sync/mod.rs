//! Device-side synchronization: transports, the sync state machine, and the
//! actor that drives it.

mod agent;
mod http;
mod local;
mod state;
mod transport;

pub use agent::{SyncAgent, SyncHandle};
pub use http::HttpTransport;
pub use local::InProcessTransport;
pub use state::{LocalOutcome, PendingView, ScanStatus, ScanTransition, SyncSnapshot, SyncState};
pub use transport::{SyncTransport, TransportError, TransportResult};
