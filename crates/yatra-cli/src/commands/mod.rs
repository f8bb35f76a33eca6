pub mod common;
pub mod completions;
pub mod import;
pub mod progress;
pub mod scan;
pub mod verify;
pub mod watch;
