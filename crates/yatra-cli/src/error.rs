use std::io;

use thiserror::Error;
use yatra_core::config::ConfigError;
use yatra_core::sync::TransportError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] yatra_core::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No API URL configured. Pass --api-url, set YATRA_API_URL, or add api_base_url to the device profile.")]
    ApiUrlMissing,
    #[error("No device id configured. Pass --device-id, set YATRA_DEVICE_ID, or use --profile.")]
    DeviceIdMissing,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Roster verification found {0} problem(s)")]
    VerificationFailed(usize),
    #[error("Scan rejected: {0}")]
    ScanRejected(String),
    #[error("Scan {0} was not confirmed before exit and no journal is configured; scan again once online")]
    ScanNotSettled(String),
}
