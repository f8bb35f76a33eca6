use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use yatra_core::config::{AgentConfig, DeviceConfig};
use yatra_core::db::PendingJournal;
use yatra_core::models::{ScanCursor, ScanLogEntry};
use yatra_core::progress::{project, Projection};
use yatra_core::sync::{
    HttpTransport, ScanStatus, ScanTransition, SyncAgent, SyncHandle, SyncTransport,
};

use crate::cli::{AgentArgs, DeviceArgs};
use crate::error::CliError;

/// Everything needed to talk to the API as one device
#[derive(Debug, Clone)]
pub struct DeviceContext {
    pub device: DeviceConfig,
    pub api_url: String,
    pub device_key: Option<String>,
}

/// Flags win over environment variables, which win over the profile.
pub fn resolve_device(
    args: &DeviceArgs,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<DeviceContext, CliError> {
    let profile = args
        .profile
        .as_deref()
        .map(DeviceConfig::from_json_file)
        .transpose()?;

    let device_id = non_empty(args.device_id.clone())
        .or_else(|| non_empty(lookup("YATRA_DEVICE_ID")))
        .or_else(|| profile.as_ref().map(|profile| profile.device_id.clone()))
        .ok_or(CliError::DeviceIdMissing)?;
    let api_url = non_empty(args.api_url.clone())
        .or_else(|| non_empty(lookup("YATRA_API_URL")))
        .or_else(|| profile.as_ref().and_then(|profile| profile.api_base_url.clone()))
        .ok_or(CliError::ApiUrlMissing)?;
    let device_key =
        non_empty(args.device_key.clone()).or_else(|| non_empty(lookup("YATRA_DEVICE_API_KEY")));

    let device = DeviceConfig {
        device_id,
        api_base_url: Some(api_url),
        ..profile.unwrap_or_else(|| DeviceConfig::new(String::new()))
    }
    .normalized()?;
    let api_url = device.api_base_url.clone().ok_or(CliError::ApiUrlMissing)?;

    Ok(DeviceContext {
        device,
        api_url,
        device_key,
    })
}

pub fn resolve_device_from_env(args: &DeviceArgs) -> Result<DeviceContext, CliError> {
    resolve_device(args, |name| env::var(name).ok())
}

/// Environment configuration with any command-line overrides applied
pub fn agent_config(overrides: AgentArgs) -> Result<AgentConfig, CliError> {
    let mut config = AgentConfig::from_env()?;
    apply_overrides(&mut config, overrides)?;
    Ok(config)
}

pub fn apply_overrides(config: &mut AgentConfig, overrides: AgentArgs) -> Result<(), CliError> {
    if let Some(secs) = overrides.poll_interval {
        if secs == 0 {
            return Err(CliError::InvalidArgument(
                "--poll-interval must be at least 1 second".to_string(),
            ));
        }
        config.poll_interval = Duration::from_secs(secs);
    }
    if let Some(millis) = overrides.retry_initial_ms {
        config.retry.initial_delay = Duration::from_millis(millis.max(1));
    }
    if let Some(secs) = overrides.retry_max_secs {
        config.retry.max_delay = Duration::from_secs(secs.max(1));
    }
    if config.retry.initial_delay > config.retry.max_delay {
        return Err(CliError::InvalidArgument(
            "first retry delay must not exceed the longest retry delay".to_string(),
        ));
    }
    Ok(())
}

pub fn http_transport(
    context: &DeviceContext,
    config: &AgentConfig,
) -> Result<HttpTransport, CliError> {
    Ok(HttpTransport::new(
        context.api_url.clone(),
        context.device_key.clone(),
        config.submit_timeout,
    )?)
}

/// Start an agent for this device, journaling to the profile's path if set
pub fn start_agent(
    context: &DeviceContext,
    config: AgentConfig,
) -> Result<(SyncHandle, tokio::task::JoinHandle<()>), CliError> {
    let transport: Arc<dyn SyncTransport> = Arc::new(http_transport(context, &config)?);
    let (mut agent, handle) = SyncAgent::new(transport, context.device.clone(), config);
    if let Some(path) = context.device.journal_path.as_deref() {
        agent = agent.with_journal(Arc::new(PendingJournal::open(path)?));
    }
    Ok((handle, agent.spawn()))
}

/// Fetch the roster and the whole canonical log, then project it
pub async fn fetch_projection(
    transport: &dyn SyncTransport,
    page_size: usize,
) -> Result<Projection, CliError> {
    let participants = transport.list_participants().await?;
    let checkpoints = transport.list_checkpoints().await?;

    let mut entries: Vec<ScanLogEntry> = Vec::new();
    let mut cursor = ScanCursor::START;
    loop {
        let page = transport.list_scan_logs(cursor, page_size).await?;
        entries.extend(page.entries);
        cursor = page.cursor;
        if !page.has_more {
            break;
        }
    }

    Ok(project(&participants, &checkpoints, &entries))
}

pub fn default_db_path(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    non_empty(lookup("YATRA_DATABASE_PATH")).map_or_else(|| PathBuf::from("yatra.db"), PathBuf::from)
}

pub fn format_transition(transition: &ScanTransition) -> String {
    let label = match transition.to {
        ScanStatus::Pending => "pending",
        ScanStatus::Confirmed => "confirmed",
        ScanStatus::RejectedDuplicate => "duplicate",
        ScanStatus::RetryScheduled => "retrying",
        ScanStatus::RejectedInvalid => "rejected",
    };
    let mut line = format!(
        "{label:<9} {} @ checkpoint {} ({})",
        transition.participant_id, transition.checkpoint_id, transition.scan_id
    );
    if transition.attempts > 0 {
        line.push_str(&format!(" attempt {}", transition.attempts));
    }
    if let Some(detail) = transition.detail.as_deref() {
        line.push_str(&format!(": {detail}"));
    }
    line
}

pub fn format_summary(projection: &Projection) -> String {
    let summary = &projection.summary;
    format!(
        "{} participants, {} started, {} completed all {} checkpoints",
        summary.total_participants, summary.started, summary.completed, summary.total_checkpoints
    )
}

pub fn format_local_time(timestamp: DateTime<Utc>) -> String {
    timestamp
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
