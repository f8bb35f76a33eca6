use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use yatra_core::config::AgentConfig;
use yatra_core::models::{CheckpointId, ScanId};
use yatra_core::sync::{LocalOutcome, ScanStatus, ScanTransition, SyncHandle};

use crate::commands::common::{format_transition, start_agent, DeviceContext};
use crate::error::CliError;

/// Where a one-shot scan ended up when the command stopped waiting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanReport {
    AlreadyScanned { existing: ScanId, confirmed: bool },
    Settled(ScanTransition),
    Unsettled {
        scan_id: ScanId,
        last: Option<ScanTransition>,
    },
}

pub async fn run_scan(
    context: &DeviceContext,
    subject: &str,
    checkpoint: Option<i64>,
    wait: Duration,
    config: AgentConfig,
) -> Result<(), CliError> {
    let (handle, task) = start_agent(context, config)?;
    let mut events = handle.subscribe();

    let report = scan_and_settle(
        &handle,
        &mut events,
        subject,
        checkpoint.map(CheckpointId::new),
        wait,
    )
    .await;

    handle.shutdown();
    if let Err(error) = task.await {
        tracing::warn!(error = %error, "Sync agent task ended abnormally");
    }

    match report? {
        ScanReport::AlreadyScanned {
            existing,
            confirmed,
        } => {
            let state = if confirmed { "confirmed" } else { "pending" };
            println!("Already scanned here ({state}, scan {existing})");
            Ok(())
        }
        ScanReport::Settled(transition) => {
            println!("{}", format_transition(&transition));
            if transition.to == ScanStatus::RejectedInvalid {
                return Err(CliError::ScanRejected(
                    transition
                        .detail
                        .unwrap_or_else(|| "refused by server".to_string()),
                ));
            }
            Ok(())
        }
        ScanReport::Unsettled { scan_id, last } => {
            if let Some(transition) = last.as_ref() {
                println!("{}", format_transition(transition));
            }
            if context.device.journal_path.is_some() {
                println!("Scan {scan_id} saved on this device; it will be sent on the next run");
                Ok(())
            } else {
                Err(CliError::ScanNotSettled(scan_id.to_string()))
            }
        }
    }
}

/// Record `subject` (badge token or participant id) and wait up to `wait`
/// for the server's answer.
pub async fn scan_and_settle(
    handle: &SyncHandle,
    events: &mut broadcast::Receiver<ScanTransition>,
    subject: &str,
    checkpoint: Option<CheckpointId>,
    wait: Duration,
) -> Result<ScanReport, CliError> {
    let deadline = Instant::now() + wait;

    // Token lookup needs the roster; carry on without it when offline.
    let mut snapshots = handle.snapshots();
    let polled = matches!(
        tokio::time::timeout_at(
            deadline,
            snapshots.wait_for(|snapshot| snapshot.last_poll.is_some()),
        )
        .await,
        Ok(Ok(_))
    );
    if !polled {
        tracing::warn!("No roster from the server yet; recording against the cached view");
    }

    let outcome = match handle.record_token_scan(subject, checkpoint, None).await {
        // Not a badge on the roster; try it as a participant id
        Err(yatra_core::Error::NotFound(_)) => {
            handle.record_scan(subject, checkpoint, None).await?
        }
        other => other?,
    };

    let scan_id = match outcome {
        LocalOutcome::AlreadyScanned {
            existing,
            confirmed,
        } => {
            return Ok(ScanReport::AlreadyScanned {
                existing,
                confirmed,
            })
        }
        LocalOutcome::Recorded { scan_id } => scan_id,
    };

    let mut last = None;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(transition)) if transition.scan_id == scan_id => {
                if transition.to.is_terminal() {
                    return Ok(ScanReport::Settled(transition));
                }
                last = Some(transition);
            }
            Ok(Ok(_) | Err(RecvError::Lagged(_))) => {}
            Ok(Err(RecvError::Closed)) | Err(_) => {
                return Ok(ScanReport::Unsettled { scan_id, last });
            }
        }
    }
}
