use tokio::sync::broadcast::error::RecvError;
use yatra_core::config::AgentConfig;

use crate::commands::common::{format_summary, format_transition, start_agent, DeviceContext};
use crate::error::CliError;

/// Run the agent until Ctrl-C, printing transitions and summary changes
pub async fn run_watch(context: &DeviceContext, config: AgentConfig) -> Result<(), CliError> {
    let (handle, task) = start_agent(context, config)?;
    let mut events = handle.subscribe();
    let mut snapshots = handle.snapshots();
    let mut last_summary = None;

    println!(
        "Watching as {} against {} (Ctrl-C to stop)",
        context.device.device_id, context.api_url
    );

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
            received = events.recv() => match received {
                Ok(transition) => println!("{}", format_transition(&transition)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Missed scan transitions");
                }
                Err(RecvError::Closed) => break,
            },
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let summary = snapshots.borrow_and_update().projection.summary;
                if last_summary != Some(summary) {
                    last_summary = Some(summary);
                    println!("{}", format_summary(&handle.snapshot().projection));
                }
            }
        }
    }

    let pending = handle.snapshot().pending.len();
    handle.shutdown();
    if let Err(error) = task.await {
        tracing::warn!(error = %error, "Sync agent task ended abnormally");
    }
    if pending > 0 {
        println!("{pending} scan(s) still pending");
    }
    Ok(())
}
