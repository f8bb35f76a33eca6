use yatra_core::config::AgentConfig;
use yatra_core::progress::Projection;

use crate::commands::common::{
    fetch_projection, format_local_time, format_summary, http_transport, DeviceContext,
};
use crate::error::CliError;

pub async fn run_progress(
    context: &DeviceContext,
    config: &AgentConfig,
    show_all: bool,
    as_json: bool,
) -> Result<(), CliError> {
    let transport = http_transport(context, config)?;
    let projection = fetch_projection(&transport, config.page_size).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&projection)?);
    } else {
        for line in format_progress_lines(&projection, show_all) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn format_progress_lines(projection: &Projection, show_all: bool) -> Vec<String> {
    let mut lines = vec![format_summary(projection)];
    if projection.summary.ignored_entries > 0 {
        lines.push(format!(
            "{} log entries name participants or checkpoints outside the roster",
            projection.summary.ignored_entries
        ));
    }

    for stats in projection.per_checkpoint.values() {
        lines.push(format!(
            "  checkpoint {:>3}: {} reached",
            stats.checkpoint_id.get(),
            stats.unique_participants_reached
        ));
    }

    if show_all {
        for progress in projection.per_participant.values() {
            let last = match (progress.last_checkpoint, progress.last_scan_time) {
                (Some(checkpoint), Some(at)) => {
                    format!("last at {checkpoint}, {}", format_local_time(at))
                }
                _ => "not started".to_string(),
            };
            let marker = if progress.completed { " done" } else { "" };
            lines.push(format!(
                "  {} {}/{}{marker} ({last})",
                progress.participant_id, progress.total_scans, projection.summary.total_checkpoints
            ));
        }
    }
    lines
}
