use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "yatra")]
#[command(about = "Checkpoint scanning and progress for multi-day yatras")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub device: DeviceArgs,
}

/// How this process reaches the API and identifies itself
#[derive(Args, Debug, Clone, Default)]
pub struct DeviceArgs {
    /// Base URL of the yatra API (falls back to YATRA_API_URL, then the profile)
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,

    /// Device id stamped on scans (falls back to YATRA_DEVICE_ID, then the profile)
    #[arg(long, global = true, value_name = "ID")]
    pub device_id: Option<String>,

    /// Shared device key (falls back to YATRA_DEVICE_API_KEY)
    #[arg(long, global = true, value_name = "KEY")]
    pub device_key: Option<String>,

    /// Device profile JSON
    #[arg(long, global = true, value_name = "PATH")]
    pub profile: Option<PathBuf>,
}

/// Overrides for the sync agent's timing
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct AgentArgs {
    /// Seconds between canonical log polls
    #[arg(long, value_name = "SECS")]
    pub poll_interval: Option<u64>,

    /// First retry delay in milliseconds
    #[arg(long, value_name = "MS")]
    pub retry_initial_ms: Option<u64>,

    /// Longest retry delay in seconds
    #[arg(long, value_name = "SECS")]
    pub retry_max_secs: Option<u64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load a roster file into the canonical database
    Import {
        /// Roster JSON with participants and checkpoints
        roster: PathBuf,
        /// Database file (falls back to YATRA_DATABASE_PATH, then yatra.db)
        #[arg(long, value_name = "PATH")]
        db: Option<PathBuf>,
    },
    /// Audit a roster file for missing badges and invalid records
    Verify {
        /// Roster JSON to audit
        roster: PathBuf,
        /// Highest badge number issued (defaults to the participant count)
        #[arg(long, value_name = "N")]
        expected: Option<u32>,
        /// Badge token prefix
        #[arg(long, value_name = "PREFIX")]
        prefix: Option<String>,
        /// Reference sheet JSON to compare against
        #[arg(long, value_name = "PATH")]
        reference: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Scan one participant at this device's checkpoint
    Scan {
        /// Participant id or badge token
        subject: String,
        /// Checkpoint id (defaults to the profile's checkpoint)
        #[arg(long, value_name = "ID")]
        checkpoint: Option<i64>,
        /// Seconds to wait for the server to settle the scan
        #[arg(long, default_value = "30", value_name = "SECS")]
        wait: u64,
        #[command(flatten)]
        agent: AgentArgs,
    },
    /// Show progress computed from the canonical log
    Progress {
        /// List every participant, not only the summary
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the sync agent and print scan transitions as they happen
    Watch {
        #[command(flatten)]
        agent: AgentArgs,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
