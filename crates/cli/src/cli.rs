use aidash_core::task::TaskKind;
use clap::{Parser, Subcommand};

/// Submit AI jobs to the task service and follow them to completion.
#[derive(Debug, Parser)]
#[command(name = "aidash")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Base URL of the task service (overrides TASK_API_URL)
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Milliseconds between status queries (overrides POLL_INTERVAL_MS)
    #[arg(long, global = true)]
    pub interval_ms: Option<u64>,

    /// Use the per-kind `/ai/*` submission routes of older backends
    #[arg(long, global = true)]
    pub legacy_routes: bool,

    /// Print the final task as JSON instead of a status line
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submit a new job and follow it
    Submit {
        /// Job type: prompt, script, analysis or digital_human
        #[arg(long)]
        kind: TaskKind,

        /// Job parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,

        /// Print the task id and exit without following the job
        #[arg(long)]
        no_wait: bool,
    },

    /// Follow a job that was submitted elsewhere
    Watch {
        /// Task id issued by the service
        task_id: String,

        /// Job type to assume if the service does not report one
        #[arg(long)]
        kind: Option<TaskKind>,
    },
}
