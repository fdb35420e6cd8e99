use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// AtlasRun - a simple command queue
#[derive(Parser)]
#[command(name = "arun", version)]
pub struct Cli {
    /// Directory holding the task store, logs and scripts (default: ~/.atlasrun)
    #[arg(long, global = true, env = "ATLASRUN_HOME")]
    pub home: Option<PathBuf>,

    /// Settings file (default: <home>/config.yaml)
    #[arg(long, global = true, env = "ATLASRUN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Sets the logging verbosity level for the application
    /// Possible values: "error", "warn", "info", "debug", "trace"
    #[arg(long, global = true)]
    pub logging_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add a command to the queue
    Submit {
        /// Working directory for the command
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Block until the task has finished
        #[arg(short, long)]
        wait: bool,

        /// Command line to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Show current queue status
    Status,

    /// List the most recent tasks
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show detailed information about a task
    Info {
        task_id: i32,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Remove completed and failed tasks older than the given number of days
    Cleanup { days: u32 },

    /// Mark running tasks whose process is gone as failed
    Refresh,

    /// Force a task back to pending, clearing its execution fields
    MarkPending {
        /// Task id, or pid with --pid
        target: i32,

        /// Treat the target as a process id
        #[arg(long)]
        pid: bool,
    },

    /// Mark a pending task as running
    ///
    /// Pending tasks carry no pid yet, so the target is always a task id.
    MarkRunning {
        /// Task id
        task_id: i32,

        /// Process that runs the task (default: the caller's parent)
        #[arg(long)]
        as_pid: Option<i32>,
    },

    /// Record a running task's exit code
    MarkComplete {
        /// Task id, or pid with --pid
        target: i32,

        #[arg(allow_negative_numbers = true)]
        exit_code: i32,

        /// Treat the target as a process id
        #[arg(long)]
        pid: bool,

        /// Mark completed from any state, regardless of exit code
        #[arg(long)]
        force: bool,
    },

    /// Runner entry point used by submit
    #[command(hide = true)]
    Exec {
        task_id: i32,

        /// Process to wait for before starting
        #[arg(long)]
        wait_pid: Option<i32>,

        /// Start time of the process to wait for
        #[arg(long, requires = "wait_pid")]
        wait_start: Option<i64>,
    },
}
