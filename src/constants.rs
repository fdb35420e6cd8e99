/// Directory under the user's home used when `--home` is not given
pub const HOME_DIR_NAME: &str = ".atlasrun";

pub const CONFIG_FILE_NAME: &str = "config.yaml";

pub const DATABASE_FILE_NAME: &str = "atlasrun.db";

/// Rolling diagnostics file written by detached runners
pub const RUNNER_LOG_FILE_NAME: &str = "atlasrun.log";

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5000;

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

pub const DEFAULT_LIST_LIMIT: i64 = 50;

/// CLI output stays clean unless asked otherwise
pub const DEFAULT_LOGGING_LEVEL: &str = "warn";

/// Longest command shown in the task table
pub const COMMAND_DISPLAY_WIDTH: usize = 50;

/// Exit code recorded when a running task's process vanished
pub const STALE_EXIT_CODE: i32 = -1;

/// Exit code recorded when the command could not be started at all
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// Shell convention for commands terminated by a signal
pub const SIGNAL_EXIT_CODE_BASE: i32 = 128;

/// Shell used to run the ephemeral task script
pub const TASK_SHELL: &str = "/bin/sh";
