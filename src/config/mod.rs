mod parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;

pub use parser::{load_settings, resolve_home};

/// Queue settings, read from `<home>/config.yaml` when present
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    /// Root directory holding the store, logs and scripts
    #[serde(skip)]
    pub home: PathBuf,
    /// File these settings were read from, if any
    #[serde(skip)]
    pub source: Option<PathBuf>,
    /// How often a queued runner checks whether its predecessor exited
    pub poll_interval_ms: u64,
    /// How long `submit` waits for the runner to report in
    pub handshake_timeout_ms: u64,
    /// How long a writer waits on a locked store
    pub busy_timeout_ms: u64,
    /// Number of tasks shown by `list`
    pub list_limit: i64,
    /// Default tracing filter when `--logging-level` is not given
    pub logging_level: String,
    /// Overrides `<home>/atlasrun.db`
    pub database: Option<PathBuf>,
    /// Overrides `<home>/logs`
    pub log_dir: Option<PathBuf>,
    /// Overrides `<home>/scripts`
    pub scripts_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            home: PathBuf::new(),
            source: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            list_limit: DEFAULT_LIST_LIMIT,
            logging_level: DEFAULT_LOGGING_LEVEL.to_string(),
            database: None,
            log_dir: None,
            scripts_dir: None,
        }
    }
}

impl Settings {
    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.home.join(DATABASE_FILE_NAME))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| self.home.join("logs"))
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.scripts_dir
            .clone()
            .unwrap_or_else(|| self.home.join("scripts"))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Captured stdout of a task
    pub fn stdout_log(&self, task_id: i32) -> PathBuf {
        self.log_dir().join(format!("task_{}.out", task_id))
    }

    /// Captured stderr of a task
    pub fn stderr_log(&self, task_id: i32) -> PathBuf {
        self.log_dir().join(format!("task_{}.err", task_id))
    }

    /// Ephemeral script the runner executes
    pub fn script_path(&self, task_id: i32) -> PathBuf {
        self.scripts_dir().join(format!("task_{}.sh", task_id))
    }

    /// Relative overrides are taken relative to `home`
    fn anchor(&mut self) {
        let home = self.home.clone();
        for path in [&mut self.database, &mut self.log_dir, &mut self.scripts_dir]
            .into_iter()
            .flatten()
        {
            if path.is_relative() {
                *path = home.join(&*path);
            }
        }
    }

    pub(crate) fn with_home(mut self, home: &Path) -> Self {
        self.home = home.to_path_buf();
        self.anchor();
        self
    }
}
