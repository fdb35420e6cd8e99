//! FIFO ordering between independently launched runners.
//!
//! There is no scheduler process. At submission time the newest running task
//! becomes the predecessor, and the new runner polls until that process is
//! gone before it starts its own command.

use super::liveness::ProcessIdentity;
use crate::db::TaskRow;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// The running task a new submission is queued behind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Predecessor {
    pub task_id: i32,
    pub process: ProcessIdentity,
}

impl Predecessor {
    /// Builds the wait condition from the predecessor's row
    ///
    /// Rows without a pid cannot be waited on and yield `None`.
    pub fn from_row(row: &TaskRow) -> Option<Self> {
        let pid = row.pid?;
        Some(Predecessor {
            task_id: row.id,
            process: ProcessIdentity::new(pid, row.process_start),
        })
    }
}

/// Blocks until `process` has exited, checking every `interval`
///
/// # Returns
///
/// How long the caller was held back
pub async fn wait_for_exit(process: ProcessIdentity, interval: Duration) -> Duration {
    let began = Instant::now();
    if !process.is_alive() {
        return began.elapsed();
    }

    info!("Waiting for previous task (PID: {}) to complete", process.pid);
    while process.is_alive() {
        tokio::time::sleep(interval).await;
        debug!("Still waiting on pid {}", process.pid);
    }
    let waited = began.elapsed();
    info!(
        "Previous task (PID: {}) completed after {}, starting",
        process.pid,
        humantime::format_duration(Duration::from_secs(waited.as_secs()))
    );
    waited
}
