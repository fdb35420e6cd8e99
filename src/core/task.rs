use super::liveness::ProcessIdentity;
use super::task_status::TaskStatus;
use crate::db::TaskRow;
use crate::errors::Error;
use crate::utils::millis_to_datetime;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// A queued shell command and its execution record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: i32,
    /// Shell command line as submitted
    pub command: String,
    /// Directory the command runs in
    pub working_dir: PathBuf,
    pub status: TaskStatus,
    /// Pid of the runner; only live while the task is running
    pub pid: Option<i32>,
    /// OS start time paired with `pid`
    pub process_start: Option<i64>,
    /// Task this one was queued behind
    pub wait_for_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
}

impl Task {
    /// Identity of the runner process, if one was recorded
    pub fn process(&self) -> Option<ProcessIdentity> {
        self.pid
            .map(|pid| ProcessIdentity::new(pid, self.process_start))
    }

    /// Time spent running: up to now while running, up to completion once finished
    ///
    /// # Arguments
    ///
    /// * `now` - Reference time for tasks that are still running
    pub fn run_time(&self, now: DateTime<Utc>) -> Option<Duration> {
        let started = self.started_at?;
        let end = match self.status {
            TaskStatus::Running => now,
            TaskStatus::Completed | TaskStatus::Failed => self.completed_at?,
            TaskStatus::Pending => return None,
        };
        (end - started).to_std().ok()
    }
}

impl TryFrom<TaskRow> for Task {
    type Error = Error;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            id: row.id,
            command: row.command,
            working_dir: PathBuf::from(row.working_dir),
            status: row.status.parse()?,
            pid: row.pid,
            process_start: row.process_start,
            wait_for_id: row.wait_for_id,
            created_at: millis_to_datetime(row.created_at).unwrap_or_default(),
            started_at: row.started_at.and_then(millis_to_datetime),
            completed_at: row.completed_at.and_then(millis_to_datetime),
            exit_code: row.exit_code,
        })
    }
}

/// Converts a batch of rows, failing on the first unreadable status
pub fn tasks_from_rows(rows: Vec<TaskRow>) -> Result<Vec<Task>, Error> {
    rows.into_iter().map(Task::try_from).collect()
}
