//! Process liveness checks and the sweep that heals stale `running` records.
//!
//! A pid alone is ambiguous once the original process exits and the kernel
//! hands the number to someone else. Where the OS exposes it, the start time
//! of the process is recorded next to the pid, and both must match.

use crate::constants::STALE_EXIT_CODE;
use crate::core::task::tasks_from_rows;
use crate::core::TaskStatus;
use crate::db::{Database, TaskRepository};
use crate::errors::Error;
use tracing::{debug, info, warn};

/// A pid plus the start time it had when it was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub pid: i32,
    /// Clock ticks since boot, `None` when the platform does not expose it
    pub start: Option<i64>,
}

impl ProcessIdentity {
    pub fn new(pid: i32, start: Option<i64>) -> Self {
        ProcessIdentity { pid, start }
    }

    /// Identity of the calling process
    pub fn current() -> Self {
        let pid = std::process::id() as i32;
        ProcessIdentity::of(pid)
    }

    /// Identity of whatever process currently holds `pid`
    pub fn of(pid: i32) -> Self {
        let start = read_stat(pid).map(|stat| stat.start);
        ProcessIdentity { pid, start }
    }

    /// Whether `pid` still names the process this identity was taken from
    ///
    /// Zombies count as exited. When both start times are known they must be
    /// equal, otherwise the pid has been reused.
    pub fn is_alive(&self) -> bool {
        if self.pid <= 0 || !pid_exists(self.pid) {
            return false;
        }
        match read_stat(self.pid) {
            Some(stat) if stat.zombie => false,
            Some(stat) => match self.start {
                Some(recorded) => recorded == stat.start,
                None => true,
            },
            None => true,
        }
    }
}

#[cfg(unix)]
fn pid_exists(pid: i32) -> bool {
    // signal 0 only performs the permission and existence checks
    if unsafe { libc::kill(pid as libc::pid_t, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_exists(_pid: i32) -> bool {
    false
}

struct ProcStat {
    zombie: bool,
    start: i64,
}

/// Parses `/proc/<pid>/stat`; `None` off Linux or once the entry is gone
fn read_stat(pid: i32) -> Option<ProcStat> {
    let raw = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    parse_stat(&raw)
}

fn parse_stat(raw: &str) -> Option<ProcStat> {
    // comm is parenthesised and may itself contain spaces or parens
    let after_comm = &raw[raw.rfind(')')? + 1..];
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // fields[0] is field 3 (state); starttime is field 22
    let state = fields.first()?;
    let start = fields.get(19)?.parse().ok()?;
    Some(ProcStat {
        zombie: *state == "Z" || *state == "X",
        start,
    })
}

/// Marks every running task whose process is gone as failed
///
/// # Arguments
///
/// * `database` - Task store
///
/// # Returns
///
/// Ids of the tasks that were marked failed
///
/// # Errors
///
/// Returns an Error if database operations fail
pub fn reconcile_running_tasks(database: &Database) -> Result<Vec<i32>, Error> {
    let mut conn = database.get_conn()?;
    let mut repo = TaskRepository::new(&mut conn);
    let running = tasks_from_rows(repo.get_tasks_by_status(TaskStatus::Running)?)?;

    let mut failed = Vec::new();
    for task in running {
        let Some(process) = task.process() else {
            warn!("Task {} is running without a recorded pid, leaving it", task.id);
            continue;
        };
        if process.is_alive() {
            debug!("Task {} still alive as pid {}", task.id, process.pid);
            continue;
        }
        if repo.fail_stale(task.id, process.pid, STALE_EXIT_CODE)? > 0 {
            info!("Task {} lost its process {}, marked failed", task.id, process.pid);
            failed.push(task.id);
        }
    }
    Ok(failed)
}
