use crate::db::{Database, TaskRepository};
use crate::errors::Error;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::info;

/// Deletes completed and failed tasks that finished more than `days` ago
///
/// Pending and running tasks are kept regardless of age, and log files are
/// left on disk. A window reaching past the earliest representable time
/// removes nothing.
///
/// # Returns
///
/// Number of task records removed
///
/// # Errors
///
/// Returns an Error if database operations fail
pub fn cleanup_finished_tasks(database: &Database, days: u32) -> Result<usize, Error> {
    let cutoff = retention_cutoff(Utc::now(), days);
    let removed = TaskRepository::new(&mut *database.get_conn()?)
        .delete_finished_before(cutoff.timestamp_millis())?;
    info!("Removed {} task(s) finished before {}", removed, cutoff.to_rfc3339());
    Ok(removed)
}

fn retention_cutoff(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    TimeDelta::try_days(i64::from(days))
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
