use crate::schema::tasks;
use diesel::{Identifiable, Insertable, Queryable, Selectable};
use serde::{Deserialize, Serialize};

/// Represents a task row in the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = tasks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskRow {
    /// Auto-assigned primary key, never reused
    pub id: i32,
    /// Shell command line
    pub command: String,
    /// Absolute working directory
    pub working_dir: String,
    /// Lowercase status name, see `TaskStatus`
    pub status: String,
    /// Pid of the runner process
    pub pid: Option<i32>,
    /// Start time of `pid` in clock ticks since boot
    pub process_start: Option<i64>,
    /// Task this one was queued behind
    pub wait_for_id: Option<i32>,
    /// Milliseconds since the Unix epoch
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub exit_code: Option<i32>,
}

/// Values written when a task is submitted
#[derive(Debug, Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTask<'a> {
    pub command: &'a str,
    pub working_dir: &'a str,
    pub status: &'a str,
    pub wait_for_id: Option<i32>,
    pub created_at: i64,
}
