use crate::core::TaskStatus;
use crate::db::models::{NewTask, TaskRow};
use crate::errors::Error;
use crate::schema::tasks;
use crate::utils::now_millis;
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use diesel::sqlite::SqliteConnection;
use std::fmt;

diesel::define_sql_function! {
    fn last_insert_rowid() -> diesel::sql_types::BigInt;
}

/// Addresses a task either by its id or by the pid of its runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSelector {
    Id(i32),
    /// Resolves to the most recent task that recorded this pid
    Pid(i32),
}

impl fmt::Display for TaskSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskSelector::Id(id) => write!(f, "Task {}", id),
            TaskSelector::Pid(pid) => write!(f, "Task with PID {}", pid),
        }
    }
}

/// Repository for managing task records in the SQLite database
///
/// Writes return the number of affected rows. Zero is not an error here;
/// callers decide whether it means "not found".
pub struct TaskRepository<'a> {
    /// Database connection
    pub conn: &'a mut SqliteConnection,
}

impl<'a> TaskRepository<'a> {
    /// Creates a new TaskRepository instance
    pub fn new(conn: &'a mut SqliteConnection) -> Self {
        TaskRepository { conn }
    }

    /// Inserts a new pending task
    ///
    /// # Arguments
    ///
    /// * `command` - Shell command line
    /// * `working_dir` - Absolute directory the command runs in
    /// * `wait_for_id` - Task the new one is queued behind, if any
    ///
    /// # Returns
    ///
    /// The id assigned to the new task
    ///
    /// # Errors
    ///
    /// Returns an Error if database operations fail
    pub fn insert_task(
        &mut self,
        command: &str,
        working_dir: &str,
        wait_for_id: Option<i32>,
    ) -> Result<i32, Error> {
        let new_task = NewTask {
            command,
            working_dir,
            status: TaskStatus::Pending.as_str(),
            wait_for_id,
            created_at: now_millis(),
        };

        diesel::insert_into(tasks::table)
            .values(&new_task)
            .execute(self.conn)?;

        let row_id = diesel::select(last_insert_rowid()).get_result::<i64>(self.conn)?;
        i32::try_from(row_id)
            .map_err(|e| Error::DieselError(DieselError::DeserializationError(Box::new(e))))
    }

    /// Picks the predecessor and inserts the new task in one write transaction,
    /// so two concurrent submissions cannot both miss each other
    ///
    /// # Returns
    ///
    /// The new task id and the running task it must wait for
    ///
    /// # Errors
    ///
    /// Returns an Error if database operations fail
    pub fn enqueue_task(
        &mut self,
        command: &str,
        working_dir: &str,
    ) -> Result<(i32, Option<TaskRow>), Error> {
        self.conn.immediate_transaction(|conn| {
            let mut repo = TaskRepository::new(conn);
            let predecessor = repo.latest_running()?;
            let task_id = repo.insert_task(command, working_dir, predecessor.as_ref().map(|p| p.id))?;
            Ok((task_id, predecessor))
        })
    }

    /// Retrieves a single task by id
    pub fn get_task_by_id(&mut self, task_id: i32) -> Result<Option<TaskRow>, Error> {
        let found = tasks::table
            .find(task_id)
            .select(TaskRow::as_select())
            .first(self.conn)
            .optional()?;
        Ok(found)
    }

    /// Retrieves the most recent task that recorded `pid`
    pub fn get_task_by_pid(&mut self, pid: i32) -> Result<Option<TaskRow>, Error> {
        let found = tasks::table
            .filter(tasks::pid.eq(pid))
            .order(tasks::id.desc())
            .select(TaskRow::as_select())
            .first(self.conn)
            .optional()?;
        Ok(found)
    }

    pub fn get_task(&mut self, selector: TaskSelector) -> Result<Option<TaskRow>, Error> {
        match selector {
            TaskSelector::Id(task_id) => self.get_task_by_id(task_id),
            TaskSelector::Pid(pid) => self.get_task_by_pid(pid),
        }
    }

    /// Retrieves all tasks in `filter_status`, oldest first
    pub fn get_tasks_by_status(&mut self, filter_status: TaskStatus) -> Result<Vec<TaskRow>, Error> {
        self.get_tasks_by_statuses(&[filter_status])
    }

    /// Retrieves all tasks matching any of `filter_statuses`, oldest first
    pub fn get_tasks_by_statuses(
        &mut self,
        filter_statuses: &[TaskStatus],
    ) -> Result<Vec<TaskRow>, Error> {
        let names: Vec<&str> = filter_statuses.iter().map(TaskStatus::as_str).collect();
        let found = tasks::table
            .filter(tasks::status.eq_any(names))
            .order(tasks::id.asc())
            .select(TaskRow::as_select())
            .load(self.conn)?;
        Ok(found)
    }

    /// The `limit` most recent tasks, sorted by id ascending
    pub fn list_recent(&mut self, limit: i64) -> Result<Vec<TaskRow>, Error> {
        let mut found = tasks::table
            .order(tasks::id.desc())
            .limit(limit)
            .select(TaskRow::as_select())
            .load(self.conn)?;
        found.reverse();
        Ok(found)
    }

    /// The newest running task with a recorded pid; new submissions queue behind it
    pub fn latest_running(&mut self) -> Result<Option<TaskRow>, Error> {
        let found = tasks::table
            .filter(tasks::status.eq(TaskStatus::Running.as_str()))
            .filter(tasks::pid.is_not_null())
            .order(tasks::id.desc())
            .select(TaskRow::as_select())
            .first(self.conn)
            .optional()?;
        Ok(found)
    }

    /// Pending → Running, recording the runner's identity
    ///
    /// # Arguments
    ///
    /// * `task_id` - Task being claimed
    /// * `runner_pid` - Pid of the process that now owns the task
    /// * `runner_start` - OS start time of that process, when known
    ///
    /// # Returns
    ///
    /// Number of rows changed; zero when the task is gone or no longer pending
    ///
    /// # Errors
    ///
    /// Returns an Error if database operations fail
    pub fn mark_running(
        &mut self,
        task_id: i32,
        runner_pid: i32,
        runner_start: Option<i64>,
    ) -> Result<usize, Error> {
        let changed = diesel::update(
            tasks::table
                .filter(tasks::id.eq(task_id))
                .filter(tasks::status.eq(TaskStatus::Pending.as_str())),
        )
        .set((
            tasks::status.eq(TaskStatus::Running.as_str()),
            tasks::pid.eq(runner_pid),
            tasks::process_start.eq(runner_start),
            tasks::started_at.eq(now_millis()),
        ))
        .execute(self.conn)?;
        Ok(changed)
    }

    /// Running → Completed/Failed as reported by the owning runner
    ///
    /// Only applies while the row is still running under `runner_pid`, so a
    /// forced correction made in the meantime wins.
    pub fn finish(&mut self, task_id: i32, runner_pid: i32, code: i32) -> Result<usize, Error> {
        self.close_running(task_id, runner_pid, TaskStatus::from_exit_code(code), code)
    }

    /// Running → Failed for a task whose runner vanished without reporting
    pub fn fail_stale(&mut self, task_id: i32, runner_pid: i32, code: i32) -> Result<usize, Error> {
        self.close_running(task_id, runner_pid, TaskStatus::Failed, code)
    }

    fn close_running(
        &mut self,
        task_id: i32,
        runner_pid: i32,
        new_status: TaskStatus,
        code: i32,
    ) -> Result<usize, Error> {
        let changed = diesel::update(
            tasks::table
                .filter(tasks::id.eq(task_id))
                .filter(tasks::status.eq(TaskStatus::Running.as_str()))
                .filter(tasks::pid.eq(runner_pid)),
        )
        .set((
            tasks::status.eq(new_status.as_str()),
            tasks::completed_at.eq(now_millis()),
            tasks::exit_code.eq(code),
        ))
        .execute(self.conn)?;
        Ok(changed)
    }

    /// Operator reset: any state → Pending with every execution field cleared
    pub fn reset_to_pending(&mut self, selector: TaskSelector) -> Result<usize, Error> {
        self.conn.immediate_transaction(|conn| {
            let mut repo = TaskRepository::new(conn);
            let Some(task_id) = repo.resolve(selector)? else {
                return Ok(0);
            };
            let changed = diesel::update(tasks::table.find(task_id))
                .set((
                    tasks::status.eq(TaskStatus::Pending.as_str()),
                    tasks::pid.eq(None::<i32>),
                    tasks::process_start.eq(None::<i64>),
                    tasks::started_at.eq(None::<i64>),
                    tasks::completed_at.eq(None::<i64>),
                    tasks::exit_code.eq(None::<i32>),
                ))
                .execute(repo.conn)?;
            Ok(changed)
        })
    }

    /// Operator completion: any state → Completed with an explicit exit code
    pub fn force_complete(&mut self, selector: TaskSelector, code: i32) -> Result<usize, Error> {
        self.conn.immediate_transaction(|conn| {
            let mut repo = TaskRepository::new(conn);
            let Some(task_id) = repo.resolve(selector)? else {
                return Ok(0);
            };
            let changed = diesel::update(tasks::table.find(task_id))
                .set((
                    tasks::status.eq(TaskStatus::Completed.as_str()),
                    tasks::completed_at.eq(now_millis()),
                    tasks::exit_code.eq(code),
                ))
                .execute(repo.conn)?;
            Ok(changed)
        })
    }

    /// Deletes completed and failed tasks that finished before `cutoff` (ms)
    pub fn delete_finished_before(&mut self, cutoff: i64) -> Result<usize, Error> {
        let finished = vec![TaskStatus::Completed.as_str(), TaskStatus::Failed.as_str()];
        let removed = diesel::delete(
            tasks::table
                .filter(tasks::status.eq_any(finished))
                .filter(tasks::completed_at.lt(cutoff)),
        )
        .execute(self.conn)?;
        Ok(removed)
    }

    fn resolve(&mut self, selector: TaskSelector) -> Result<Option<i32>, Error> {
        match selector {
            TaskSelector::Id(task_id) => Ok(self.get_task_by_id(task_id)?.map(|t| t.id)),
            TaskSelector::Pid(pid) => Ok(self.get_task_by_pid(pid)?.map(|t| t.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_database;

    fn status_of(repo: &mut TaskRepository<'_>, task_id: i32) -> TaskStatus {
        repo.get_task_by_id(task_id)
            .unwrap()
            .unwrap()
            .status
            .parse()
            .unwrap()
    }

    #[test]
    fn insert_creates_one_pending_task_with_fresh_id() {
        let (_dir, database) = temp_database();
        let mut conn = database.get_conn().unwrap();
        let mut repo = TaskRepository::new(&mut conn);

        let first = repo.insert_task("echo one", "/tmp", None).unwrap();
        let second = repo.insert_task("echo two", "/tmp", None).unwrap();
        assert!(second > first);

        let task = repo.get_task_by_id(second).unwrap().unwrap();
        assert_eq!(task.command, "echo two");
        assert_eq!(task.status, "pending");
        assert_eq!(task.pid, None);
        assert_eq!(task.started_at, None);
        assert_eq!(task.exit_code, None);
        assert_eq!(repo.list_recent(50).unwrap().len(), 2);
    }

    #[test]
    fn ids_are_not_reused_after_cleanup() {
        let (_dir, database) = temp_database();
        let mut conn = database.get_conn().unwrap();
        let mut repo = TaskRepository::new(&mut conn);

        let first = repo.insert_task("true", "/tmp", None).unwrap();
        repo.force_complete(TaskSelector::Id(first), 0).unwrap();
        assert_eq!(repo.delete_finished_before(now_millis() + 1000).unwrap(), 1);

        let second = repo.insert_task("true", "/tmp", None).unwrap();
        assert!(second > first);
    }

    #[test]
    fn enqueue_waits_for_newest_running_task() {
        let (_dir, database) = temp_database();
        let mut conn = database.get_conn().unwrap();
        let mut repo = TaskRepository::new(&mut conn);

        let (first, none) = repo.enqueue_task("sleep 5", "/tmp").unwrap();
        assert!(none.is_none());
        repo.mark_running(first, 4242, Some(7)).unwrap();

        let (second, predecessor) = repo.enqueue_task("echo hi", "/tmp").unwrap();
        let predecessor = predecessor.unwrap();
        assert_eq!(predecessor.id, first);
        assert_eq!(predecessor.pid, Some(4242));
        assert_eq!(predecessor.process_start, Some(7));
        repo.mark_running(second, 4343, None).unwrap();

        let (third, predecessor) = repo.enqueue_task("echo bye", "/tmp").unwrap();
        assert_eq!(predecessor.map(|p| p.id), Some(second));
        assert_eq!(repo.get_task_by_id(third).unwrap().unwrap().wait_for_id, Some(second));
    }

    #[test]
    fn self_reported_transitions_are_monotonic() {
        let (_dir, database) = temp_database();
        let mut conn = database.get_conn().unwrap();
        let mut repo = TaskRepository::new(&mut conn);
        let task_id = repo.insert_task("true", "/tmp", None).unwrap();

        assert_eq!(repo.mark_running(task_id, 100, None).unwrap(), 1);
        let running = repo.get_task_by_id(task_id).unwrap().unwrap();
        assert_eq!(running.status, "running");
        assert_eq!(running.pid, Some(100));
        assert!(running.started_at.is_some());

        assert_eq!(repo.finish(task_id, 100, 0).unwrap(), 1);
        assert_eq!(status_of(&mut repo, task_id), TaskStatus::Completed);

        // a second claim or finish cannot move a completed task
        assert_eq!(repo.mark_running(task_id, 101, None).unwrap(), 0);
        assert_eq!(repo.finish(task_id, 100, 3).unwrap(), 0);
        let done = repo.get_task_by_id(task_id).unwrap().unwrap();
        assert_eq!(done.status, "completed");
        assert_eq!(done.exit_code, Some(0));
    }

    #[test]
    fn finish_with_nonzero_code_fails_task() {
        let (_dir, database) = temp_database();
        let mut conn = database.get_conn().unwrap();
        let mut repo = TaskRepository::new(&mut conn);
        let task_id = repo.insert_task("false", "/tmp", None).unwrap();
        repo.mark_running(task_id, 55, None).unwrap();

        assert_eq!(repo.finish(task_id, 55, 1).unwrap(), 1);
        let task = repo.get_task_by_id(task_id).unwrap().unwrap();
        assert_eq!(task.status, "failed");
        assert_eq!(task.exit_code, Some(1));
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn finish_from_another_pid_is_ignored() {
        let (_dir, database) = temp_database();
        let mut conn = database.get_conn().unwrap();
        let mut repo = TaskRepository::new(&mut conn);
        let task_id = repo.insert_task("true", "/tmp", None).unwrap();
        repo.mark_running(task_id, 55, None).unwrap();

        assert_eq!(repo.finish(task_id, 56, 0).unwrap(), 0);
        assert_eq!(status_of(&mut repo, task_id), TaskStatus::Running);
    }

    #[test]
    fn writes_to_missing_rows_affect_nothing() {
        let (_dir, database) = temp_database();
        let mut conn = database.get_conn().unwrap();
        let mut repo = TaskRepository::new(&mut conn);

        assert_eq!(repo.mark_running(99, 1, None).unwrap(), 0);
        assert_eq!(repo.finish(99, 1, 0).unwrap(), 0);
        assert_eq!(repo.reset_to_pending(TaskSelector::Id(99)).unwrap(), 0);
        assert_eq!(repo.force_complete(TaskSelector::Pid(99), 0).unwrap(), 0);
        assert!(repo.get_task_by_id(99).unwrap().is_none());
    }

    #[test]
    fn reset_clears_execution_fields_and_is_idempotent() {
        let (_dir, database) = temp_database();
        let mut conn = database.get_conn().unwrap();
        let mut repo = TaskRepository::new(&mut conn);
        let task_id = repo.insert_task("false", "/tmp", None).unwrap();
        repo.mark_running(task_id, 77, Some(12)).unwrap();
        repo.finish(task_id, 77, 2).unwrap();

        for _ in 0..2 {
            assert_eq!(repo.reset_to_pending(TaskSelector::Id(task_id)).unwrap(), 1);
            let task = repo.get_task_by_id(task_id).unwrap().unwrap();
            assert_eq!(task.status, "pending");
            assert_eq!(task.pid, None);
            assert_eq!(task.process_start, None);
            assert_eq!(task.started_at, None);
            assert_eq!(task.completed_at, None);
            assert_eq!(task.exit_code, None);
            assert_eq!(task.command, "false");
        }
    }

    #[test]
    fn force_complete_by_pid_targets_latest_task_with_that_pid() {
        let (_dir, database) = temp_database();
        let mut conn = database.get_conn().unwrap();
        let mut repo = TaskRepository::new(&mut conn);
        let old = repo.insert_task("old", "/tmp", None).unwrap();
        repo.mark_running(old, 300, None).unwrap();
        repo.finish(old, 300, 1).unwrap();
        let new = repo.insert_task("new", "/tmp", None).unwrap();
        repo.mark_running(new, 300, None).unwrap();

        assert_eq!(repo.force_complete(TaskSelector::Pid(300), 5).unwrap(), 1);

        let forced = repo.get_task_by_id(new).unwrap().unwrap();
        assert_eq!(forced.status, "completed");
        assert_eq!(forced.exit_code, Some(5));
        assert_eq!(status_of(&mut repo, old), TaskStatus::Failed);
    }

    #[test]
    fn fail_stale_only_touches_running_rows() {
        let (_dir, database) = temp_database();
        let mut conn = database.get_conn().unwrap();
        let mut repo = TaskRepository::new(&mut conn);
        let task_id = repo.insert_task("sleep 100", "/tmp", None).unwrap();

        assert_eq!(repo.fail_stale(task_id, 9, -1).unwrap(), 0);
        repo.mark_running(task_id, 9, None).unwrap();
        assert_eq!(repo.fail_stale(task_id, 9, -1).unwrap(), 1);

        let task = repo.get_task_by_id(task_id).unwrap().unwrap();
        assert_eq!(task.status, "failed");
        assert_eq!(task.exit_code, Some(-1));
    }

    #[test]
    fn filtered_reads_by_status() {
        let (_dir, database) = temp_database();
        let mut conn = database.get_conn().unwrap();
        let mut repo = TaskRepository::new(&mut conn);
        let a = repo.insert_task("a", "/tmp", None).unwrap();
        let b = repo.insert_task("b", "/tmp", None).unwrap();
        repo.mark_running(b, 10, None).unwrap();

        let pending = repo.get_tasks_by_status(TaskStatus::Pending).unwrap();
        assert_eq!(pending.iter().map(|t| t.id).collect::<Vec<_>>(), vec![a]);
        let active = repo
            .get_tasks_by_statuses(&[TaskStatus::Pending, TaskStatus::Running])
            .unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(repo.get_task_by_pid(10).unwrap().map(|t| t.id), Some(b));
    }

    #[test]
    fn list_recent_keeps_newest_in_ascending_order() {
        let (_dir, database) = temp_database();
        let mut conn = database.get_conn().unwrap();
        let mut repo = TaskRepository::new(&mut conn);
        for n in 0..5 {
            repo.insert_task(&format!("echo {}", n), "/tmp", None).unwrap();
        }

        let listed = repo.list_recent(3).unwrap();
        let commands: Vec<_> = listed.iter().map(|t| t.command.as_str()).collect();
        assert_eq!(commands, vec!["echo 2", "echo 3", "echo 4"]);
    }
}
