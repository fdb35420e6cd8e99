use super::liveness::ProcessIdentity;
use super::sequencer::wait_for_exit;
use super::task::Task;
use super::TaskStatus;
use crate::config::Settings;
use crate::constants::{SIGNAL_EXIT_CODE_BASE, SPAWN_FAILURE_EXIT_CODE, TASK_SHELL};
use crate::db::{Database, TaskRepository};
use crate::errors::Error;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tracing::{error, info, warn};

/// Body of the detached runner process for one task
///
/// Claims the task, waits for the predecessor if there is one, runs the
/// command and reports the outcome. Every transition is a direct store call
/// made on behalf of this process.
///
/// # Arguments
///
/// * `database` - Task store
/// * `settings` - Resolved queue settings
/// * `task_id` - Task to execute
/// * `wait_for` - Process that must exit before the command starts
///
/// # Returns
///
/// The command's exit code, or `None` when the task was no longer ours to run
///
/// # Errors
///
/// Returns an Error if the store cannot be reached
pub async fn run_task(
    database: &Database,
    settings: &Settings,
    task_id: i32,
    wait_for: Option<ProcessIdentity>,
) -> Result<Option<i32>, Error> {
    let me = ProcessIdentity::current();
    let claimed = TaskRepository::new(&mut *database.get_conn()?).mark_running(task_id, me.pid, me.start)?;
    if claimed == 0 {
        warn!("Task {} is not pending, runner {} exiting", task_id, me.pid);
        return Ok(None);
    }
    info!("Task {} started as pid {}", task_id, me.pid);

    if let Some(predecessor) = wait_for {
        wait_for_exit(predecessor, settings.poll_interval()).await;
    }

    // an operator may have reset or completed the task while it waited
    let Some(task) = still_owned(database, task_id, me.pid)? else {
        warn!("Task {} was taken over while queued, not running it", task_id);
        return Ok(None);
    };

    let script = settings.script_path(task_id);
    let code = match execute(settings, &task, &script).await {
        Ok(code) => code,
        Err(e) => {
            error!("Task {} could not be started: {}", task_id, e);
            note_start_failure(settings, task_id, &e);
            SPAWN_FAILURE_EXIT_CODE
        }
    };
    remove_script(&script);

    let reported = TaskRepository::new(&mut *database.get_conn()?).finish(task_id, me.pid, code)?;
    if reported == 0 {
        warn!("Task {} changed while running, exit code {} not recorded", task_id, code);
    } else {
        info!(
            "Task {} {} with exit code {}",
            task_id,
            TaskStatus::from_exit_code(code),
            code
        );
    }
    Ok(Some(code))
}

fn still_owned(database: &Database, task_id: i32, pid: i32) -> Result<Option<Task>, Error> {
    let row = TaskRepository::new(&mut *database.get_conn()?).get_task_by_id(task_id)?;
    let Some(row) = row else {
        return Ok(None);
    };
    let task = Task::try_from(row)?;
    if task.status == TaskStatus::Running && task.pid == Some(pid) {
        Ok(Some(task))
    } else {
        Ok(None)
    }
}

/// Writes the ephemeral script and runs it with output redirected to the task logs
async fn execute(settings: &Settings, task: &Task, script: &Path) -> Result<i32, Error> {
    fs::write(
        script,
        format!("#!{}\n# atlasrun task {}\n{}\n", TASK_SHELL, task.id, task.command),
    )?;
    fs::set_permissions(script, fs::Permissions::from_mode(0o700))?;

    let stdout = File::create(settings.stdout_log(task.id))?;
    let stderr = File::create(settings.stderr_log(task.id))?;

    let status = tokio::process::Command::new(TASK_SHELL)
        .arg(script)
        .current_dir(&task.working_dir)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .status()
        .await?;
    Ok(exit_code_of(status))
}

/// Exit code as a shell would report it, `128 + n` for signal `n`
pub fn exit_code_of(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => status
            .signal()
            .map(|signal| SIGNAL_EXIT_CODE_BASE + signal)
            .unwrap_or(SPAWN_FAILURE_EXIT_CODE),
    }
}

fn note_start_failure(settings: &Settings, task_id: i32, cause: &Error) {
    let message = format!("atlasrun: failed to start command: {}\n", cause);
    if let Err(e) = fs::write(settings.stderr_log(task_id), message) {
        warn!("Could not write stderr log for task {}: {}", task_id, e);
    }
}

fn remove_script(script: &Path) {
    match fs::remove_file(script) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", script.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_settings;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Settings, Database) {
        let home = tempfile::tempdir().unwrap();
        let settings = load_settings(home.path(), None).unwrap();
        let database = Database::open(&settings.database_path(), settings.busy_timeout()).unwrap();
        (home, settings, database)
    }

    fn submit(database: &Database, command: &str, dir: &Path) -> i32 {
        TaskRepository::new(&mut database.get_conn().unwrap())
            .insert_task(command, &dir.to_string_lossy(), None)
            .unwrap()
    }

    fn load(database: &Database, task_id: i32) -> Task {
        let row = TaskRepository::new(&mut database.get_conn().unwrap())
            .get_task_by_id(task_id)
            .unwrap()
            .unwrap();
        Task::try_from(row).unwrap()
    }

    #[tokio::test]
    async fn successful_command_completes_and_logs_output() {
        let (home, settings, database) = setup();
        let task_id = submit(&database, "echo hi; echo oops >&2", home.path());

        let code = run_task(&database, &settings, task_id, None).await.unwrap();

        assert_eq!(code, Some(0));
        let task = load(&database, task_id);
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.exit_code, Some(0));
        assert_eq!(task.pid, Some(std::process::id() as i32));
        assert!(task.started_at.is_some() && task.completed_at.is_some());
        assert_eq!(fs::read_to_string(settings.stdout_log(task_id)).unwrap(), "hi\n");
        assert_eq!(fs::read_to_string(settings.stderr_log(task_id)).unwrap(), "oops\n");
        assert!(!settings.script_path(task_id).exists());
    }

    #[tokio::test]
    async fn failing_command_records_its_exit_code() {
        let (home, settings, database) = setup();
        let task_id = submit(&database, "exit 3", home.path());

        assert_eq!(run_task(&database, &settings, task_id, None).await.unwrap(), Some(3));
        let task = load(&database, task_id);
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.exit_code, Some(3));
    }

    #[tokio::test]
    async fn unknown_command_fails_the_task() {
        let (home, settings, database) = setup();
        let task_id = submit(&database, "definitely-not-a-command-atlasrun", home.path());

        run_task(&database, &settings, task_id, None).await.unwrap();
        let task = load(&database, task_id);
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.exit_code, Some(127));
    }

    #[tokio::test]
    async fn command_runs_in_working_dir() {
        let (home, settings, database) = setup();
        let work = home.path().join("work");
        fs::create_dir(&work).unwrap();
        let task_id = submit(&database, "pwd", &work);

        run_task(&database, &settings, task_id, None).await.unwrap();
        let printed = fs::read_to_string(settings.stdout_log(task_id)).unwrap();
        assert_eq!(
            Path::new(printed.trim()).canonicalize().unwrap(),
            work.canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn vanished_working_dir_fails_the_task() {
        let (home, settings, database) = setup();
        let task_id = submit(&database, "true", &home.path().join("gone"));

        assert_eq!(
            run_task(&database, &settings, task_id, None).await.unwrap(),
            Some(SPAWN_FAILURE_EXIT_CODE)
        );
        assert_eq!(load(&database, task_id).status, TaskStatus::Failed);
        assert!(fs::read_to_string(settings.stderr_log(task_id))
            .unwrap()
            .contains("failed to start command"));
    }

    #[tokio::test]
    async fn task_that_is_not_pending_is_left_alone() {
        let (home, settings, database) = setup();
        let task_id = submit(&database, "echo never", home.path());
        TaskRepository::new(&mut database.get_conn().unwrap())
            .force_complete(crate::db::TaskSelector::Id(task_id), 0)
            .unwrap();

        assert_eq!(run_task(&database, &settings, task_id, None).await.unwrap(), None);
        assert!(!settings.stdout_log(task_id).exists());
    }

    #[tokio::test]
    async fn task_reset_while_queued_is_not_run() {
        let (home, mut settings, database) = setup();
        settings.poll_interval_ms = 50;
        let task_id = submit(&database, "echo never", home.path());

        let mut predecessor = tokio::process::Command::new("sleep")
            .arg("0.5")
            .spawn()
            .unwrap();
        let wait_for = ProcessIdentity::of(predecessor.id().unwrap() as i32);
        let reaper = tokio::spawn(async move { predecessor.wait().await });

        let reset = async {
            tokio::time::sleep(std::time::Duration::from_millis(150)).await;
            assert_eq!(load(&database, task_id).status, TaskStatus::Running);
            TaskRepository::new(&mut database.get_conn().unwrap())
                .reset_to_pending(crate::db::TaskSelector::Id(task_id))
                .unwrap()
        };
        let (outcome, reset_rows) = tokio::join!(
            run_task(&database, &settings, task_id, Some(wait_for)),
            reset
        );

        assert_eq!(reset_rows, 1);
        assert_eq!(outcome.unwrap(), None);
        assert!(!settings.stdout_log(task_id).exists());
        let task = load(&database, task_id);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.pid, None);
        assert!(reaper.await.unwrap().unwrap().success());
    }

    #[test]
    fn signal_exit_maps_to_shell_convention() {
        let status = std::process::Command::new("/bin/sh")
            .args(["-c", "kill -TERM $$"])
            .status()
            .unwrap();
        assert_eq!(exit_code_of(status), 128 + libc::SIGTERM);
    }
}
