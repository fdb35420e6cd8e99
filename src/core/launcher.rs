use super::liveness::ProcessIdentity;
use super::sequencer::Predecessor;
use super::task::Task;
use super::TaskStatus;
use crate::config::Settings;
use crate::constants::{SPAWN_FAILURE_EXIT_CODE, STALE_EXIT_CODE};
use crate::db::{Database, TaskRepository, TaskSelector};
use crate::errors::Error;
use indicatif::{ProgressBar, ProgressStyle};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const HANDSHAKE_POLL: Duration = Duration::from_millis(50);

/// Creates task records and detaches a runner process for each
#[derive(Debug)]
pub struct Launcher<'a> {
    database: &'a Database,
    settings: &'a Settings,
    program: PathBuf,
}

impl<'a> Launcher<'a> {
    /// Launcher that re-executes the current binary as the runner
    pub fn new(database: &'a Database, settings: &'a Settings) -> Result<Self, Error> {
        Ok(Launcher {
            database,
            settings,
            program: std::env::current_exe()?,
        })
    }

    /// Queues `command` to run in `working_dir`
    ///
    /// The directory must already be absolute and exist (see
    /// [`resolve_working_dir`]). Returns once the runner has claimed the task
    /// or the handshake timeout elapsed.
    ///
    /// # Errors
    ///
    /// Returns an Error if the store cannot be written
    pub async fn submit(&self, command: &str, working_dir: &Path) -> Result<i32, Error> {
        let (task_id, predecessor_row) = TaskRepository::new(&mut *self.database.get_conn()?)
            .enqueue_task(command, &working_dir.to_string_lossy())?;
        let predecessor = predecessor_row.as_ref().and_then(Predecessor::from_row);
        match &predecessor {
            Some(p) => info!("Task {} queued behind task {} (pid {})", task_id, p.task_id, p.process.pid),
            None => info!("Task {} queued, nothing running", task_id),
        }

        match self.spawn_runner(task_id, predecessor) {
            Ok(pid) => debug!("Runner for task {} detached as pid {}", task_id, pid),
            Err(e) => {
                error!("Could not start runner for task {}: {}", task_id, e);
                self.fail_unlaunched(task_id)?;
                return Err(e);
            }
        }

        if !self.await_handshake(task_id).await? {
            warn!(
                "Runner for task {} did not report within {:?}",
                task_id,
                self.settings.handshake_timeout()
            );
        }
        Ok(task_id)
    }

    fn spawn_runner(&self, task_id: i32, predecessor: Option<Predecessor>) -> Result<u32, Error> {
        let mut command = Command::new(&self.program);
        command.arg("--home").arg(&self.settings.home);
        if let Some(source) = &self.settings.source {
            command.arg("--config").arg(source);
        }
        command.arg("exec").arg(task_id.to_string());
        if let Some(predecessor) = predecessor {
            command
                .arg("--wait-pid")
                .arg(predecessor.process.pid.to_string());
            if let Some(start) = predecessor.process.start {
                command.arg("--wait-start").arg(start.to_string());
            }
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // new session: no controlling terminal, no SIGHUP when the launcher's shell goes away
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = command.spawn()?;
        Ok(child.id())
    }

    /// A task whose runner never started goes through running to failed under our pid
    fn fail_unlaunched(&self, task_id: i32) -> Result<(), Error> {
        let me = ProcessIdentity::current();
        let mut conn = self.database.get_conn()?;
        let mut repo = TaskRepository::new(&mut conn);
        if repo.mark_running(task_id, me.pid, me.start)? > 0 {
            repo.finish(task_id, me.pid, SPAWN_FAILURE_EXIT_CODE)?;
        }
        Ok(())
    }

    /// Polls until the task leaves pending, so the next submission sees it running
    async fn await_handshake(&self, task_id: i32) -> Result<bool, Error> {
        let deadline = Instant::now() + self.settings.handshake_timeout();
        loop {
            let row = TaskRepository::new(&mut *self.database.get_conn()?).get_task_by_id(task_id)?;
            match row {
                Some(row) if row.status != TaskStatus::Pending.as_str() => return Ok(true),
                Some(_) => {}
                None => return Err(Error::TaskNotFound(TaskSelector::Id(task_id))),
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(HANDSHAKE_POLL).await;
        }
    }

    /// Blocks with a spinner until the task completes or fails
    ///
    /// A runner that dies without reporting fails its task the same way
    /// `refresh` would.
    pub async fn wait_until_finished(&self, task_id: i32) -> Result<Task, Error> {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg} {elapsed}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));

        let result = loop {
            let row = TaskRepository::new(&mut *self.database.get_conn()?).get_task_by_id(task_id)?;
            let Some(row) = row else {
                break Err(Error::TaskNotFound(TaskSelector::Id(task_id)));
            };
            let task = Task::try_from(row)?;
            if task.status.is_terminal() {
                break Ok(task);
            }
            if let Some(process) = task.process().filter(|p| !p.is_alive()) {
                let failed = TaskRepository::new(&mut *self.database.get_conn()?)
                    .fail_stale(task_id, process.pid, STALE_EXIT_CODE)?;
                if failed > 0 {
                    warn!("Runner {} for task {} exited without reporting", process.pid, task_id);
                }
                // re-read either way, the runner may have reported just before exiting
                continue;
            }
            spinner.set_message(format!("Task {} {}", task_id, task.status));
            tokio::time::sleep(self.settings.poll_interval()).await;
        };
        spinner.finish_and_clear();
        result
    }
}

/// Absolute, existing directory for a submission
///
/// Defaults to the current directory; relative paths are taken from it.
///
/// # Errors
///
/// Returns `Error::WorkingDirMissing` if the path is not an existing directory
pub fn resolve_working_dir(dir: Option<&Path>) -> Result<PathBuf, Error> {
    let cwd = std::env::current_dir()?;
    let requested = match dir {
        Some(dir) => cwd.join(dir),
        None => cwd,
    };
    match requested.canonicalize() {
        Ok(path) if path.is_dir() => Ok(path),
        _ => Err(Error::WorkingDirMissing(requested)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_settings;

    #[test]
    fn missing_directory_is_rejected() {
        let home = tempfile::tempdir().unwrap();
        let missing = home.path().join("nonexistent");
        assert!(matches!(
            resolve_working_dir(Some(&missing)),
            Err(Error::WorkingDirMissing(path)) if path == missing
        ));
    }

    #[test]
    fn file_is_not_a_working_directory() {
        let home = tempfile::tempdir().unwrap();
        let file = home.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(matches!(
            resolve_working_dir(Some(&file)),
            Err(Error::WorkingDirMissing(_))
        ));
    }

    #[test]
    fn existing_directory_is_made_absolute() {
        let home = tempfile::tempdir().unwrap();
        let resolved = resolve_working_dir(Some(home.path())).unwrap();
        assert!(resolved.is_absolute());
        assert_eq!(resolved, home.path().canonicalize().unwrap());
    }

    #[test]
    fn default_is_current_directory() {
        let resolved = resolve_working_dir(None).unwrap();
        assert_eq!(resolved, std::env::current_dir().unwrap().canonicalize().unwrap());
    }

    #[tokio::test]
    async fn waiting_on_a_dead_runner_fails_the_task() {
        let home = tempfile::tempdir().unwrap();
        let settings = load_settings(home.path(), None).unwrap();
        let database = Database::open(&settings.database_path(), settings.busy_timeout()).unwrap();

        let mut child = Command::new("true").spawn().unwrap();
        let dead_pid = child.id() as i32;
        child.wait().unwrap();

        let task_id = {
            let mut conn = database.get_conn().unwrap();
            let mut repo = TaskRepository::new(&mut conn);
            let task_id = repo.insert_task("sleep 100", "/tmp", None).unwrap();
            repo.mark_running(task_id, dead_pid, None).unwrap();
            task_id
        };

        let launcher = Launcher::new(&database, &settings).unwrap();
        let task = tokio::time::timeout(
            Duration::from_secs(4),
            launcher.wait_until_finished(task_id),
        )
        .await
        .expect("wait should end once the runner is gone")
        .unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.exit_code, Some(STALE_EXIT_CODE));
    }
}
