use crate::cli::Commands;
use crate::config::Settings;
use crate::core::{
    cleanup_finished_tasks, reconcile_running_tasks, resolve_working_dir, run_task,
    tasks_from_rows, Launcher, ProcessIdentity, Task, TaskStatus,
};
use crate::db::{Database, TaskRepository, TaskSelector};
use crate::display;
use crate::errors::Error;
use chrono::Utc;
use std::path::PathBuf;
use tracing::info;

fn selector(target: i32, by_pid: bool) -> TaskSelector {
    if by_pid {
        TaskSelector::Pid(target)
    } else {
        TaskSelector::Id(target)
    }
}

/// Runs one operator command against the store
///
/// # Errors
///
/// Returns an Error for validation failures, missing tasks and store failures
pub async fn dispatch(command: Commands, settings: &Settings) -> Result<(), Error> {
    let database = Database::open(&settings.database_path(), settings.busy_timeout())?;

    match command {
        Commands::Submit { dir, wait, command } => {
            submit(&database, settings, dir, wait, &command).await
        }
        Commands::Status => show_status(&database),
        Commands::List { json } => list_tasks(&database, settings, json),
        Commands::Info { task_id, json } => show_task_info(&database, settings, task_id, json),
        Commands::Cleanup { days } => {
            let removed = cleanup_finished_tasks(&database, days)?;
            println!("Cleaned up {} task(s) older than {} days", removed, days);
            Ok(())
        }
        Commands::Refresh => {
            let failed = reconcile_running_tasks(&database)?;
            println!("Marked {} stale task(s) as failed", failed.len());
            for task_id in failed {
                println!("  {}", task_id);
            }
            Ok(())
        }
        Commands::MarkPending { target, pid } => mark_pending(&database, selector(target, pid)),
        Commands::MarkRunning { task_id, as_pid } => mark_running(&database, task_id, as_pid),
        Commands::MarkComplete {
            target,
            exit_code,
            pid,
            force,
        } => mark_complete(&database, selector(target, pid), exit_code, force),
        Commands::Exec {
            task_id,
            wait_pid,
            wait_start,
        } => {
            let wait_for = wait_pid.map(|pid| ProcessIdentity::new(pid, wait_start));
            run_task(&database, settings, task_id, wait_for).await?;
            Ok(())
        }
    }
}

async fn submit(
    database: &Database,
    settings: &Settings,
    dir: Option<PathBuf>,
    wait: bool,
    words: &[String],
) -> Result<(), Error> {
    let command = words.join(" ");
    if command.trim().is_empty() {
        return Err(Error::EmptyCommand);
    }
    let working_dir = resolve_working_dir(dir.as_deref())?;

    let launcher = Launcher::new(database, settings)?;
    let task_id = launcher.submit(&command, &working_dir).await?;
    if !wait {
        println!("Task {} submitted", task_id);
        return Ok(());
    }

    let task = launcher.wait_until_finished(task_id).await?;
    let exit_code = task
        .exit_code
        .map_or_else(|| "-".to_string(), |code| code.to_string());
    println!("Task {} {} (exit code {})", task_id, task.status, exit_code);
    Ok(())
}

fn show_status(database: &Database) -> Result<(), Error> {
    let mut conn = database.get_conn()?;
    let mut repo = TaskRepository::new(&mut conn);
    let pending = tasks_from_rows(repo.get_tasks_by_status(TaskStatus::Pending)?)?;
    let running = tasks_from_rows(repo.get_tasks_by_status(TaskStatus::Running)?)?;
    println!("{}", display::render_status(&pending, &running));
    Ok(())
}

fn list_tasks(database: &Database, settings: &Settings, json: bool) -> Result<(), Error> {
    let rows = TaskRepository::new(&mut *database.get_conn()?).list_recent(settings.list_limit)?;
    let tasks = tasks_from_rows(rows)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
    } else {
        println!("{}", display::render_task_table(&tasks, Utc::now()));
    }
    Ok(())
}

fn show_task_info(
    database: &Database,
    settings: &Settings,
    task_id: i32,
    json: bool,
) -> Result<(), Error> {
    let row = TaskRepository::new(&mut *database.get_conn()?)
        .get_task_by_id(task_id)?
        .ok_or(Error::TaskNotFound(TaskSelector::Id(task_id)))?;
    let task = Task::try_from(row)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&task)?);
    } else {
        println!("{}", display::render_task_info(&task, settings, Utc::now()));
    }
    Ok(())
}

fn mark_pending(database: &Database, selector: TaskSelector) -> Result<(), Error> {
    let changed = TaskRepository::new(&mut *database.get_conn()?).reset_to_pending(selector)?;
    if changed == 0 {
        return Err(Error::TaskNotFound(selector));
    }
    info!("{} forced back to pending", selector);
    println!("{} marked pending", selector);
    Ok(())
}

fn mark_running(database: &Database, task_id: i32, as_pid: Option<i32>) -> Result<(), Error> {
    let runner_pid = as_pid.unwrap_or_else(|| std::os::unix::process::parent_id() as i32);
    let runner = ProcessIdentity::of(runner_pid);

    let mut conn = database.get_conn()?;
    let mut repo = TaskRepository::new(&mut conn);
    if repo.mark_running(task_id, runner.pid, runner.start)? == 0 {
        let selector = TaskSelector::Id(task_id);
        return Err(not_found_or_wrong_state(&mut repo, selector, TaskStatus::Pending)?);
    }
    println!("Task {} marked running (PID: {})", task_id, runner.pid);
    Ok(())
}

fn mark_complete(
    database: &Database,
    selector: TaskSelector,
    exit_code: i32,
    force: bool,
) -> Result<(), Error> {
    let mut conn = database.get_conn()?;
    let mut repo = TaskRepository::new(&mut conn);

    if force {
        if repo.force_complete(selector, exit_code)? == 0 {
            return Err(Error::TaskNotFound(selector));
        }
        info!("{} forced to completed with exit code {}", selector, exit_code);
        println!("{} marked completed (exit code {})", selector, exit_code);
        return Ok(());
    }

    let task = repo
        .get_task(selector)?
        .ok_or(Error::TaskNotFound(selector))?;
    let runner_pid = task.pid.ok_or(Error::NotInState {
        selector,
        expected: TaskStatus::Running,
    })?;
    if repo.finish(task.id, runner_pid, exit_code)? == 0 {
        return Err(not_found_or_wrong_state(&mut repo, selector, TaskStatus::Running)?);
    }
    println!(
        "Task {} marked {} (exit code {})",
        task.id,
        TaskStatus::from_exit_code(exit_code),
        exit_code
    );
    Ok(())
}

/// Explains a guarded write that changed nothing
fn not_found_or_wrong_state(
    repo: &mut TaskRepository<'_>,
    selector: TaskSelector,
    expected: TaskStatus,
) -> Result<Error, Error> {
    Ok(match repo.get_task(selector)? {
        Some(_) => Error::NotInState { selector, expected },
        None => Error::TaskNotFound(selector),
    })
}
