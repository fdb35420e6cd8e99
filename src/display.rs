//! Human-readable renderings of task records.

use crate::config::Settings;
use crate::constants::COMMAND_DISPLAY_WIDTH;
use crate::core::{Task, TaskStatus};
use chrono::{DateTime, Local, Utc};
use colored::Colorize;
use std::fmt::Write;
use std::time::Duration;

/// Compact duration, e.g. `42s`, `3m 5s`, `2h 10m`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Local wall clock time of day
pub fn format_time(timestamp: DateTime<Utc>) -> String {
    timestamp.with_timezone(&Local).format("%H:%M:%S").to_string()
}

fn format_datetime(timestamp: DateTime<Utc>) -> String {
    timestamp
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Cuts `command` to `width` characters, marking the cut with `...`
pub fn truncate_command(command: &str, width: usize) -> String {
    if command.chars().count() > width {
        let head: String = command.chars().take(width).collect();
        format!("{}...", head)
    } else {
        command.to_string()
    }
}

#[derive(Clone, Copy)]
enum Align {
    Left,
    Right,
}

const HEADERS: [&str; 6] = ["ID", "Status", "PID", "Submit Time", "Duration", "Command"];
const ALIGNS: [Align; 6] = [
    Align::Right,
    Align::Left,
    Align::Right,
    Align::Right,
    Align::Right,
    Align::Left,
];
const STATUS_COLUMN: usize = 1;

fn pad(text: &str, width: usize, align: Align) -> String {
    let fill = " ".repeat(width.saturating_sub(text.chars().count()));
    match align {
        Align::Left => format!("{}{}", text, fill),
        Align::Right => format!("{}{}", fill, text),
    }
}

/// Task table as shown by `list`, rows in the order given
pub fn render_task_table(tasks: &[Task], now: DateTime<Utc>) -> String {
    if tasks.is_empty() {
        return "No tasks found".to_string();
    }

    let rows: Vec<[String; 6]> = tasks
        .iter()
        .map(|task| {
            [
                task.id.to_string(),
                format!("{} {}", task.status.glyph(), task.status),
                task.pid.map_or_else(|| "-".to_string(), |pid| pid.to_string()),
                format_time(task.created_at),
                task.run_time(now)
                    .map_or_else(|| "-".to_string(), format_duration),
                truncate_command(&task.command, COMMAND_DISPLAY_WIDTH),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(|h| h.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let header: Vec<String> = HEADERS
        .iter()
        .zip(widths)
        .zip(ALIGNS)
        .map(|((h, w), a)| pad(h, w, a))
        .collect();
    let _ = writeln!(out, "{}", header.join(" | ").bold());
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let _ = writeln!(out, "{}", rule.join("-+-"));

    for (task, row) in tasks.iter().zip(&rows) {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(column, cell)| {
                let padded = pad(cell, widths[column], ALIGNS[column]);
                if column == STATUS_COLUMN {
                    // color after padding so escape codes do not skew widths
                    colorize(task.status, &padded)
                } else {
                    padded
                }
            })
            .collect();
        let _ = writeln!(out, "{}", cells.join(" | "));
    }
    out.trim_end().to_string()
}

fn colorize(status: TaskStatus, text: &str) -> String {
    match status {
        TaskStatus::Running => text.cyan().to_string(),
        TaskStatus::Pending => text.yellow().to_string(),
        TaskStatus::Completed => text.green().to_string(),
        TaskStatus::Failed => text.red().to_string(),
    }
}

/// Queue summary as shown by `status`
pub fn render_status(pending: &[Task], running: &[Task]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", "=== AtlasRun Queue Status ===".bold());
    let _ = writeln!(out, "Pending tasks: {}", pending.len());
    let _ = write!(out, "Running tasks: {}", running.len());

    if !running.is_empty() {
        let _ = write!(out, "\n\nRunning tasks:");
        for task in running {
            let pid = task.pid.map_or_else(|| "-".to_string(), |pid| pid.to_string());
            let _ = write!(out, "\n  {}: {} (PID: {})", task.id, task.command, pid);
        }
    }

    if !pending.is_empty() {
        let _ = write!(out, "\n\nPending tasks:");
        for task in pending {
            let _ = write!(out, "\n  {}: {}", task.id, task.command);
        }
    }
    out
}

/// Full record dump as shown by `info`
pub fn render_task_info(task: &Task, settings: &Settings, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", format!("=== Task {} Information ===", task.id).bold());
    let _ = writeln!(out, "Command: {}", task.command);
    let _ = writeln!(out, "Working Directory: {}", task.working_dir.display());
    let _ = writeln!(out, "Status: {}", task.status.decorated());
    match task.pid {
        Some(pid) => {
            let _ = writeln!(out, "PID: {}", pid);
        }
        None => {
            let _ = writeln!(out, "PID: N/A");
        }
    }
    if let Some(wait_for_id) = task.wait_for_id {
        let _ = writeln!(out, "Queued Behind: Task {}", wait_for_id);
    }
    let _ = writeln!(out, "Created: {}", format_datetime(task.created_at));
    if let Some(started_at) = task.started_at {
        let _ = writeln!(out, "Started: {}", format_datetime(started_at));
    }
    if let Some(completed_at) = task.completed_at {
        let _ = writeln!(out, "Completed: {}", format_datetime(completed_at));
    }
    if let Some(run_time) = task.run_time(now) {
        let whole_seconds = Duration::from_secs(run_time.as_secs());
        let _ = writeln!(out, "Duration: {}", humantime::format_duration(whole_seconds));
    }
    if let Some(exit_code) = task.exit_code {
        let _ = writeln!(out, "Exit Code: {}", exit_code);
    }
    let _ = writeln!(out, "Stdout Log: {}", settings.stdout_log(task.id).display());
    let _ = write!(out, "Stderr Log: {}", settings.stderr_log(task.id).display());
    out
}
