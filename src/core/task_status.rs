use crate::errors::Error;
use colored::{ColoredString, Colorize};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a queued task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Submitted, runner has not reported in yet (or the task was reset)
    Pending,
    /// Runner owns the task; the command may still be waiting on a predecessor
    Running,
    /// Command exited with code 0, or an operator forced completion
    Completed,
    /// Command exited nonzero, or its process vanished without reporting
    Failed,
}

impl TaskStatus {
    /// String stored in the `status` column
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Completed and failed tasks are never executed again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Status reached by a command that exited with `exit_code`
    pub fn from_exit_code(exit_code: i32) -> Self {
        if exit_code == 0 {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        }
    }

    pub fn glyph(&self) -> &'static str {
        match self {
            TaskStatus::Running => "▶",
            TaskStatus::Pending => "⏳",
            TaskStatus::Completed => "✓",
            TaskStatus::Failed => "✗",
        }
    }

    /// Glyph and name, colored for terminal output
    pub fn decorated(&self) -> ColoredString {
        let label = format!("{} {}", self.glyph(), self.as_str());
        match self {
            TaskStatus::Running => label.cyan(),
            TaskStatus::Pending => label.yellow(),
            TaskStatus::Completed => label.green(),
            TaskStatus::Failed => label.red(),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(Error::InvalidStatus(other.to_string())),
        }
    }
}
