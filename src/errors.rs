use crate::core::TaskStatus;
use crate::db::TaskSelector;
use diesel::result::Error as DieselError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Diesel error: {0}")]
    DieselError(#[from] DieselError),
    #[error("Connection pool error: {0}")]
    PoolError(#[from] r2d2::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serde error: {0}")]
    SerdeError(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    ConfigError(#[from] serde_yaml::Error),
    #[error("Directory {} does not exist", .0.display())]
    WorkingDirMissing(PathBuf),
    #[error("{0} not found")]
    TaskNotFound(TaskSelector),
    #[error("{selector} is not {expected}")]
    NotInState {
        selector: TaskSelector,
        expected: TaskStatus,
    },
    #[error("Unknown task status '{0}'")]
    InvalidStatus(String),
    #[error("No command specified")]
    EmptyCommand,
    #[error("Home directory could not be determined, use --home")]
    NoHomeDir,
}
