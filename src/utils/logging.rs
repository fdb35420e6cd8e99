use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::constants::RUNNER_LOG_FILE_NAME;

/// Initialize the logging system with the specified log level.
///
/// Diagnostics go to stderr so command output on stdout stays parseable.
/// Detached runners have no terminal, so they also pass a directory and get a
/// daily rotating file there.
///
/// # Arguments
///
/// * `log_level` - The desired log level as a string (e.g. "info", "debug", "warn")
/// * `log_dir` - Directory for the rotating log file, if any
///
/// # Example
///
/// ```ignore
/// init_logging("info", None);
/// ```
pub fn init_logging(log_level: &str, log_dir: Option<&Path>) {
    let filter = match EnvFilter::try_new(log_level) {
        Ok(f) => f,
        Err(_) => {
            eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
            EnvFilter::new("info")
        }
    };

    let stderr_layer = fmt::layer()
        .with_line_number(true)
        .with_writer(std::io::stderr);

    if let Some(dir) = log_dir {
        let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, RUNNER_LOG_FILE_NAME);

        let file_layer = fmt::layer()
            .with_line_number(true)
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
    }
}
