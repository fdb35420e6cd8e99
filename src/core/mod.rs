//! Core of the task queue
//!
//! This module contains:
//! - The task record and its status state machine
//! - The launcher that records submissions and detaches runners
//! - The runner body executed inside each detached process
//! - The sequencer that keeps commands in submission order
//! - The liveness reconciler and the retention sweep

mod launcher;
pub mod liveness;
mod retention;
mod runner;
pub mod sequencer;
mod task;
mod task_status;

pub use launcher::*;
pub use liveness::{reconcile_running_tasks, ProcessIdentity};
pub use retention::*;
pub use runner::*;
pub use task::*;
pub use task_status::*;
