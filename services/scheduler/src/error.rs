//! Scheduler error types.

use berth_db::DbError;

use crate::runtime::RuntimeError;

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Errors that abandon a scheduling tick.
///
/// Per-container failures (unschedulable containers, missing secrets, a
/// single failed boot or kill) never surface here; they are logged and
/// retried on the next tick.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("container runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}
