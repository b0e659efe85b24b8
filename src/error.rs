use std::io;

use thiserror::Error;

use crate::task::TaskId;

/// Errors reported by pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A caller-supplied value was rejected before touching pool state.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The pool has begun shutting down and accepts no further work.
    #[error("pool is shutting down")]
    ShuttingDown,

    /// A resize target fell outside the configured thread limits.
    #[error("resize target {target} outside limits [{min}, {max}]")]
    OutOfRange {
        target: usize,
        min: usize,
        max: usize,
    },

    /// The OS refused to create a worker or controller thread.
    #[error("failed to spawn thread")]
    Spawn(#[source] io::Error),

    /// No queued task matched the given id or name.
    #[error("no queued task matched")]
    NotFound,

    /// The task is already executing on a worker; running tasks cannot be
    /// cancelled, only awaited.
    #[error("task {0} is running and cannot be cancelled")]
    Running(TaskId),
}
