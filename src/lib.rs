//! # Tidepool: a resizable priority worker pool
//!
//! A long-lived, process-embedded pool of worker threads consuming opaque
//! units of work in priority order:
//! - Stable priority dispatch: lower [`Priority`] values run first, equal
//!   priorities run in submission order
//! - Dynamic sizing: manual [`resize`](TidePool::resize) within configurable
//!   limits, plus an optional load-driven auto-adjust controller
//! - Per-worker introspection: what every worker is running right now
//! - Cancellation of queued tasks, with the task's argument handed back
//! - Lifecycle-aware shutdown that joins every worker it ever spawned
//!
//! Log verbosity is read from the `LOG_LEVEL` environment variable
//! (`FATAL|ERROR|WARN|INFO|DEBUG|TRACE`, default `INFO`) the first time a
//! pool is created, unless the application installed its own `tracing`
//! subscriber beforehand.
//!
//! ## Example
//!
//! ```rust
//! use tidepool::{Priority, TaskArg, TidePool};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! let pool = TidePool::new(2).expect("create pool");
//!
//! let result = Arc::new(AtomicU64::new(0));
//! let sink = Arc::clone(&result);
//! pool.submit(
//!     move |arg: TaskArg| {
//!         let n = arg.downcast::<u64>().expect("u64 argument");
//!         sink.store(*n * 2, Ordering::Release);
//!     },
//!     Box::new(21u64),
//!     Some("double"),
//!     Priority::High,
//! )
//! .expect("submit");
//!
//! while result.load(Ordering::Acquire) == 0 {
//!     std::thread::yield_now();
//! }
//! assert_eq!(result.load(Ordering::Acquire), 42);
//! pool.shutdown().expect("shutdown");
//! ```

mod adjust;
mod error;
mod logging;
mod macros;
mod pool;
mod queue;
mod task;
mod worker;

pub use error::PoolError;
pub use pool::{PoolStats, TidePool, IDLE_SLOT};
pub use task::{
    CancelledTask, Priority, TaskArg, TaskId, TaskLocation, MAX_TASK_NAME_LEN,
};
