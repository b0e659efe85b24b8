use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, trace};

use crate::error::PoolError;
use crate::pool::{self, PoolShared};

/// Check cadence used before `enable_auto_adjust` supplies one.
pub(crate) const DEFAULT_INTERVAL: Duration = Duration::from_millis(5000);

/// State behind the controller's own mutex. The pool lock is never held
/// while this one is taken.
pub(crate) struct AdjustShared {
    pub(crate) running: bool,
    pub(crate) interval: Duration,
}

/// The growth/shrink decision, separated from the locking so it can be
/// tested directly. Grow wins over shrink when both would apply.
pub(crate) fn decide(
    queue_size: usize,
    idle: usize,
    count: usize,
    min: usize,
    max: usize,
    high_watermark: usize,
    low_watermark: usize,
) -> Option<usize> {
    if queue_size > high_watermark && count < max {
        Some(count + 1)
    } else if idle > low_watermark && count > min {
        Some(count - 1)
    } else {
        None
    }
}

pub(crate) fn enable(
    shared: &Arc<PoolShared>,
    high_watermark: usize,
    low_watermark: usize,
    interval: Duration,
) -> Result<(), PoolError> {
    if high_watermark == 0 {
        return Err(PoolError::InvalidArgument("high watermark must be positive"));
    }
    if interval.is_zero() {
        return Err(PoolError::InvalidArgument("adjust interval must be positive"));
    }

    let already_enabled = {
        let mut state = shared.state.lock().unwrap();
        if state.shutdown {
            return Err(PoolError::ShuttingDown);
        }
        if state.min_threads == 0 || state.max_threads < state.min_threads {
            return Err(PoolError::InvalidArgument("pool limits are inconsistent"));
        }
        state.high_watermark = high_watermark;
        state.low_watermark = low_watermark;
        let already = state.auto_adjust;
        state.auto_adjust = true;
        already
    };

    {
        let mut adjust = shared.adjust.lock().unwrap();
        adjust.interval = interval;
        if already_enabled {
            shared.adjust_wake.notify_all();
        } else {
            adjust.running = true;
        }
    }

    if already_enabled {
        debug!(
            high_watermark,
            low_watermark,
            ?interval,
            "auto-adjust parameters updated"
        );
        return Ok(());
    }

    let spawn_result = thread::Builder::new().name("tidepool-adjust".to_string()).spawn({
        let shared = Arc::clone(shared);
        move || controller_loop(shared)
    });
    let handle = match spawn_result {
        Ok(handle) => handle,
        Err(err) => {
            shared.state.lock().unwrap().auto_adjust = false;
            shared.adjust.lock().unwrap().running = false;
            error!(error = %err, "failed to spawn auto-adjust controller");
            return Err(PoolError::Spawn(err));
        }
    };
    *shared.controller.lock().unwrap() = Some(handle);

    info!(
        high_watermark,
        low_watermark,
        ?interval,
        "auto-adjust enabled"
    );
    Ok(())
}

pub(crate) fn disable(shared: &Arc<PoolShared>) -> Result<(), PoolError> {
    let was_enabled = {
        let mut state = shared.state.lock().unwrap();
        let was = state.auto_adjust;
        state.auto_adjust = false;
        was
    };
    {
        let mut adjust = shared.adjust.lock().unwrap();
        adjust.running = false;
        shared.adjust_wake.notify_all();
    }

    // reap the handle even if the flag was already clear; an enable racing
    // an earlier disable can leave a joined-out controller parked here
    let handle = shared.controller.lock().unwrap().take();
    if let Some(handle) = handle {
        if handle.join().is_err() {
            error!("auto-adjust controller panicked");
        }
    }
    if was_enabled {
        info!("auto-adjust disabled");
    }
    Ok(())
}

enum Step {
    Stop,
    Hold,
    Resize(usize),
}

/// Controller thread: sleep on its own condition variable for one interval
/// (or until a watermark crossing nudges it), then read the pool counters
/// and resize by one if warranted. `resize` is always called with the pool
/// lock released.
fn controller_loop(shared: Arc<PoolShared>) {
    debug!("auto-adjust controller started");
    let mut adjust = shared.adjust.lock().unwrap();
    loop {
        // a disable that lands while this thread is off resizing is caught
        // here, before committing to another interval of sleep
        if !adjust.running {
            break;
        }
        let interval = adjust.interval;
        let (guard, _timed_out) = shared
            .adjust_wake
            .wait_timeout(adjust, interval)
            .unwrap();
        adjust = guard;
        if !adjust.running {
            break;
        }
        drop(adjust);

        let step = {
            let state = shared.state.lock().unwrap();
            if state.shutdown || !state.auto_adjust {
                Step::Stop
            } else {
                trace!(
                    queued = state.queue.len(),
                    idle = state.idle_threads,
                    threads = state.thread_count,
                    "auto-adjust check"
                );
                match decide(
                    state.queue.len(),
                    state.idle_threads,
                    state.thread_count,
                    state.min_threads,
                    state.max_threads,
                    state.high_watermark,
                    state.low_watermark,
                ) {
                    Some(target) => Step::Resize(target),
                    None => Step::Hold,
                }
            }
        };

        match step {
            Step::Stop => {
                debug!("auto-adjust controller observed shutdown");
                return;
            }
            Step::Hold => {}
            Step::Resize(target) => {
                debug!(size = target, "auto-adjust resizing");
                if let Err(err) = pool::resize_to(&shared, target) {
                    error!(size = target, error = %err, "auto-adjust resize failed");
                }
            }
        }

        adjust = shared.adjust.lock().unwrap();
    }
    drop(adjust);
    debug!("auto-adjust controller exiting");
}
