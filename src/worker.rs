use std::io;
use std::sync::{Arc, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace};

use crate::pool::{PoolShared, PoolState, WorkerStatus};

/// Upper bound on one condition-variable wait. A missed signal is repaired
/// on the next timeout tick instead of wedging the worker forever.
pub(crate) const WORKER_WAIT: Duration = Duration::from_secs(1);

pub(crate) fn spawn_worker(index: usize, shared: Arc<PoolShared>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("tidepool-{index}"))
        .spawn(move || worker_loop(index, shared))
}

enum ExitKind {
    Shutdown,
    Resize,
}

/// One worker's main loop: wait for work or a reason to exit, take one task,
/// run it with no pool lock held, report completion, repeat.
fn worker_loop(index: usize, shared: Arc<PoolShared>) {
    trace!(worker = index, "worker started");
    loop {
        let mut state = shared.state.lock().unwrap();

        // Every wakeup re-checks the full predicate set; the bounded wait
        // means a lost signal costs at most one tick.
        let exit = loop {
            if state.slot_status(index) == WorkerStatus::ExitingResize {
                break Some(ExitKind::Resize);
            }
            if state.shutdown {
                break Some(ExitKind::Shutdown);
            }
            if !state.queue.is_empty() {
                break None;
            }
            trace!(
                worker = index,
                contracting = state.resize_shutdown,
                "waiting for work"
            );
            let (guard, _timed_out) = shared
                .work_available
                .wait_timeout(state, WORKER_WAIT)
                .unwrap();
            state = guard;
        };

        if let Some(kind) = exit {
            retire(index, kind, state, &shared);
            return;
        }

        let Some(task) = state.queue.pop() else {
            // cannot happen while the lock is held; wake a peer and re-check
            shared.work_available.notify_all();
            continue;
        };
        let id = task.id;
        let name = task.name.clone();
        state.mark_busy(index, id, &name);
        drop(state);

        debug!(worker = index, id, task = %name, "task running");
        (task.func)(task.arg);
        trace!(worker = index, id, task = %name, "task function returned");

        let mut state = shared.state.lock().unwrap();
        if state.slot_status(index) == WorkerStatus::Busy {
            state.mark_idle(index);
            let nudge = state.wants_shrink_nudge();
            // Broadcast rather than signal: shutdown and resize paths need
            // every waiter to re-evaluate its predicates.
            shared.work_available.notify_all();
            drop(state);
            if nudge {
                shared.nudge_controller();
            }
        } else {
            // a shrink flagged this worker while it was off running the task
            retire(index, ExitKind::Resize, state, &shared);
            return;
        }
    }
}

fn retire(
    index: usize,
    kind: ExitKind,
    mut state: MutexGuard<'_, PoolState>,
    shared: &PoolShared,
) {
    let reason = match kind {
        ExitKind::Shutdown => {
            state.set_status(index, WorkerStatus::ExitingShutdown);
            "shutdown"
        }
        // resize already wrote ExitingResize into the slot
        ExitKind::Resize => "resize",
    };
    state.clear_slot(index);
    drop(state);
    debug!(worker = index, reason, "worker exiting");

    let mut state = shared.state.lock().unwrap();
    state.set_status(index, WorkerStatus::Dead);
    shared.work_available.notify_all();
}
