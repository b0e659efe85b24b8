use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use crate::adjust::{self, AdjustShared};
use crate::error::PoolError;
use crate::logging;
use crate::queue::TaskQueue;
use crate::task::{self, CancelledTask, Priority, Task, TaskArg, TaskId, TaskLocation};
use crate::worker;

/// Name reported for a worker that is not running a task.
pub const IDLE_SLOT: &str = "[idle]";

/// Pause between the first and second shutdown broadcasts, giving workers a
/// chance to observe the flag before the final sweep.
const DESTROY_GRACE: Duration = Duration::from_millis(100);

/// How long `shutdown` waits for all workers to report in before detaching
/// the stragglers.
const JOIN_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerStatus {
    /// Parked on the pool condition variable, ready for work.
    Idle,
    /// Executing a task with no pool lock held.
    Busy,
    /// Observed shutdown; about to terminate.
    ExitingShutdown,
    /// Flagged by a shrink; terminates after its current task, if any.
    ExitingResize,
    /// Thread function returned; the handle is ready to join.
    Dead,
}

pub(crate) struct WorkerSlot {
    pub(crate) status: WorkerStatus,
    pub(crate) task_name: String,
    pub(crate) task_id: TaskId,
    pub(crate) handle: Option<JoinHandle<()>>,
}

pub(crate) struct PoolState {
    pub(crate) queue: TaskQueue,
    pub(crate) slots: Vec<WorkerSlot>,
    pub(crate) thread_count: usize,
    pub(crate) min_threads: usize,
    pub(crate) max_threads: usize,
    pub(crate) idle_threads: usize,
    pub(crate) started: u64,
    pub(crate) shutdown: bool,
    pub(crate) resize_shutdown: bool,
    pub(crate) auto_adjust: bool,
    pub(crate) high_watermark: usize,
    pub(crate) low_watermark: usize,
    next_task_id: TaskId,
}

impl PoolState {
    pub(crate) fn slot_status(&self, index: usize) -> WorkerStatus {
        self.slots[index].status
    }

    /// Every status transition goes through here; `idle_threads` moves in
    /// the same critical section as the status it counts.
    pub(crate) fn set_status(&mut self, index: usize, status: WorkerStatus) {
        let old = self.slots[index].status;
        if old == status {
            return;
        }
        if old == WorkerStatus::Idle {
            self.idle_threads -= 1;
        }
        if status == WorkerStatus::Idle {
            self.idle_threads += 1;
        }
        self.slots[index].status = status;
    }

    pub(crate) fn mark_busy(&mut self, index: usize, id: TaskId, name: &str) {
        self.set_status(index, WorkerStatus::Busy);
        let slot = &mut self.slots[index];
        slot.task_id = id;
        slot.task_name.clear();
        slot.task_name.push_str(name);
    }

    pub(crate) fn mark_idle(&mut self, index: usize) {
        self.set_status(index, WorkerStatus::Idle);
        self.clear_slot(index);
    }

    pub(crate) fn clear_slot(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        slot.task_id = 0;
        slot.task_name.clear();
        slot.task_name.push_str(IDLE_SLOT);
    }

    fn next_id(&mut self) -> TaskId {
        let id = self.next_task_id;
        self.next_task_id += 1;
        id
    }

    pub(crate) fn wants_grow_nudge(&self) -> bool {
        self.auto_adjust
            && !self.shutdown
            && self.queue.len() > self.high_watermark
            && self.thread_count < self.max_threads
    }

    pub(crate) fn wants_shrink_nudge(&self) -> bool {
        self.auto_adjust
            && !self.shutdown
            && self.idle_threads > self.low_watermark
            && self.thread_count > self.min_threads
    }
}

pub(crate) struct PoolShared {
    pub(crate) state: Mutex<PoolState>,
    /// Workers park here; signalled on submit, broadcast on completion,
    /// shutdown, resize, and worker exit.
    pub(crate) work_available: Condvar,
    /// Serializes whole resize operations. Always acquired before the pool
    /// state lock, never the other way around.
    pub(crate) resize_lock: Mutex<()>,
    pub(crate) adjust: Mutex<AdjustShared>,
    pub(crate) adjust_wake: Condvar,
    pub(crate) controller: Mutex<Option<JoinHandle<()>>>,
}

impl PoolShared {
    /// Wake the auto-adjust controller. Callers must not hold the pool
    /// state lock.
    pub(crate) fn nudge_controller(&self) {
        let _guard = self.adjust.lock().unwrap();
        self.adjust_wake.notify_all();
    }
}

/// Point-in-time snapshot of the pool's counters, taken under the pool lock.
/// May be stale the instant it is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub thread_count: usize,
    pub min_threads: usize,
    pub max_threads: usize,
    pub idle_threads: usize,
    pub queue_size: usize,
    /// Total workers ever spawned by this pool; monotonic.
    pub started: u64,
}

/// A bounded set of worker threads consuming prioritised tasks from a shared
/// queue. See the crate-level docs for an overview and examples.
pub struct TidePool {
    shared: Arc<PoolShared>,
}

impl TidePool {
    /// Create a pool with `initial` workers. Limits default to
    /// `[1, 2 * initial]`; adjust them with [`TidePool::set_limits`].
    pub fn new(initial: usize) -> Result<Self, PoolError> {
        logging::init();
        if initial == 0 {
            error!("pool needs at least one worker");
            return Err(PoolError::InvalidArgument("worker count must be at least 1"));
        }

        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: TaskQueue::new(),
                slots: Vec::with_capacity(initial),
                thread_count: 0,
                min_threads: 1,
                max_threads: initial * 2,
                idle_threads: 0,
                started: 0,
                shutdown: false,
                resize_shutdown: false,
                auto_adjust: false,
                high_watermark: initial,
                low_watermark: initial / 2,
                next_task_id: 1,
            }),
            work_available: Condvar::new(),
            resize_lock: Mutex::new(()),
            adjust: Mutex::new(AdjustShared {
                running: false,
                interval: adjust::DEFAULT_INTERVAL,
            }),
            adjust_wake: Condvar::new(),
            controller: Mutex::new(None),
        });

        for _ in 0..initial {
            if let Err(err) = spawn_one(&shared) {
                error!(error = %err, "worker spawn failed during pool creation");
                {
                    let mut state = shared.state.lock().unwrap();
                    state.shutdown = true;
                    shared.work_available.notify_all();
                }
                join_workers(&shared);
                return Err(err);
            }
        }

        info!(workers = initial, "pool created");
        Ok(TidePool { shared })
    }

    /// Queue a task for execution. The pool takes ownership of `arg` and
    /// hands it to `func` on dispatch; a cancelled task's argument comes
    /// back through [`CancelledTask`].
    ///
    /// Names longer than [`MAX_TASK_NAME_LEN`](crate::MAX_TASK_NAME_LEN)
    /// bytes are truncated; an absent or empty name becomes
    /// `unnamed_task_<id>`. Returns the assigned task id (always ≥ 1).
    pub fn submit<F>(
        &self,
        func: F,
        arg: TaskArg,
        name: Option<&str>,
        priority: Priority,
    ) -> Result<TaskId, PoolError>
    where
        F: FnOnce(TaskArg) + Send + 'static,
    {
        let mut state = self.shared.state.lock().unwrap();
        if state.shutdown {
            warn!("task submitted to a pool that is shutting down");
            return Err(PoolError::ShuttingDown);
        }

        let id = state.next_id();
        let name = match name {
            Some(raw) if !raw.is_empty() => task::clamp_name(raw),
            _ => task::unnamed_name(id),
        };
        let task = Task {
            id,
            name: name.clone(),
            priority,
            func: Box::new(func),
            arg,
        };
        state.queue.push(task);
        let queued = state.queue.len();
        let nudge = state.wants_grow_nudge();
        self.shared.work_available.notify_one();
        drop(state);

        debug!(task = %name, id, priority = ?priority, queued, "task submitted");
        if nudge {
            self.shared.nudge_controller();
        }
        Ok(id)
    }

    /// [`TidePool::submit`] with [`Priority::Normal`].
    pub fn submit_default<F>(
        &self,
        func: F,
        arg: TaskArg,
        name: Option<&str>,
    ) -> Result<TaskId, PoolError>
    where
        F: FnOnce(TaskArg) + Send + 'static,
    {
        self.submit(func, arg, name, Priority::Normal)
    }

    /// Snapshot the pool counters.
    pub fn stats(&self) -> Result<PoolStats, PoolError> {
        let state = self.shared.state.lock().unwrap();
        if state.shutdown {
            return Err(PoolError::ShuttingDown);
        }
        Ok(PoolStats {
            thread_count: state.thread_count,
            min_threads: state.min_threads,
            max_threads: state.max_threads,
            idle_threads: state.idle_threads,
            queue_size: state.queue.len(),
            started: state.started,
        })
    }

    /// Copies of every live worker's running-task name, `"[idle]"` for
    /// workers with no task. The returned vector has `thread_count`
    /// entries and is a consistent snapshot taken under the pool lock.
    pub fn running_task_names(&self) -> Result<Vec<String>, PoolError> {
        let state = self.shared.state.lock().unwrap();
        if state.shutdown {
            return Err(PoolError::ShuttingDown);
        }
        Ok(state
            .slots
            .iter()
            .filter(|slot| matches!(slot.status, WorkerStatus::Idle | WorkerStatus::Busy))
            .map(|slot| slot.task_name.clone())
            .collect())
    }

    /// Look a task up by name. Reports whether the first match is still
    /// queued or already running on a worker; duplicate names are legal and
    /// the running instance wins.
    pub fn find_task_by_name(
        &self,
        name: &str,
    ) -> Result<Option<(TaskId, TaskLocation)>, PoolError> {
        if name.is_empty() {
            return Err(PoolError::InvalidArgument("task name must not be empty"));
        }
        let needle = task::clamp_name(name);
        let state = self.shared.state.lock().unwrap();
        // a nonzero slot id means the worker is occupied by that task, even
        // if a shrink has already flagged the worker to exit afterwards
        for slot in &state.slots {
            if slot.task_id != 0 && slot.task_name == needle {
                return Ok(Some((slot.task_id, TaskLocation::Running)));
            }
        }
        Ok(state
            .queue
            .find_by_name(&needle)
            .map(|id| (id, TaskLocation::Queued)))
    }

    /// Cancel a queued task, returning its argument to the caller. A task
    /// already executing cannot be cancelled and yields
    /// [`PoolError::Running`].
    pub fn cancel_by_id(&self, id: TaskId) -> Result<CancelledTask, PoolError> {
        if id == 0 {
            return Err(PoolError::InvalidArgument("task id 0 is never assigned"));
        }
        let mut state = self.shared.state.lock().unwrap();
        if let Some(task) = state.queue.remove_by_id(id) {
            drop(state);
            debug!(id, task = %task.name, "queued task cancelled");
            return Ok(task.into_cancelled());
        }
        if state.slots.iter().any(|slot| slot.task_id == id) {
            return Err(PoolError::Running(id));
        }
        Err(PoolError::NotFound)
    }

    /// [`TidePool::cancel_by_id`] keyed by name; the earliest-queued match
    /// is cancelled.
    pub fn cancel_by_name(&self, name: &str) -> Result<CancelledTask, PoolError> {
        if name.is_empty() {
            return Err(PoolError::InvalidArgument("task name must not be empty"));
        }
        let needle = task::clamp_name(name);
        let mut state = self.shared.state.lock().unwrap();
        if let Some(task) = state.queue.remove_by_name(&needle) {
            drop(state);
            debug!(id = task.id, task = %task.name, "queued task cancelled");
            return Ok(task.into_cancelled());
        }
        if let Some(slot) = state
            .slots
            .iter()
            .find(|slot| slot.task_id != 0 && slot.task_name == needle)
        {
            return Err(PoolError::Running(slot.task_id));
        }
        Err(PoolError::NotFound)
    }

    /// Change the logical worker count. Growth spawns immediately; a shrink
    /// flags the excess workers and returns without waiting for them to
    /// terminate (their exit is observable through [`TidePool::stats`]).
    pub fn resize(&self, target: usize) -> Result<(), PoolError> {
        resize_to(&self.shared, target)
    }

    /// Update the worker-count limits. If the current count falls outside
    /// the new range the pool is resized to the nearest boundary.
    pub fn set_limits(&self, min: usize, max: usize) -> Result<(), PoolError> {
        if min == 0 || max < min {
            return Err(PoolError::InvalidArgument(
                "limits must satisfy 1 <= min <= max",
            ));
        }
        let clamp_to = {
            let mut state = self.shared.state.lock().unwrap();
            if state.shutdown {
                return Err(PoolError::ShuttingDown);
            }
            state.min_threads = min;
            state.max_threads = max;
            info!(min, max, "pool limits updated");
            let count = state.thread_count;
            if count < min {
                Some(min)
            } else if count > max {
                Some(max)
            } else {
                None
            }
        };
        if let Some(target) = clamp_to {
            resize_to(&self.shared, target)?;
        }
        Ok(())
    }

    /// Start (or retune) the auto-adjust controller: the pool grows by one
    /// worker when the queue length exceeds `high_watermark` and shrinks by
    /// one when the idle count exceeds `low_watermark`, checked every
    /// `interval` and additionally whenever a submission or completion
    /// crosses a watermark.
    pub fn enable_auto_adjust(
        &self,
        high_watermark: usize,
        low_watermark: usize,
        interval: Duration,
    ) -> Result<(), PoolError> {
        adjust::enable(&self.shared, high_watermark, low_watermark, interval)
    }

    /// Stop the auto-adjust controller and join its thread. A no-op if
    /// auto-adjust was never enabled.
    pub fn disable_auto_adjust(&self) -> Result<(), PoolError> {
        adjust::disable(&self.shared)
    }

    /// Shut the pool down: stop accepting tasks, let running tasks finish,
    /// join every worker, and drop any still-queued task arguments. Called
    /// automatically on drop. Shutting down an already-shut-down pool is an
    /// `Ok` no-op.
    ///
    /// Use [`TidePool::shutdown_drain`] instead to take ownership of the
    /// un-run tasks' arguments.
    pub fn shutdown(&self) -> Result<(), PoolError> {
        let dropped = shutdown_impl(&self.shared)?;
        if !dropped.is_empty() {
            debug!(dropped = dropped.len(), "queued tasks dropped at shutdown");
        }
        Ok(())
    }

    /// Like [`TidePool::shutdown`], but hands every task that never ran back
    /// to the caller so its argument can be released or re-submitted
    /// elsewhere.
    pub fn shutdown_drain(&self) -> Result<Vec<CancelledTask>, PoolError> {
        shutdown_impl(&self.shared)
    }
}

impl Drop for TidePool {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            error!(error = %err, "pool shutdown during drop failed");
        }
    }
}

/// Register a slot and spawn its worker. The pool lock is released across
/// the actual thread creation; a spawn failure unwinds the slot before the
/// error is returned.
pub(crate) fn spawn_one(shared: &Arc<PoolShared>) -> Result<usize, PoolError> {
    let index = {
        let mut state = shared.state.lock().unwrap();
        let index = state.slots.len();
        state.slots.push(WorkerSlot {
            status: WorkerStatus::Idle,
            task_name: IDLE_SLOT.to_string(),
            task_id: 0,
            handle: None,
        });
        state.idle_threads += 1;
        state.thread_count += 1;
        index
    };

    match worker::spawn_worker(index, Arc::clone(shared)) {
        Ok(handle) => {
            let mut state = shared.state.lock().unwrap();
            state.slots[index].handle = Some(handle);
            state.started += 1;
            trace!(worker = index, "worker spawned");
            Ok(index)
        }
        Err(err) => {
            let mut state = shared.state.lock().unwrap();
            state.set_status(index, WorkerStatus::Dead);
            state.thread_count -= 1;
            drop(state);
            error!(worker = index, error = %err, "worker spawn failed");
            Err(PoolError::Spawn(err))
        }
    }
}

/// The resize engine. Serialized by `resize_lock` so concurrent resizes are
/// totally ordered; the pool lock is only held for the short bookkeeping
/// sections, never across thread creation or joining.
pub(crate) fn resize_to(shared: &Arc<PoolShared>, target: usize) -> Result<(), PoolError> {
    let _serial = shared.resize_lock.lock().unwrap();

    reap_dead(shared);

    let current = {
        let mut state = shared.state.lock().unwrap();
        if state.shutdown {
            return Err(PoolError::ShuttingDown);
        }
        if target < state.min_threads || target > state.max_threads {
            return Err(PoolError::OutOfRange {
                target,
                min: state.min_threads,
                max: state.max_threads,
            });
        }
        let current = state.thread_count;
        if target == current {
            trace!(size = target, "resize is a no-op");
            return Ok(());
        }
        if target < current {
            // Contraction is asynchronous: flag the highest-indexed live
            // workers and return. Each exits on its next pass through the
            // wait loop, or after its current task returns.
            state.resize_shutdown = true;
            let mut excess = current - target;
            for index in (0..state.slots.len()).rev() {
                if excess == 0 {
                    break;
                }
                if matches!(
                    state.slots[index].status,
                    WorkerStatus::Idle | WorkerStatus::Busy
                ) {
                    state.set_status(index, WorkerStatus::ExitingResize);
                    excess -= 1;
                }
            }
            state.thread_count = target;
            shared.work_available.notify_all();
            info!(from = current, to = target, "pool shrinking");
            return Ok(());
        }
        current
    };

    info!(from = current, to = target, "pool growing");
    let mut spawned = Vec::new();
    for _ in current..target {
        match spawn_one(shared) {
            Ok(index) => spawned.push(index),
            Err(err) => {
                error!(error = %err, "spawn failed mid-grow, rolling back");
                let mut state = shared.state.lock().unwrap();
                for &index in &spawned {
                    state.set_status(index, WorkerStatus::ExitingResize);
                    state.thread_count -= 1;
                }
                shared.work_available.notify_all();
                return Err(err);
            }
        }
    }
    shared.state.lock().unwrap().resize_shutdown = false;
    Ok(())
}

/// Join the handles of workers that already terminated, typically after an
/// earlier shrink. Runs under the resize lock, never under the pool lock.
fn reap_dead(shared: &Arc<PoolShared>) {
    let handles: Vec<(usize, JoinHandle<()>)> = {
        let mut state = shared.state.lock().unwrap();
        state
            .slots
            .iter_mut()
            .enumerate()
            .filter(|(_, slot)| slot.status == WorkerStatus::Dead)
            .filter_map(|(index, slot)| slot.handle.take().map(|handle| (index, handle)))
            .collect()
    };
    for (index, handle) in handles {
        if handle.join().is_err() {
            error!(worker = index, "worker thread panicked");
        } else {
            trace!(worker = index, "worker joined");
        }
    }
}

fn shutdown_impl(shared: &Arc<PoolShared>) -> Result<Vec<CancelledTask>, PoolError> {
    adjust::disable(shared)?;

    {
        let mut state = shared.state.lock().unwrap();
        if state.shutdown {
            debug!("pool already shut down");
            return Ok(Vec::new());
        }
        state.shutdown = true;
        info!("pool shutting down");
        shared.work_available.notify_all();
    }

    // A worker that was between predicate checks when the first broadcast
    // landed catches this one; the bounded wait in its loop covers the rest.
    thread::sleep(DESTROY_GRACE);
    {
        let _state = shared.state.lock().unwrap();
        shared.work_available.notify_all();
    }

    join_workers(shared);

    let mut state = shared.state.lock().unwrap();
    let drained: Vec<CancelledTask> = state
        .queue
        .drain_all()
        .into_iter()
        .map(Task::into_cancelled)
        .collect();
    Ok(drained)
}

/// Wait for every worker to report `Dead`, bounded by `JOIN_DEADLINE`, then
/// join the dead ones. A worker that misses the deadline (a task that never
/// returns) is logged and detached so the process is not left stuck.
fn join_workers(shared: &Arc<PoolShared>) {
    let deadline = Instant::now() + JOIN_DEADLINE;
    let handles: Vec<(usize, JoinHandle<()>, bool)> = {
        let mut state = shared.state.lock().unwrap();
        loop {
            let live = state
                .slots
                .iter()
                .filter(|slot| slot.handle.is_some() && slot.status != WorkerStatus::Dead)
                .count();
            if live == 0 {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _timed_out) = shared
                .work_available
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = guard;
        }
        state
            .slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| {
                let dead = slot.status == WorkerStatus::Dead;
                slot.handle.take().map(|handle| (index, handle, dead))
            })
            .collect()
    };

    for (index, handle, dead) in handles {
        if !dead {
            error!(worker = index, "worker missed the shutdown deadline, detaching");
            drop(handle);
        } else if handle.join().is_err() {
            error!(worker = index, "worker thread panicked");
        }
    }
    debug!("worker join pass complete");
}
