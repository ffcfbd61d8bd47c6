//! Update scheduler.
//!
//! Writes do not run watchers in place (unless the watcher is `sync`).
//! They enqueue, and the queue is flushed once per tick: sorted, deduped,
//! and guarded against runaway cycles.
//!
//! # Flush Algorithm
//!
//! 1. Sort the queue ascending by watcher id. Ids are minted in creation
//!    order, and creation order already encodes the required guarantees:
//!    parent scopes before child scopes, and a scope's data watchers
//!    before its render watcher. One sort per flush is enough because
//!    mid-flush arrivals are inserted in position rather than appended.
//!
//! 2. Iterate by live index rather than a fixed-length snapshot, because a
//!    run can enqueue more work into the same pass.
//!
//! 3. For each entry: fire the pre-run hook, clear the membership flag,
//!    run. A watcher that re-queues itself during its own run bumps a
//!    per-id retrigger counter; past [`MAX_UPDATE_COUNT`] the pass reports
//!    an update loop and aborts, abandoning the remaining entries for this
//!    tick.
//!
//! 4. Snapshot the activated and updated queues, reset all state, then
//!    deliver `activated` hooks in queue order and `updated` hooks in
//!    reverse queue order, so the deepest scopes hear about their update
//!    first.
//!
//! # Batching Contract
//!
//! At most one flush is pending at a time: the `waiting` flag fills a
//! single slot. How the pending flush gets executed is up to the host. A
//! deferred hook, when installed, receives a [`FlushTask`] to run after
//! the current synchronous stack unwinds; without one the host calls
//! [`Runtime::flush`] itself. With batching configured off the first
//! enqueue flushes immediately, unbatched.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::ReactiveError;

use super::runtime::{Runtime, RuntimeInner};
use super::scope::Scope;
use super::watcher::{Watcher, WatcherId};

/// Retrigger ceiling per watcher per flush before the pass is aborted as a
/// probable infinite update loop.
pub const MAX_UPDATE_COUNT: u32 = 100;

pub(crate) struct Scheduler {
    queue: Mutex<Vec<Arc<Watcher>>>,
    /// Membership by id: prevents double-queuing within one cycle.
    has: Mutex<HashSet<WatcherId>>,
    /// Per-id retrigger counts for cycle detection.
    circular: Mutex<HashMap<WatcherId, u32>>,
    waiting: AtomicBool,
    flushing: AtomicBool,
    /// Index of the entry currently being run.
    index: AtomicUsize,
    activated: Mutex<Vec<Arc<Scope>>>,
    flush_timestamp: Mutex<Option<Instant>>,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
            has: Mutex::new(HashSet::new()),
            circular: Mutex::new(HashMap::new()),
            waiting: AtomicBool::new(false),
            flushing: AtomicBool::new(false),
            index: AtomicUsize::new(0),
            activated: Mutex::new(Vec::new()),
            flush_timestamp: Mutex::new(None),
        }
    }
}

/// Handle to the pending flush, passed to the deferred hook. Running it
/// after the runtime is gone is a no-op.
pub struct FlushTask {
    rt: Weak<RuntimeInner>,
}

impl FlushTask {
    pub fn run(&self) -> Result<(), ReactiveError> {
        match self.rt.upgrade() {
            Some(inner) => Runtime::from_inner(inner).flush(),
            None => Ok(()),
        }
    }
}

/// Deferred-execution hook: receives the pending flush and arranges for it
/// to run once the current synchronous stack unwinds.
pub type DeferredHook = Arc<dyn Fn(FlushTask) + Send + Sync>;

impl Runtime {
    /// Push a watcher into the flush queue, deduplicated by id.
    ///
    /// During a flush the entry is inserted behind the cursor at its sorted
    /// position, so a smaller id enqueued mid-flush still runs before
    /// larger pending ids but never re-runs processed entries.
    pub(crate) fn queue_watcher(&self, watcher: &Arc<Watcher>) -> Result<(), ReactiveError> {
        let sched = self.scheduler();
        {
            let mut has = sched.has.lock();
            if has.contains(&watcher.id) {
                return Ok(());
            }
            has.insert(watcher.id);
        }
        if !sched.flushing.load(Ordering::Acquire) {
            sched.queue.lock().push(Arc::clone(watcher));
        } else {
            let mut queue = sched.queue.lock();
            let index = sched.index.load(Ordering::Acquire);
            let mut pos = queue.len();
            while pos > index + 1 && queue[pos - 1].id > watcher.id {
                pos -= 1;
            }
            queue.insert(pos, Arc::clone(watcher));
        }
        if !sched.waiting.swap(true, Ordering::AcqRel) {
            if !self.is_batching() {
                return self.flush();
            }
            self.request_flush();
        }
        Ok(())
    }

    /// Register a scope for a post-flush `activated` callback.
    pub fn queue_activated(&self, scope: &Arc<Scope>) {
        scope.set_inactive(false);
        self.scheduler().activated.lock().push(Arc::clone(scope));
    }

    /// Whether a flush has been scheduled and not yet run.
    pub fn has_pending_flush(&self) -> bool {
        let sched = self.scheduler();
        sched.waiting.load(Ordering::Acquire) && !sched.flushing.load(Ordering::Acquire)
    }

    /// Timestamp captured at the start of the most recent flush, shared by
    /// all listener-timing bookkeeping in that pass.
    pub fn current_flush_timestamp(&self) -> Option<Instant> {
        *self.scheduler().flush_timestamp.lock()
    }

    fn request_flush(&self) {
        let hook = self.deferred_hook();
        if let Some(hook) = hook {
            hook(FlushTask { rt: self.downgrade() });
        }
        // without a hook the flush stays pending until the host drives
        // Runtime::flush itself
    }

    /// Run the pending flush: drain the queue in ascending-id order, then
    /// deliver the post-flush lifecycle hooks.
    ///
    /// Reentrant calls while a pass is in progress are no-ops. A fatal
    /// watcher error aborts the pass; state is still reset and the hook
    /// passes still run over the snapshots before the error is returned.
    pub fn flush(&self) -> Result<(), ReactiveError> {
        let sched = self.scheduler();
        if sched.flushing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        *sched.flush_timestamp.lock() = Some(Instant::now());
        {
            let mut queue = sched.queue.lock();
            queue.sort_by_key(|watcher| watcher.id);
            tracing::trace!(queued = queue.len(), "flushing watcher queue");
        }

        let mut result = Ok(());
        loop {
            let watcher = {
                let queue = sched.queue.lock();
                match queue.get(sched.index.load(Ordering::Acquire)) {
                    Some(watcher) => Arc::clone(watcher),
                    None => break,
                }
            };
            if let Some(before) = &watcher.before {
                before();
            }
            sched.has.lock().remove(&watcher.id);
            if let Err(err) = watcher.run(self) {
                result = Err(err);
                break;
            }
            // the watcher re-queued itself during its own run; count it
            if sched.has.lock().contains(&watcher.id) {
                let count = {
                    let mut circular = sched.circular.lock();
                    let entry = circular.entry(watcher.id).or_insert(0);
                    *entry += 1;
                    *entry
                };
                if count > MAX_UPDATE_COUNT {
                    self.report(&ReactiveError::UpdateLoop {
                        expression: watcher.expression.clone(),
                    });
                    break;
                }
            }
            sched.index.fetch_add(1, Ordering::AcqRel);
        }

        // keep copies of the post-flush queues before resetting state
        let activated_queue: Vec<Arc<Scope>> = std::mem::take(&mut *sched.activated.lock());
        let updated_queue: Vec<Arc<Watcher>> = sched.queue.lock().clone();
        self.reset_scheduler_state();

        call_activated_hooks(&activated_queue);
        call_updated_hooks(&updated_queue);
        result
    }

    fn reset_scheduler_state(&self) {
        let sched = self.scheduler();
        sched.queue.lock().clear();
        sched.has.lock().clear();
        sched.circular.lock().clear();
        sched.index.store(0, Ordering::Release);
        sched.waiting.store(false, Ordering::Release);
        sched.flushing.store(false, Ordering::Release);
    }
}

fn call_activated_hooks(queue: &[Arc<Scope>]) {
    for scope in queue {
        scope.set_inactive(false);
        if let Some(hooks) = scope.hooks() {
            hooks.activated();
        }
    }
}

/// Deliver `updated` to each scope whose render watcher ran, deepest scope
/// first, skipping unmounted and destroyed scopes.
fn call_updated_hooks(queue: &[Arc<Watcher>]) {
    for watcher in queue.iter().rev() {
        let scope = &watcher.scope;
        if scope.render_watcher_id() == Some(watcher.id)
            && scope.is_mounted()
            && !scope.is_destroyed()
        {
            if let Some(hooks) = scope.hooks() {
                hooks.updated();
            }
        }
    }
}
