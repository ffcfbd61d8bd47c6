//! Reactive runtime.
//!
//! The runtime is the central coordinator that connects observed values,
//! watchers, and the scheduler. It owns all process-wide state the engine
//! needs, so several independent runtimes can coexist in one process and
//! tests can inject a fresh one:
//!
//! - the dependency arena and the watcher arena (both id-indexed),
//! - the active-watcher stack consulted by read-time tracking,
//! - the scheduler queue and its flags,
//! - the observing gate, the batching flag, and the error and deferred
//!   hooks.
//!
//! # How It Works
//!
//! 1. `observe` instruments a value tree; reads and writes on it start
//!    reporting through this runtime.
//!
//! 2. `create_watcher` evaluates a getter with the watcher on the active
//!    stack; every touched dependency records the watcher as a subscriber.
//!
//! 3. A write notifies the touched dependency, which asks each subscribed
//!    watcher to update; non-sync watchers land in the scheduler queue.
//!
//! 4. `flush` drains the queue once per tick.
//!
//! # Thread Safety
//!
//! All state is internally locked and the types are `Send + Sync`, but the
//! engine's execution model is single-threaded and cooperative: writes,
//! evaluation, and flushes interleave on one thread, and only the deferred
//! flush hands control back to the host. A genuinely parallel host must
//! confine one runtime to one thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::error::{ErrorHook, ReactiveError};
use crate::value::Value;

use super::dep::{DepArena, DepId};
use super::path::parse_path;
use super::scheduler::{DeferredHook, Scheduler};
use super::scope::{LifecycleHooks, Scope, ScopeId};
use super::watcher::{
    Callback, Getter, WatchSource, Watcher, WatcherHandle, WatcherId, WatcherOptions,
};

pub(crate) struct RuntimeInner {
    deps: DepArena,
    watchers: RwLock<HashMap<WatcherId, Arc<Watcher>>>,
    /// Watcher ids start at 1; the scheduler's ordering guarantees lean on
    /// this counter being monotonic.
    next_watcher_id: AtomicU64,
    next_scope_id: AtomicU64,
    /// Stack of currently evaluating watchers; the top is the tracking
    /// target for every read.
    target_stack: Mutex<Vec<WatcherId>>,
    scheduler: Scheduler,
    observing: AtomicBool,
    batching: AtomicBool,
    error_hook: RwLock<Option<ErrorHook>>,
    deferred: RwLock<Option<DeferredHook>>,
}

pub(crate) type WeakRuntime = Weak<RuntimeInner>;

/// Handle to one reactive runtime. Cloning shares the runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                deps: DepArena::new(),
                watchers: RwLock::new(HashMap::new()),
                next_watcher_id: AtomicU64::new(1),
                next_scope_id: AtomicU64::new(1),
                target_stack: Mutex::new(Vec::new()),
                scheduler: Scheduler::new(),
                observing: AtomicBool::new(true),
                batching: AtomicBool::new(true),
                error_hook: RwLock::new(None),
                deferred: RwLock::new(None),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<RuntimeInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> WeakRuntime {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub(crate) fn deferred_hook(&self) -> Option<DeferredHook> {
        self.inner.deferred.read().clone()
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Gate for new observation. While off, `observe` attaches nothing;
    /// the lifecycle layer toggles this while wiring externally-owned
    /// inputs.
    pub fn toggle_observing(&self, observing: bool) {
        self.inner.observing.store(observing, Ordering::Release);
    }

    pub fn is_observing(&self) -> bool {
        self.inner.observing.load(Ordering::Acquire)
    }

    /// With batching off, the first enqueue of a cycle flushes
    /// synchronously instead of waiting for the deferred tick.
    pub fn set_batching(&self, batching: bool) {
        self.inner.batching.store(batching, Ordering::Release);
    }

    pub fn is_batching(&self) -> bool {
        self.inner.batching.load(Ordering::Acquire)
    }

    /// Install the single external error-reporting hook. Without one,
    /// reports go to the `tracing` log.
    pub fn set_error_hook(&self, hook: ErrorHook) {
        *self.inner.error_hook.write() = Some(hook);
    }

    /// Install the deferred-execution hook used to run pending flushes
    /// after the current synchronous stack unwinds.
    pub fn set_deferred_hook(&self, hook: DeferredHook) {
        *self.inner.deferred.write() = Some(hook);
    }

    /// Report an error through the hook, or to the log when no hook is
    /// installed. Evaluation and callback failures log as errors, the
    /// rest as warnings.
    pub fn report(&self, err: &ReactiveError) {
        let hook = self.inner.error_hook.read().clone();
        match hook {
            Some(hook) => hook(err),
            None => match err {
                ReactiveError::Evaluation { .. } | ReactiveError::Callback { .. } => {
                    tracing::error!("{err}");
                }
                _ => tracing::warn!("{err}"),
            },
        }
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    pub fn create_scope(&self, hooks: Option<Arc<dyn LifecycleHooks>>) -> Arc<Scope> {
        let id = ScopeId(self.inner.next_scope_id.fetch_add(1, Ordering::Relaxed));
        Arc::new(Scope::new(id, hooks))
    }

    /// Observe `data` as root data and attach it to the scope for path
    /// watchers.
    pub fn set_scope_data(&self, scope: &Scope, data: Value) {
        self.observe(&data, true);
        scope.set_data(data);
    }

    /// Tear down every watcher a scope owns, with the per-watcher scope
    /// detach skipped, then mark the scope destroyed.
    pub fn teardown_scope(&self, scope: &Arc<Scope>) {
        scope.begin_destroy();
        for id in scope.watcher_ids() {
            let watcher = self.inner.watchers.read().get(&id).cloned();
            if let Some(watcher) = watcher {
                watcher.teardown(self);
            }
        }
        scope.clear_watchers();
        scope.mark_destroyed();
    }

    // ------------------------------------------------------------------
    // Watchers
    // ------------------------------------------------------------------

    /// Create a watcher owned by `scope`.
    ///
    /// A path source that fails to parse is reported and replaced with a
    /// constant-null getter, so the watcher never meaningfully
    /// re-evaluates. Non-lazy watchers evaluate eagerly; a fatal getter
    /// error tears the half-built watcher down and fails construction.
    pub fn create_watcher(
        &self,
        scope: &Arc<Scope>,
        source: WatchSource,
        cb: Option<Callback>,
        options: WatcherOptions,
        is_render: bool,
    ) -> Result<WatcherHandle, ReactiveError> {
        let id = WatcherId(self.inner.next_watcher_id.fetch_add(1, Ordering::Relaxed));
        let (getter, expression) = match source {
            WatchSource::Getter(getter) => (getter, format!("<getter #{}>", id.raw())),
            WatchSource::Path(path) => match parse_path(&path) {
                Some(getter) => (getter, path),
                None => {
                    self.report(&ReactiveError::MalformedPath { path: path.clone() });
                    let getter: Getter = Arc::new(|_| Ok(Value::Null));
                    (getter, path)
                }
            },
        };
        let lazy = options.lazy;
        let watcher = Arc::new(Watcher::new(
            id,
            Arc::clone(scope),
            expression,
            getter,
            cb,
            options,
        ));
        if is_render {
            scope.set_render_watcher(id);
        }
        scope.push_watcher(id);
        self.inner.watchers.write().insert(id, Arc::clone(&watcher));
        if !lazy {
            if let Err(err) = watcher.eager_eval(self) {
                watcher.teardown(self);
                return Err(err);
            }
        }
        Ok(WatcherHandle::new(self.clone(), watcher))
    }

    pub(crate) fn drop_watcher(&self, id: WatcherId) {
        self.inner.watchers.write().remove(&id);
    }

    pub(crate) fn watcher(&self, id: WatcherId) -> Option<Arc<Watcher>> {
        self.inner.watchers.read().get(&id).cloned()
    }

    // ------------------------------------------------------------------
    // Active-watcher stack and dependency plumbing
    // ------------------------------------------------------------------

    pub(crate) fn push_target(&self, id: WatcherId) {
        self.inner.target_stack.lock().push(id);
    }

    pub(crate) fn pop_target(&self) {
        self.inner.target_stack.lock().pop();
    }

    pub(crate) fn current_target(&self) -> Option<WatcherId> {
        self.inner.target_stack.lock().last().copied()
    }

    /// Whether a watcher is currently evaluating. Reads with no active
    /// watcher track nothing.
    pub fn is_tracking(&self) -> bool {
        !self.inner.target_stack.lock().is_empty()
    }

    pub(crate) fn create_dep(&self) -> DepId {
        self.inner.deps.create()
    }

    /// Ask the active watcher, if any, to register this dependency. The
    /// subscriber addition happens from the watcher side so it can
    /// deduplicate against its pending set first.
    pub(crate) fn depend(&self, dep: DepId) {
        let Some(target) = self.current_target() else {
            return;
        };
        if let Some(watcher) = self.watcher(target) {
            watcher.add_dep(self, dep);
        }
    }

    pub(crate) fn add_subscriber(&self, dep: DepId, watcher: WatcherId) {
        self.inner.deps.add_sub(dep, watcher);
    }

    pub(crate) fn remove_subscriber(&self, dep: DepId, watcher: WatcherId) {
        self.inner.deps.remove_sub(dep, watcher);
    }

    /// Notify every subscriber of a dependency, in subscription order,
    /// over a snapshot of the subscriber list.
    pub(crate) fn notify(&self, dep: DepId) -> Result<(), ReactiveError> {
        let subs = self.inner.deps.subscribers(dep);
        for id in subs {
            if let Some(watcher) = self.watcher(id) {
                watcher.update(self)?;
            }
        }
        Ok(())
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_stack_nests() {
        let rt = Runtime::new();
        assert!(!rt.is_tracking());

        rt.push_target(WatcherId(1));
        rt.push_target(WatcherId(2));
        assert_eq!(rt.current_target(), Some(WatcherId(2)));

        rt.pop_target();
        assert_eq!(rt.current_target(), Some(WatcherId(1)));

        rt.pop_target();
        assert!(!rt.is_tracking());
    }

    #[test]
    fn watcher_ids_are_monotonic_in_creation_order() {
        let rt = Runtime::new();
        let scope = rt.create_scope(None);
        let a = rt
            .create_watcher(
                &scope,
                WatchSource::getter(|_| Ok(Value::Null)),
                None,
                WatcherOptions::default(),
                false,
            )
            .unwrap();
        let b = rt
            .create_watcher(
                &scope,
                WatchSource::getter(|_| Ok(Value::Null)),
                None,
                WatcherOptions::default(),
                false,
            )
            .unwrap();
        assert!(a.id() < b.id());
    }

    #[test]
    fn malformed_path_yields_constant_null_watcher() {
        let rt = Runtime::new();
        let reported = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let seen = reported.clone();
        rt.set_error_hook(Arc::new(move |err| {
            if matches!(err, ReactiveError::MalformedPath { .. }) {
                seen.store(true, Ordering::SeqCst);
            }
        }));

        let scope = rt.create_scope(None);
        let handle = rt
            .create_watcher(
                &scope,
                WatchSource::path("not-a-path"),
                None,
                WatcherOptions::default(),
                false,
            )
            .unwrap();

        assert!(reported.load(Ordering::SeqCst));
        assert_eq!(handle.value(), Value::Null);
        assert_eq!(handle.expression(), "not-a-path");
    }

    #[test]
    fn teardown_scope_releases_all_watchers() {
        let rt = Runtime::new();
        let scope = rt.create_scope(None);
        let state = crate::value::ObservedMap::new();
        state.insert("n", 1);
        rt.observe(&Value::Map(state.clone()), false);

        let getter_state = state.clone();
        let handle = rt
            .create_watcher(
                &scope,
                WatchSource::getter(move |_| Ok(getter_state.get("n"))),
                None,
                WatcherOptions::default(),
                false,
            )
            .unwrap();

        rt.teardown_scope(&scope);
        assert!(scope.is_destroyed());
        assert!(!handle.is_active());
        assert!(scope.watcher_ids().is_empty());
    }
}
