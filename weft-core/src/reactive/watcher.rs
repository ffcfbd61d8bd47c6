//! Watcher implementation.
//!
//! A watcher is a re-evaluable unit of work: a getter plus bookkeeping of
//! which dependencies the getter read last time. Watchers back three
//! different consumers with one mechanism:
//!
//! - render watchers (the per-scope primary, `sync`/`lazy` off),
//! - user watchers created through a watch API (`user` on, often `deep`),
//! - computed-style watchers (`lazy` on, recomputed through
//!   [`WatcherHandle::evaluate_if_dirty`]).
//!
//! # Dependency Re-Tracking
//!
//! Every evaluation rebuilds the dependency set from scratch. While the
//! getter runs, each touched dependency lands in a "pending" set; when the
//! getter returns, the pending set becomes current and any dependency that
//! was read last time but not this time is unsubscribed. Conditional reads
//! therefore narrow the subscription set automatically: after a branch
//! flip, the branch that is no longer read can no longer trigger the
//! watcher.
//!
//! The two-set check in [`Watcher::add_dep`] keeps one evaluation from
//! subscribing twice and keeps re-confirmed dependencies from churning the
//! subscriber lists.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::{EvalError, ReactiveError};
use crate::value::Value;

use super::dep::DepId;
use super::runtime::Runtime;
use super::scope::Scope;
use super::traverse::traverse;

/// Unique identifier for a watcher, minted in creation order.
///
/// The scheduler sorts by this id, so creation order is load-bearing:
/// parent scopes create their watchers before child scopes, and a scope's
/// non-render watchers are created before its render watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(pub(crate) u64);

impl WatcherId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Getter evaluated under dependency tracking.
pub type Getter = Arc<dyn Fn(&Scope) -> Result<Value, EvalError> + Send + Sync>;

/// Change callback, invoked with `(new_value, old_value)`.
pub type Callback = Arc<dyn Fn(&Value, &Value) -> Result<(), EvalError> + Send + Sync>;

/// Pre-run hook, invoked by the scheduler right before the watcher runs.
/// The lifecycle layer uses it to mark its context as about to update.
pub type BeforeHook = Arc<dyn Fn() + Send + Sync>;

/// What a watcher evaluates: a getter function or a dot-delimited path
/// walked from the owning scope's root data.
pub enum WatchSource {
    Getter(Getter),
    Path(String),
}

impl WatchSource {
    pub fn getter<F>(f: F) -> Self
    where
        F: Fn(&Scope) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        WatchSource::Getter(Arc::new(f))
    }

    pub fn path(path: impl Into<String>) -> Self {
        WatchSource::Path(path.into())
    }
}

/// Mode flags for [`Runtime::create_watcher`].
#[derive(Clone, Default)]
pub struct WatcherOptions {
    /// Traverse the produced value so every nested field becomes a
    /// dependency.
    pub deep: bool,
    /// User-defined watcher: getter and callback failures are reported and
    /// swallowed instead of propagated.
    pub user: bool,
    /// Compute on demand instead of eagerly; dependency changes only mark
    /// the watcher dirty.
    pub lazy: bool,
    /// Run immediately on notification instead of going through the
    /// scheduler queue.
    pub sync: bool,
    /// Scheduler pre-run hook.
    pub before: Option<BeforeHook>,
}

#[derive(Default)]
struct Tracked {
    /// Dependencies from the last completed evaluation.
    deps: SmallVec<[DepId; 8]>,
    /// Dependencies collected by the evaluation in progress.
    new_deps: SmallVec<[DepId; 8]>,
    dep_ids: HashSet<DepId>,
    new_dep_ids: HashSet<DepId>,
}

pub(crate) struct Watcher {
    pub(crate) id: WatcherId,
    pub(crate) scope: Arc<Scope>,
    /// Path expression or a generated label, used in error reports.
    pub(crate) expression: String,
    getter: Getter,
    cb: Option<Callback>,
    pub(crate) deep: bool,
    pub(crate) user: bool,
    pub(crate) lazy: bool,
    pub(crate) sync: bool,
    pub(crate) before: Option<BeforeHook>,
    active: AtomicBool,
    dirty: AtomicBool,
    value: Mutex<Value>,
    tracked: Mutex<Tracked>,
}

impl Watcher {
    pub(crate) fn new(
        id: WatcherId,
        scope: Arc<Scope>,
        expression: String,
        getter: Getter,
        cb: Option<Callback>,
        options: WatcherOptions,
    ) -> Self {
        Self {
            id,
            scope,
            expression,
            getter,
            cb,
            deep: options.deep,
            user: options.user,
            lazy: options.lazy,
            sync: options.sync,
            before: options.before,
            active: AtomicBool::new(true),
            // lazy watchers start dirty so the first demand computes
            dirty: AtomicBool::new(options.lazy),
            value: Mutex::new(Value::Null),
            tracked: Mutex::new(Tracked::default()),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub(crate) fn value(&self) -> Value {
        self.value.lock().clone()
    }

    /// Evaluate the getter and re-collect dependencies.
    ///
    /// The watcher is pushed onto the runtime's active stack for the
    /// duration of the getter (and of the deep traversal, which must run
    /// while this watcher is still the tracking target). The stack pop and
    /// the dependency-set reconciliation run on the error path too.
    pub(crate) fn get(&self, rt: &Runtime) -> Result<Value, ReactiveError> {
        rt.push_target(self.id);
        let value = match (self.getter)(&self.scope) {
            Ok(value) => value,
            Err(reason) => {
                if self.user {
                    let err = ReactiveError::Evaluation {
                        expression: self.expression.clone(),
                        reason,
                    };
                    rt.report(&err);
                    Value::Null
                } else {
                    rt.pop_target();
                    self.cleanup_deps(rt);
                    return Err(ReactiveError::Evaluation {
                        expression: self.expression.clone(),
                        reason,
                    });
                }
            }
        };
        if self.deep {
            traverse(&value);
        }
        rt.pop_target();
        self.cleanup_deps(rt);
        Ok(value)
    }

    /// Register a dependency touched during the current evaluation.
    ///
    /// The pending set deduplicates within one evaluation; the current set
    /// distinguishes a genuinely new subscription from a re-confirmation,
    /// so the dependency's subscriber list is only touched for new ones.
    pub(crate) fn add_dep(&self, rt: &Runtime, dep: DepId) {
        let mut tracked = self.tracked.lock();
        if !tracked.new_dep_ids.contains(&dep) {
            tracked.new_dep_ids.insert(dep);
            tracked.new_deps.push(dep);
            if !tracked.dep_ids.contains(&dep) {
                rt.add_subscriber(dep, self.id);
            }
        }
    }

    /// Swap the pending dependency set in and unsubscribe from everything
    /// the latest evaluation no longer read.
    fn cleanup_deps(&self, rt: &Runtime) {
        let mut tracked = self.tracked.lock();
        let Tracked {
            deps,
            new_deps,
            dep_ids,
            new_dep_ids,
        } = &mut *tracked;
        for dep in deps.iter() {
            if !new_dep_ids.contains(dep) {
                rt.remove_subscriber(*dep, self.id);
            }
        }
        std::mem::swap(dep_ids, new_dep_ids);
        new_dep_ids.clear();
        std::mem::swap(deps, new_deps);
        new_deps.clear();
    }

    /// Subscriber interface, called when a dependency changes.
    pub(crate) fn update(&self, rt: &Runtime) -> Result<(), ReactiveError> {
        if self.lazy {
            self.dirty.store(true, Ordering::Release);
            Ok(())
        } else if self.sync {
            self.run(rt)
        } else {
            // re-fetch the shared handle; an active watcher is always in
            // the runtime arena
            match rt.watcher(self.id) {
                Some(me) => rt.queue_watcher(&me),
                None => Ok(()),
            }
        }
    }

    /// Scheduler job interface: re-evaluate and fire the callback.
    ///
    /// The callback fires when the value changed, but also whenever the
    /// value is a container or the watcher is deep, because containers can
    /// mutate in place behind an unchanged handle.
    pub(crate) fn run(&self, rt: &Runtime) -> Result<(), ReactiveError> {
        if !self.is_active() {
            return Ok(());
        }
        let value = self.get(rt)?;
        let old_value = self.value.lock().clone();
        if !Value::same(&value, &old_value) || value.is_container() || self.deep {
            *self.value.lock() = value.clone();
            if let Some(cb) = &self.cb {
                if let Err(reason) = cb(&value, &old_value) {
                    let err = ReactiveError::Callback {
                        expression: self.expression.clone(),
                        reason,
                    };
                    if self.user {
                        rt.report(&err);
                    } else {
                        return Err(err);
                    }
                }
            }
        }
        Ok(())
    }

    /// Eager initial evaluation for non-lazy watchers.
    pub(crate) fn eager_eval(&self, rt: &Runtime) -> Result<(), ReactiveError> {
        let value = self.get(rt)?;
        *self.value.lock() = value;
        Ok(())
    }

    /// Recompute a lazy watcher if a dependency marked it dirty.
    pub(crate) fn evaluate_if_dirty(&self, rt: &Runtime) -> Result<(), ReactiveError> {
        if !self.is_dirty() {
            return Ok(());
        }
        let value = self.get(rt)?;
        *self.value.lock() = value;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }

    /// Re-register every current dependency with the active outer watcher.
    ///
    /// Computed-style accessors call this so that reading a lazy watcher
    /// from inside another evaluation subscribes the outer watcher to the
    /// lazy watcher's inputs.
    pub(crate) fn depend(&self, rt: &Runtime) {
        let deps: SmallVec<[DepId; 8]> = self.tracked.lock().deps.clone();
        for dep in deps {
            rt.depend(dep);
        }
    }

    /// Remove self from every dependency's subscriber list and from the
    /// owning scope. Idempotent; a torn-down watcher is excluded from all
    /// future notifications and `run` becomes a no-op.
    pub(crate) fn teardown(&self, rt: &Runtime) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        // detaching from the scope list is skipped while the whole scope is
        // going away, the scope drops the list in one shot
        if !self.scope.is_destroying() {
            self.scope.remove_watcher(self.id);
        }
        let deps: SmallVec<[DepId; 8]> = self.tracked.lock().deps.clone();
        for dep in deps {
            rt.remove_subscriber(dep, self.id);
        }
        rt.drop_watcher(self.id);
    }
}

/// Public handle to a watcher.
///
/// Dropping the handle does not tear the watcher down; the watcher stays
/// subscribed until [`WatcherHandle::teardown`] or
/// [`Runtime::teardown_scope`] runs.
#[derive(Clone)]
pub struct WatcherHandle {
    rt: Runtime,
    watcher: Arc<Watcher>,
}

impl WatcherHandle {
    pub(crate) fn new(rt: Runtime, watcher: Arc<Watcher>) -> Self {
        Self { rt, watcher }
    }

    pub fn id(&self) -> WatcherId {
        self.watcher.id
    }

    /// The value produced by the last evaluation.
    pub fn value(&self) -> Value {
        self.watcher.value()
    }

    pub fn is_active(&self) -> bool {
        self.watcher.is_active()
    }

    /// Whether a lazy watcher needs recomputation.
    pub fn is_dirty(&self) -> bool {
        self.watcher.is_dirty()
    }

    pub fn expression(&self) -> &str {
        &self.watcher.expression
    }

    /// Recompute a lazy watcher if dirty. See
    /// [`WatcherHandle::depend`] for the companion call computed accessors
    /// make while an outer watcher is active.
    pub fn evaluate_if_dirty(&self) -> Result<(), ReactiveError> {
        self.watcher.evaluate_if_dirty(&self.rt)
    }

    /// Subscribe the currently active watcher to all of this watcher's
    /// dependencies.
    pub fn depend(&self) {
        self.watcher.depend(&self.rt)
    }

    pub fn teardown(&self) {
        self.watcher.teardown(&self.rt)
    }
}
