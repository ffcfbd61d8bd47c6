//! Owning scopes and the lifecycle contract.
//!
//! The engine does not manage component instances; it only keeps the
//! narrow surface the external lifecycle layer consumes. A [`Scope`] is
//! that surface: it owns a list of watcher ids, optionally designates one
//! of them as its render watcher, carries the root data that path watchers
//! walk, and holds the [`LifecycleHooks`] the scheduler calls after a
//! flush.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::value::Value;

use super::watcher::WatcherId;

/// Unique identifier for a scope, minted in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub(crate) u64);

impl ScopeId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Callbacks the lifecycle layer receives from the scheduler. All of them
/// default to no-ops.
pub trait LifecycleHooks: Send + Sync {
    /// Installed per-watcher as the scheduler pre-run hook; see
    /// [`super::watcher::WatcherOptions::before`].
    fn before_update(&self) {}

    /// Called after a flush for every scope whose render watcher ran,
    /// deepest scope first.
    fn updated(&self) {}

    /// Called after a flush for every scope registered through
    /// [`super::runtime::Runtime::queue_activated`], in queue order and
    /// before any `updated` call.
    fn activated(&self) {}
}

/// The owning context for a group of watchers.
pub struct Scope {
    id: ScopeId,
    hooks: Option<Arc<dyn LifecycleHooks>>,
    data: RwLock<Option<Value>>,
    watchers: Mutex<Vec<WatcherId>>,
    render_watcher: Mutex<Option<WatcherId>>,
    mounted: AtomicBool,
    destroying: AtomicBool,
    destroyed: AtomicBool,
    inactive: AtomicBool,
}

impl Scope {
    pub(crate) fn new(id: ScopeId, hooks: Option<Arc<dyn LifecycleHooks>>) -> Self {
        Self {
            id,
            hooks,
            data: RwLock::new(None),
            watchers: Mutex::new(Vec::new()),
            render_watcher: Mutex::new(None),
            mounted: AtomicBool::new(false),
            destroying: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            inactive: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// Root data walked by path watchers.
    pub fn data(&self) -> Option<Value> {
        self.data.read().clone()
    }

    /// Attach root data without observing it. Most callers want
    /// [`super::runtime::Runtime::set_scope_data`], which observes the
    /// value as root data first.
    pub fn set_data(&self, data: Value) {
        *self.data.write() = Some(data);
    }

    pub(crate) fn hooks(&self) -> Option<&Arc<dyn LifecycleHooks>> {
        self.hooks.as_ref()
    }

    pub(crate) fn push_watcher(&self, id: WatcherId) {
        self.watchers.lock().push(id);
    }

    pub(crate) fn remove_watcher(&self, id: WatcherId) {
        self.watchers.lock().retain(|w| *w != id);
    }

    pub(crate) fn watcher_ids(&self) -> Vec<WatcherId> {
        self.watchers.lock().clone()
    }

    pub(crate) fn clear_watchers(&self) {
        self.watchers.lock().clear();
    }

    pub(crate) fn set_render_watcher(&self, id: WatcherId) {
        *self.render_watcher.lock() = Some(id);
    }

    /// The scope's primary render watcher, if one was created.
    pub fn render_watcher_id(&self) -> Option<WatcherId> {
        *self.render_watcher.lock()
    }

    /// Mark the scope mounted. The scheduler only delivers `updated` hooks
    /// to mounted scopes.
    pub fn mark_mounted(&self) {
        self.mounted.store(true, Ordering::Release);
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    pub(crate) fn begin_destroy(&self) {
        self.destroying.store(true, Ordering::Release);
    }

    pub fn is_destroying(&self) -> bool {
        self.destroying.load(Ordering::Acquire)
    }

    pub(crate) fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::Release);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub(crate) fn set_inactive(&self, inactive: bool) {
        self.inactive.store(inactive, Ordering::Release);
    }

    /// Whether the scope sits in an inactive (kept-alive) subtree.
    pub fn is_inactive(&self) -> bool {
        self.inactive.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_flags_default_off() {
        let scope = Scope::new(ScopeId(1), None);
        assert!(!scope.is_mounted());
        assert!(!scope.is_destroying());
        assert!(!scope.is_destroyed());
        assert!(!scope.is_inactive());
        assert!(scope.data().is_none());
        assert!(scope.render_watcher_id().is_none());
    }

    #[test]
    fn watcher_list_tracks_membership() {
        let scope = Scope::new(ScopeId(1), None);
        scope.push_watcher(WatcherId(1));
        scope.push_watcher(WatcherId(2));
        scope.remove_watcher(WatcherId(1));
        assert_eq!(scope.watcher_ids(), vec![WatcherId(2)]);
    }
}
