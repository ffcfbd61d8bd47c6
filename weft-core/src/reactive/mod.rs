//! Reactive dependency tracking and update scheduling.
//!
//! This module implements the core reactive system: observed containers,
//! dependencies, watchers, and the flush scheduler.
//!
//! # Concepts
//!
//! ## Dependencies
//!
//! A dependency is a subscriber set attached to one reactive field or one
//! container's shape channel. Reads register the active watcher with the
//! dependency; writes notify it.
//!
//! ## Watchers
//!
//! A watcher is a re-evaluable computation: a getter plus the dynamic set
//! of dependencies the getter read during its latest evaluation. The set
//! is rebuilt on every evaluation, so conditional reads subscribe only to
//! the branch actually taken.
//!
//! ## The Active Stack
//!
//! While a watcher evaluates it sits on the runtime's active stack, which
//! is how a dependency knows whom to subscribe on a read. Reads outside
//! any evaluation track nothing.
//!
//! ## The Scheduler
//!
//! Writes enqueue their subscribers instead of running them in place. The
//! queue is flushed once per tick: sorted by creation id (ancestors before
//! descendants, data watchers before render watchers), deduplicated, and
//! aborted with a report if a watcher retriggers itself past a fixed
//! ceiling.
//!
//! # Implementation Notes
//!
//! All bookkeeping is owned by an explicit [`Runtime`] value rather than
//! module-level globals, so independent runtimes can coexist and tests can
//! inject a fresh one. Watchers and dependencies reference each other by
//! integer id through runtime-owned arenas; teardown is a bounded
//! lookup-and-remove.
//!
//! This approach to transparent, read-tracked reactivity is the classic
//! observer design used by MobX-style stores and pre-proxy Vue.

pub(crate) mod dep;
pub(crate) mod observer;
mod path;
pub(crate) mod runtime;
mod scheduler;
mod scope;
mod traverse;
mod watcher;

pub use dep::DepId;
pub use runtime::Runtime;
pub use scheduler::{DeferredHook, FlushTask, MAX_UPDATE_COUNT};
pub use scope::{LifecycleHooks, Scope, ScopeId};
pub use traverse::traverse;
pub use watcher::{
    BeforeHook, Callback, Getter, WatchSource, WatcherHandle, WatcherId, WatcherOptions,
};
