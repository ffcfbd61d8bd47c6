//! Weft Core
//!
//! This crate provides the reactive core of the Weft UI framework:
//! transparent, fine-grained change detection over plain data trees.
//! Mutations automatically re-trigger exactly the computations that read
//! the mutated data, batched and deduplicated so each affected computation
//! runs at most once per update cycle.
//!
//! The template compiler, component lifecycle, and host integration are
//! separate layers; they talk to this crate through a handful of entry
//! points on [`reactive::Runtime`]: `observe`, `define_reactive_field`,
//! `create_watcher`, `set_key`/`delete_key`, and `queue_activated`.
//!
//! # Architecture
//!
//! - [`value`]: the observed data model, maps and lists with explicit
//!   reactive accessors
//! - [`reactive`]: dependencies, watchers, the active-watcher stack, and
//!   the flush scheduler
//! - [`error`]: the error taxonomy and the external reporting hook
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use weft_core::{ObservedMap, Runtime, Value, WatchSource, WatcherOptions};
//!
//! let rt = Runtime::new();
//! let scope = rt.create_scope(None);
//!
//! let state = ObservedMap::new();
//! state.insert("count", 1);
//! rt.observe(&Value::Map(state.clone()), true);
//!
//! let read = state.clone();
//! let watcher = rt
//!     .create_watcher(
//!         &scope,
//!         WatchSource::getter(move |_| Ok(read.get("count"))),
//!         Some(Arc::new(|new, old| {
//!             println!("count: {old:?} -> {new:?}");
//!             Ok(())
//!         })),
//!         WatcherOptions::default(),
//!         false,
//!     )
//!     .unwrap();
//!
//! state.set("count", 2).unwrap();
//! rt.flush().unwrap(); // prints: count: Number(1) -> Number(2)
//! assert_eq!(watcher.value(), Value::from(2));
//! ```

pub mod error;
pub mod reactive;
pub mod value;

pub use error::{ErrorHook, EvalError, ReactiveError};
pub use reactive::{
    DeferredHook, DepId, FlushTask, LifecycleHooks, Runtime, Scope, ScopeId, WatchSource,
    WatcherHandle, WatcherId, WatcherOptions, MAX_UPDATE_COUNT,
};
pub use value::{ObservedList, ObservedMap, Value, WriteHook};
