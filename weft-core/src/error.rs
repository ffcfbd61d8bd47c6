//! Error types for the reactive engine.
//!
//! The engine distinguishes two failure worlds:
//!
//! - Failures raised by user-supplied code (watcher getters and callbacks).
//!   These arrive as boxed errors and are wrapped in [`ReactiveError`] with
//!   the watcher's expression attached for context.
//!
//! - Failures raised by the engine itself: malformed watch paths, invalid
//!   mutation targets, and runaway update loops.
//!
//! Every failure is routed through the runtime's single reporting hook (see
//! [`crate::reactive::Runtime::set_error_hook`]). Watchers flagged `user`
//! swallow their failures after reporting; everything else propagates as a
//! `Result` to the caller that triggered the evaluation.

use std::sync::Arc;

use thiserror::Error;

/// Boxed error produced by a user-supplied getter or callback.
pub type EvalError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the reactive engine.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A watcher getter failed. Fatal unless the watcher is `user`-flagged.
    #[error("evaluation of watcher \"{expression}\" failed: {reason}")]
    Evaluation {
        /// Expression or label of the failing watcher.
        expression: String,
        /// The boxed failure from the user-supplied getter.
        reason: EvalError,
    },

    /// A watcher callback failed. Fatal unless the watcher is `user`-flagged.
    #[error("callback for watcher \"{expression}\" failed: {reason}")]
    Callback {
        /// Expression or label of the failing watcher.
        expression: String,
        /// The boxed failure from the user-supplied callback.
        reason: EvalError,
    },

    /// A watcher re-queued itself more than the scheduler's retrigger
    /// ceiling within a single flush. The flush pass is aborted.
    #[error("possible infinite update loop in watcher \"{expression}\"")]
    UpdateLoop {
        /// Expression or label of the offending watcher.
        expression: String,
    },

    /// A watch expression could not be parsed. The watcher is created with
    /// a constant-null getter and never fires.
    #[error(
        "failed watching path \"{path}\": \
         only simple dot-delimited paths are supported, use a getter for full control"
    )]
    MalformedPath {
        /// The rejected expression.
        path: String,
    },

    /// `set_key`/`delete_key` was called on a value that cannot carry
    /// reactive keys (null or a primitive).
    #[error("cannot {operation} a reactive key on a null or primitive value")]
    InvalidTarget {
        /// The refused operation, for the report.
        operation: &'static str,
    },

    /// `set_key`/`delete_key` would change the shape of a root data
    /// container (or a framework-internal one). The operation is refused;
    /// root keys must be declared up front.
    #[error("avoid {operation} of reactive keys on a root data container at runtime")]
    RootDataMutation {
        /// The refused operation, for the report.
        operation: &'static str,
    },
}

/// The single external error-reporting hook.
///
/// Installed with [`crate::reactive::Runtime::set_error_hook`]; receives
/// every error the engine reports, including the ones that are also
/// propagated to the caller.
pub type ErrorHook = Arc<dyn Fn(&ReactiveError) + Send + Sync>;
