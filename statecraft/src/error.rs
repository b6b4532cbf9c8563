//! Interpreter-level errors (§7, §10.1). Chart-construction and microstep
//! errors are defined in `statecraft-core`; this adds the two kinds that only
//! arise once actions and actors run against a live interpreter.

use thiserror::Error;

use statecraft_core::TransitionError;

#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// A user-provided opaque action or assigner panicked or returned an
    /// error; caught at the action-evaluator boundary and turned into an
    /// `error.execution` internal event rather than unwinding the interpreter
    /// (§7).
    #[error("action {action} raised while handling event {event}: {reason}")]
    ActionException {
        action: String,
        event: String,
        reason: String,
    },

    /// `spawn` was given a source it does not recognize, or a child machine
    /// failed chart construction.
    #[error("failed to spawn actor {id}: {reason}")]
    ActorSpawnFailure { id: String, reason: String },

    /// The interpreter was asked to do something (`send`, `spawn`) after
    /// `stop()`, or before `start()`.
    #[error("interpreter {id} is not running (status: {status})")]
    NotRunning { id: String, status: &'static str },
}
