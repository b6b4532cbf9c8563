//! Typed errors for chart construction and transition evaluation (§7, §10.1).

use thiserror::Error;

/// Raised at chart-construction time (§7).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChartError {
    #[error("unknown state: {0}")]
    UnknownState(String),
    #[error("cyclic initial state at {0}")]
    InitialCycle(String),
    #[error("non-deterministic entry into region {0}")]
    NonDeterministicEntry(String),
    #[error("compound state {0} must have at least one child and a valid initial")]
    InvalidCompound(String),
    #[error("parallel state {0} must have at least two regions")]
    InvalidParallel(String),
    #[error("atomic/final state {0} must not declare children")]
    InvalidAtomic(String),
}

/// Raised per microstep by the pure transition engine (§7).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("unknown state: {0}")]
    UnknownState(String),
    #[error("guard {guard} raised while evaluating event {event}")]
    GuardException { guard: String, event: String },
    #[error("no assigner registered under the name {0}")]
    UnknownAssigner(String),
    #[error("non-deterministic entry into region {0}: more than one child selected")]
    NonDeterministicEntry(String),
}
