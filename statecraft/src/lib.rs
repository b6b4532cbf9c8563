//! Macrostep interpreter and actor runtime built on top of
//! [`statecraft_core`]'s pure chart/transition model.
//!
//! `statecraft-core` computes what a single microstep does; this crate is
//! the part of the system that loops it, drives timers, and hosts actors
//! (§4.5, §4.6).

pub mod actor;
pub mod error;
pub mod interpreter;

pub use actor::{ActorRef, ActorSource, MachineOptions, ParentSink};
pub use error::InterpreterError;
pub use interpreter::{is_update_event, Interpreter, Status};

pub use statecraft_core::{
    ActionDef, Behavior, Chart, ChartError, Event, ScxmlEvent, State, StateValue, TransitionError,
};
