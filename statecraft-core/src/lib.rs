//! Pure data model and algorithms for hierarchical/parallel statecharts.
//!
//! This crate has no I/O, no timers, and spawns nothing: given a [`Chart`]
//! and a prior [`State`], [`engine::transition`] computes the next `State`
//! as a plain function. The `statecraft` crate wraps this in an
//! interpreter that drives the macrostep loop, timers and actor runtime.

pub mod action;
pub mod behavior;
pub mod chart;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod resolver;
pub mod state;
pub mod value;

pub use action::ActionDef;
pub use behavior::Behavior;
pub use chart::{Chart, HistoryKind, NodeId, StateNodeType};
pub use config::{MachineConfig, StateNodeConfig, TransitionConfig};
pub use engine::{initial_state, send, transition};
pub use error::{ChartError, TransitionError};
pub use event::{Event, ScxmlEvent};
pub use state::State;
pub use value::StateValue;
