//! Named guard/assigner/action lookup (§10.3).
//!
//! Because the fluent builder/macro surface is out of scope, guards and
//! actions referenced by name in a [`crate::config::MachineConfig`] are
//! resolved against a plain registry supplied by the caller, rather than
//! against generated methods on a typestate struct.

use std::collections::HashMap;

use crate::event::Event;

/// A guard may itself fail (§7 `GuardException`); returning `Err` aborts the
/// microstep rather than silently treating the guard as false.
pub type GuardFn<C> = Box<dyn Fn(&C, &Event) -> Result<bool, String> + Send + Sync>;
pub type AssignFn<C> = Box<dyn Fn(&C, &Event) -> C + Send + Sync>;
/// An opaque action may itself fail; the interpreter catches both an `Err`
/// and a panic at the call site and turns either into an `error.execution`
/// internal event (`InterpreterError::ActionException`).
pub type OpaqueActionFn<C> = Box<dyn Fn(&C, &Event) -> Result<(), String> + Send + Sync>;

/// A named collection of guards, assigners and opaque actions a `Chart`'s
/// string references are resolved against at transition time.
pub struct Behavior<C> {
    guards: HashMap<String, GuardFn<C>>,
    assigners: HashMap<String, AssignFn<C>>,
    actions: HashMap<String, OpaqueActionFn<C>>,
}

impl<C> Default for Behavior<C> {
    fn default() -> Self {
        Behavior {
            guards: HashMap::new(),
            assigners: HashMap::new(),
            actions: HashMap::new(),
        }
    }
}

impl<C> Behavior<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_guard(
        mut self,
        name: impl Into<String>,
        guard: impl Fn(&C, &Event) -> Result<bool, String> + Send + Sync + 'static,
    ) -> Self {
        self.guards.insert(name.into(), Box::new(guard));
        self
    }

    /// Convenience for the common case of a guard that cannot itself fail.
    pub fn with_infallible_guard(
        self,
        name: impl Into<String>,
        guard: impl Fn(&C, &Event) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.with_guard(name, move |ctx, event| Ok(guard(ctx, event)))
    }

    pub fn with_assigner(
        mut self,
        name: impl Into<String>,
        assigner: impl Fn(&C, &Event) -> C + Send + Sync + 'static,
    ) -> Self {
        self.assigners.insert(name.into(), Box::new(assigner));
        self
    }

    pub fn with_action(
        mut self,
        name: impl Into<String>,
        action: impl Fn(&C, &Event) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.actions.insert(name.into(), Box::new(action));
        self
    }

    /// Convenience for the common case of an action that cannot itself fail
    /// (it may still panic, which the interpreter catches regardless).
    pub fn with_infallible_action(
        self,
        name: impl Into<String>,
        action: impl Fn(&C, &Event) + Send + Sync + 'static,
    ) -> Self {
        self.with_action(name, move |ctx, event| {
            action(ctx, event);
            Ok(())
        })
    }

    pub fn guard(&self, name: &str) -> Option<&GuardFn<C>> {
        self.guards.get(name)
    }

    pub fn assigner(&self, name: &str) -> Option<&AssignFn<C>> {
        self.assigners.get(name)
    }

    pub fn action(&self, name: &str) -> Option<&OpaqueActionFn<C>> {
        self.actions.get(name)
    }
}
