//! The macrostep-driven `Interpreter` (§4.5): drains external and internal
//! event queues against [`statecraft_core::transition`], runs the Action
//! Evaluator (§4.4) on the resulting `actions`, schedules `after` timers, and
//! notifies listeners once each macrostep stabilizes.
//!
//! The engine itself is pure; everything in this module is the part of the
//! system that is *not* — queues, timers, actor tasks — so it is the only
//! place in the workspace that touches `tokio`.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug_span, trace, warn};

use statecraft_core::action::ActionDef;
use statecraft_core::chart::NodeId;
use statecraft_core::event::{after_event, NULL_EVENT, UPDATE_EVENT};
use statecraft_core::value::configuration_from_value;
use statecraft_core::{Behavior, Chart, Event, ScxmlEvent, State};

use crate::actor::ActorRef;
use crate::error::InterpreterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    NotStarted,
    Running,
    Stopped,
}

impl Status {
    fn as_str(self) -> &'static str {
        match self {
            Status::NotStarted => "not_started",
            Status::Running => "running",
            Status::Stopped => "stopped",
        }
    }
}

/// Owns a `State<C>` and drives it forward. Not `Clone` — share it via
/// [`Interpreter::handle`], which hands out a sender into its external queue.
pub struct Interpreter<C> {
    pub id: String,
    chart: Arc<Chart>,
    behavior: Arc<Behavior<C>>,
    state: State<C>,
    status: Status,
    internal: VecDeque<Event>,
    external_tx: mpsc::UnboundedSender<Event>,
    external_rx: mpsc::UnboundedReceiver<Event>,
    parent: Option<mpsc::UnboundedSender<Event>>,
    actors: HashMap<String, ActorRef>,
    /// Timers started by the `send`/`sendParent` action evaluator, keyed by
    /// the caller-supplied `id` so `cancel(id)` can evict them.
    timers: HashMap<String, tokio::task::JoinHandle<()>>,
    /// Timers backing `after` transitions, keyed by the owning state so they
    /// can be cancelled in bulk when that state is exited.
    after_timers: HashMap<NodeId, Vec<tokio::task::JoinHandle<()>>>,
    active_after_nodes: BTreeSet<NodeId>,
    listeners: Vec<Box<dyn Fn(&State<C>) + Send + Sync>>,
    error_listeners: Vec<Box<dyn Fn(&InterpreterError) + Send + Sync>>,
}

impl<C> Interpreter<C>
where
    C: Clone + Send + Sync + 'static,
{
    pub fn new(id: impl Into<String>, chart: Arc<Chart>, behavior: Arc<Behavior<C>>, context: C) -> Self {
        let (external_tx, external_rx) = mpsc::unbounded_channel();
        let state = statecraft_core::initial_state(&chart, &behavior, context)
            .expect("initial entry assigns reference a registered assigner");
        Interpreter {
            id: id.into(),
            chart,
            behavior,
            state,
            status: Status::NotStarted,
            internal: VecDeque::new(),
            external_tx,
            external_rx,
            parent: None,
            actors: HashMap::new(),
            timers: HashMap::new(),
            after_timers: HashMap::new(),
            active_after_nodes: BTreeSet::new(),
            listeners: Vec::new(),
            error_listeners: Vec::new(),
        }
    }

    /// Wires `sendParent` and actor `sync` notifications to `parent`.
    pub fn with_parent(mut self, parent: mpsc::UnboundedSender<Event>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// A sender into this interpreter's external queue — what a spawning
    /// parent hands to a `Machine` actor as its "send to me" channel, and
    /// what `ActorRef::send` ultimately feeds for a child machine actor.
    pub fn handle(&self) -> mpsc::UnboundedSender<Event> {
        self.external_tx.clone()
    }

    /// The current `State`, readable before `start()` per §4.6's null-actor
    /// requirement ("preserves the ability to read `initialState.context`
    /// without a service running").
    pub fn state(&self) -> &State<C> {
        &self.state
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn subscribe(&mut self, listener: impl Fn(&State<C>) + Send + Sync + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn on_error(&mut self, listener: impl Fn(&InterpreterError) + Send + Sync + 'static) {
        self.error_listeners.push(Box::new(listener));
    }

    /// Spawns an actor as a child of this interpreter, stopping (and
    /// replacing) any previous actor registered under the same `id` — the
    /// `assign`-by-reference replacement case in §4.6 "Lifecycle". Before
    /// `start()` and after `stop()` there is no running event loop to own the
    /// actor's task, so this registers the null actor (§9 "Null actor")
    /// instead of spawning a real one.
    pub fn spawn(&mut self, id: impl Into<String>, source: crate::actor::ActorSource<impl Clone + Send + Sync + 'static>) -> &ActorRef {
        let id = id.into();
        if let Some(mut existing) = self.actors.remove(&id) {
            existing.stop();
        }
        let actor = if self.status == Status::Running {
            crate::actor::spawn(id.clone(), source, self.external_tx.clone())
        } else {
            warn!(id = %self.id, actor = %id, "spawn called while interpreter is not running; registering a null actor");
            ActorRef::null(id.clone())
        };
        self.actors.entry(id.clone()).or_insert(actor);
        self.actors.get(&id).expect("just inserted")
    }

    pub fn actor(&self, id: &str) -> Option<&ActorRef> {
        self.actors.get(id)
    }

    /// `notStarted` → `running`: computes actions for the already-synthesized
    /// initial state and stabilizes (§4.5 `start()`).
    pub async fn start(&mut self) -> State<C> {
        if self.status != Status::NotStarted {
            return self.state.clone();
        }
        self.status = Status::Running;
        let _span = debug_span!("start", id = %self.id).entered();
        let actions = self.state.actions.clone();
        self.execute(actions).await;
        self.reconcile_after_timers();
        self.drain_queues().await;
        self.notify();
        self.state.clone()
    }

    /// Enqueues `event` onto the external queue and, since this interpreter
    /// is single-threaded and cooperative (§5), immediately drains it to a
    /// fixed point (§4.5 "macrostep").
    pub async fn send(&mut self, event: impl Into<Event>) -> Result<State<C>, InterpreterError> {
        if self.status != Status::Running {
            return Err(InterpreterError::NotRunning {
                id: self.id.clone(),
                status: self.status.as_str(),
            });
        }
        let _ = self.external_tx.send(event.into());
        self.drain_queues().await;
        Ok(self.state.clone())
    }

    /// `running` → `stopped`: runs exit actions for the whole configuration,
    /// stops every owned actor and cancels every pending timer (§5
    /// "Cancellation").
    pub async fn stop(&mut self) {
        if self.status != Status::Running {
            self.status = Status::Stopped;
            return;
        }
        self.status = Status::Stopped;
        for actor in self.actors.values_mut() {
            actor.stop();
        }
        for handle in self.timers.values() {
            handle.abort();
        }
        self.timers.clear();
        for handles in self.after_timers.values() {
            for h in handles {
                h.abort();
            }
        }
        self.after_timers.clear();
    }

    /// Drains whatever is already buffered — used by `send`/`start`, which
    /// only need to stabilize the macrostep for the event the caller just
    /// handed in. Does not wait for events an asynchronous actor or timer
    /// hasn't pushed yet; see [`Interpreter::run`] for that.
    async fn drain_queues(&mut self) {
        while self.status == Status::Running {
            let (event, is_external) = match self.internal.pop_front() {
                Some(e) => (e, false),
                None => match self.external_rx.try_recv().ok() {
                    Some(e) => (e, true),
                    None => break,
                },
            };
            self.process_queued(event, is_external).await;
        }
    }

    /// Runs the interpreter's own event loop: blocks on the external queue
    /// between macrosteps instead of returning once it's empty. Spawn this
    /// in its own task for any interpreter that owns actors or `after`
    /// timers, since those push into the external queue from other tasks at
    /// arbitrary times — `send`/`start` alone only drain what is already
    /// buffered at the moment they're called. Returns once `stop()` is
    /// called (from an action, or by the owner of a clone of `handle()`) or
    /// the external channel closes.
    pub async fn run(&mut self) {
        loop {
            if self.status != Status::Running {
                return;
            }
            if let Some(event) = self.internal.pop_front() {
                self.process_queued(event, false).await;
                continue;
            }
            match self.external_rx.recv().await {
                Some(event) => self.process_queued(event, true).await,
                None => return,
            }
        }
    }

    async fn process_queued(&mut self, event: Event, is_external: bool) {
        let forward = if is_external { Some(event.clone()) } else { None };
        let scxml_event = if is_external {
            ScxmlEvent::external(event)
        } else {
            ScxmlEvent::internal(event)
        };
        self.microstep_loop(scxml_event).await;
        if let Some(event) = forward {
            self.forward_to_auto_forward_actors(event);
        }
        self.notify();
    }

    /// §4.6: "every external event received by the parent is also forwarded
    /// to this actor" — applied to every actor spawned with `autoForward`,
    /// after the parent has finished its own microstep for that event.
    fn forward_to_auto_forward_actors(&self, event: Event) {
        for actor in self.actors.values() {
            if actor.auto_forward {
                actor.send(event.clone());
            }
        }
    }

    /// Runs `transition` against `scxml_event`, executes its actions, then
    /// keeps re-running against the null event for eventless (`always`)
    /// follow-ups until neither the configuration nor the action list
    /// changes (§4.5 microstep loop).
    async fn microstep_loop(&mut self, mut scxml_event: ScxmlEvent) {
        loop {
            match statecraft_core::transition(&self.chart, &self.behavior, &self.state, scxml_event.clone()) {
                Ok(next) => {
                    trace!(id = %self.id, event = %next.event.event_type, changed = ?next.changed, "microstep");
                    self.state = next;
                }
                Err(err) => {
                    warn!(id = %self.id, error = %err, "guard/assign raised during transition");
                    self.internal.push_back(Event::new(statecraft_core::event::ERROR_EXECUTION_EVENT));
                    let err: InterpreterError = err.into();
                    for l in &self.error_listeners {
                        l(&err);
                    }
                    return;
                }
            }
            let actions = self.state.actions.clone();
            self.execute(actions).await;
            self.reconcile_after_timers();

            if !self.internal.is_empty() {
                let Some(e) = self.internal.pop_front() else { unreachable!() };
                scxml_event = ScxmlEvent::internal(e);
                continue;
            }

            let eventless = ScxmlEvent::internal(Event::new(NULL_EVENT));
            match statecraft_core::transition(&self.chart, &self.behavior, &self.state, eventless.clone()) {
                Ok(advanced) if advanced.changed == Some(true) => {
                    self.state = advanced;
                    let actions = self.state.actions.clone();
                    self.execute(actions).await;
                    self.reconcile_after_timers();
                    scxml_event = eventless;
                    continue;
                }
                _ => break,
            }
        }
    }

    fn notify(&self) {
        for l in &self.listeners {
            l(&self.state);
        }
    }

    // --- §4.4 Action Evaluator -------------------------------------------

    async fn execute(&mut self, actions: Vec<ActionDef>) {
        for action in actions {
            self.execute_one(action).await;
        }
    }

    async fn execute_one(&mut self, action: ActionDef) {
        let event = self.state.event.clone();
        match action {
            ActionDef::Assign { .. } => {
                // Already folded into context by the engine (§4.3 step 7).
            }
            ActionDef::Raise { event: name } => {
                self.internal.push_back(Event::new(name));
            }
            ActionDef::Send { event: name, to, delay_ms, id } => {
                self.dispatch_send(name, to.as_deref(), delay_ms, id);
            }
            ActionDef::SendParent { event: name, delay_ms, id } => {
                self.dispatch_send(name, Some("#_parent"), delay_ms, id);
            }
            ActionDef::Cancel { id } => {
                if let Some(handle) = self.timers.remove(&id) {
                    handle.abort();
                }
            }
            ActionDef::Log { label } => {
                tracing::info!(target: "statecraft::log", id = %self.id, label = ?label, event = %event.event_type, "log action");
            }
            ActionDef::Start { activity } | ActionDef::Stop { activity } => {
                // The chart model carries no declarative `invoke`; Start/Stop
                // dispatch through the same named registry as opaque actions
                // (see DESIGN.md) and it is the closure's job to call
                // `Interpreter::spawn`/`ActorRef::stop` if it wants a real
                // actor. Here we only invoke the named hook, if registered.
                self.invoke_named_action(&activity, &event);
            }
            ActionDef::Opaque { name } => {
                self.invoke_named_action(&name, &event);
            }
        }
    }

    /// Looks up `name` in the behavior registry and calls it, catching both a
    /// panic and an `Err` return and turning either into an `error.execution`
    /// internal event plus an `InterpreterError::ActionException` notified to
    /// every `on_error` listener, instead of unwinding the interpreter task.
    fn invoke_named_action(&mut self, name: &str, event: &Event) {
        let Some(f) = self.behavior.action(name) else {
            warn!(id = %self.id, action = %name, "no action registered under this name");
            return;
        };
        let context = &self.state.context;
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(context, event)));
        let reason = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(reason)) => reason,
            Err(payload) => panic_message(payload),
        };
        warn!(id = %self.id, action = %name, reason = %reason, "action raised");
        self.internal.push_back(Event::new(statecraft_core::event::ERROR_EXECUTION_EVENT));
        let err = InterpreterError::ActionException {
            action: name.to_string(),
            event: event.event_type.clone(),
            reason,
        };
        for l in &self.error_listeners {
            l(&err);
        }
    }

    fn dispatch_send(&mut self, name: String, to: Option<&str>, delay_ms: Option<u64>, id: Option<String>) {
        let target: mpsc::UnboundedSender<Event> = match to {
            None | Some("#_internal") => self.external_tx.clone(),
            Some("#_parent") => match &self.parent {
                Some(p) => p.clone(),
                None => {
                    warn!(id = %self.id, "sendParent with no parent interpreter");
                    return;
                }
            },
            Some(actor_id) => match self.actors.get(actor_id) {
                Some(actor) => {
                    match delay_ms {
                        Some(ms) => {
                            if let Some(sender) = actor.sender() {
                                self.schedule_delayed_send(sender, name, ms, id);
                            }
                        }
                        None => actor.send(Event::new(name)),
                    }
                    return;
                }
                None => {
                    warn!(id = %self.id, to = %actor_id, "send targets an unknown actor");
                    return;
                }
            },
        };
        match delay_ms {
            Some(ms) => self.schedule_delayed_send(target, name, ms, id),
            None => {
                let _ = target.send(Event::new(name));
            }
        }
    }

    fn schedule_delayed_send(&mut self, target: mpsc::UnboundedSender<Event>, name: String, delay_ms: u64, id: Option<String>) {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
            let _ = target.send(Event::new(name));
        });
        if let Some(id) = id {
            self.timers.insert(id, handle);
        }
    }

    // --- `after` transition scheduling (§4.5) -----------------------------

    fn reconcile_after_timers(&mut self) {
        let config = match configuration_from_value(&self.chart, &self.state.value) {
            Ok(c) => c,
            Err(_) => return,
        };
        let now_active: BTreeSet<NodeId> = config
            .into_iter()
            .filter(|&n| !self.chart.node(n).after.is_empty())
            .collect();

        let exited: Vec<NodeId> = self.active_after_nodes.difference(&now_active).copied().collect();
        for n in exited {
            if let Some(handles) = self.after_timers.remove(&n) {
                for h in handles {
                    h.abort();
                }
            }
        }

        let entered: Vec<NodeId> = now_active.difference(&self.active_after_nodes).copied().collect();
        for n in entered {
            let mut handles = Vec::new();
            for delayed in &self.chart.node(n).after {
                let Some(name) = delayed.transition.event.name() else { continue };
                let name = name.to_string();
                let tx = self.external_tx.clone();
                let delay_ms = delayed.delay_ms;
                handles.push(tokio::spawn(async move {
                    tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                    let _ = tx.send(Event::new(name));
                }));
            }
            self.after_timers.insert(n, handles);
        }

        self.active_after_nodes = now_active;
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "action panicked with a non-string payload".to_string()
    }
}

/// `xstate.update`, reserved for child-actor `sync` notifications (§4.6).
pub fn is_update_event(name: &str) -> bool {
    name == UPDATE_EVENT
}

/// Builds the synthesized event name an `after` transition matches on, for
/// callers that want to assert on it directly in tests.
pub fn after_event_name(delay_ms: u64, state_id: &str) -> String {
    after_event(delay_ms, state_id)
}
