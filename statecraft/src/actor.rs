//! Actor runtime (§4.6): `spawn` wires a machine, promise, callback or
//! observable source to the owning interpreter's external queue.
//!
//! Every actor reaches the parent the same way: an `mpsc::UnboundedSender`
//! the parent handed out via [`crate::interpreter::Interpreter::handle`].
//! This is why [`ActorRef`] itself carries no context type parameter even
//! though a spawned machine actor's own `Interpreter<ChildC>` may have a
//! completely different context from its parent.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::Stream;
use futures::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{trace, warn};

use statecraft_core::event::{done_invoke_event, ERROR_EXECUTION_EVENT};
use statecraft_core::{Behavior, Chart, Event};

use crate::interpreter::Interpreter;

/// The channel an actor uses to deliver events to its parent.
pub type ParentSink = mpsc::UnboundedSender<Event>;

/// Configuration for a `Machine` actor (§4.6).
#[derive(Debug, Clone, Copy, Default)]
pub struct MachineOptions {
    /// Child emits `xstate.update` to the parent after every one of its own
    /// macrosteps, so the parent re-runs its macrostep loop in lockstep.
    pub sync: bool,
    /// Every external event the parent receives is also forwarded to this
    /// actor, after the parent has finished processing it.
    pub auto_forward: bool,
}

/// A source an actor is spawned from.
pub enum ActorSource<ChildC> {
    Machine {
        chart: Arc<Chart>,
        behavior: Arc<Behavior<ChildC>>,
        context: ChildC,
        options: MachineOptions,
    },
    Promise(Pin<Box<dyn Future<Output = Result<Value, Value>> + Send>>),
    Callback(Box<dyn FnOnce(ParentSink, mpsc::UnboundedReceiver<Event>) + Send>),
    Observable(Pin<Box<dyn Stream<Item = Event> + Send>>),
}

/// A live handle to a spawned actor (§4.6 "Lifecycle").
///
/// Dropping an `ActorRef` does not stop the actor — call [`ActorRef::stop`]
/// explicitly, which is what the owning interpreter does when the state that
/// spawned it is exited.
pub struct ActorRef {
    pub id: String,
    to_actor: Option<mpsc::UnboundedSender<Event>>,
    task: Option<tokio::task::JoinHandle<()>>,
    pub auto_forward: bool,
    stopped: Arc<AtomicBool>,
    null: bool,
}

impl ActorRef {
    /// A stub actor for use outside a live interpreter (§4.6, §9 "Null
    /// actor"): `send` is a callable no-op, and there is no task to stop.
    pub fn null(id: impl Into<String>) -> Self {
        ActorRef {
            id: id.into(),
            to_actor: None,
            task: None,
            auto_forward: false,
            stopped: Arc::new(AtomicBool::new(true)),
            null: true,
        }
    }

    /// True only for the stub returned by [`ActorRef::null`] — a regular
    /// actor that has since stopped is not null, it's dead (§9 distinguishes
    /// the two: a null actor never existed, a stopped one did).
    pub fn is_null(&self) -> bool {
        self.null
    }

    /// A clone of the channel this actor listens on, for callers that need
    /// to schedule a delayed send against it (capturing a live sender is
    /// simpler than re-resolving the actor by id after an `await` point).
    /// `None` once stopped, or for actors (promise/observable) that never
    /// listen for inbound events.
    pub fn sender(&self) -> Option<mpsc::UnboundedSender<Event>> {
        if self.stopped.load(Ordering::SeqCst) {
            return None;
        }
        self.to_actor.clone()
    }

    /// Delivers `event` to the actor. A no-op once the actor has stopped, or
    /// on the null actor, matching §9's referential-safety requirement.
    pub fn send(&self, event: impl Into<Event>) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = &self.to_actor {
            let _ = tx.send(event.into());
        }
    }

    /// Stops the actor (§4.6 "Lifecycle" (a)/(b)): aborts its task and makes
    /// further `send`s silent no-ops rather than panicking or erroring.
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.to_actor = None;
    }
}

/// Spawns `source` as a child of `parent_sink`, returning its [`ActorRef`].
pub fn spawn<ChildC>(id: impl Into<String>, source: ActorSource<ChildC>, parent_sink: ParentSink) -> ActorRef
where
    ChildC: Clone + Send + Sync + 'static,
{
    let id = id.into();
    let stopped = Arc::new(AtomicBool::new(false));
    match source {
        ActorSource::Machine { chart, behavior, context, options } => {
            spawn_machine(id, chart, behavior, context, options, parent_sink, stopped)
        }
        ActorSource::Promise(fut) => spawn_promise(id, fut, parent_sink, stopped),
        ActorSource::Callback(f) => spawn_callback(id, f, parent_sink, stopped),
        ActorSource::Observable(stream) => spawn_observable(id, stream, parent_sink, stopped),
    }
}

fn spawn_machine<ChildC>(
    id: String,
    chart: Arc<Chart>,
    behavior: Arc<Behavior<ChildC>>,
    context: ChildC,
    options: MachineOptions,
    parent_sink: ParentSink,
    stopped: Arc<AtomicBool>,
) -> ActorRef
where
    ChildC: Clone + Send + Sync + 'static,
{
    let (to_actor_tx, mut to_actor_rx) = mpsc::unbounded_channel::<Event>();
    let auto_forward = options.auto_forward;
    let sync = options.sync;
    let child_id = id.clone();
    let task = tokio::spawn(async move {
        let mut child = Interpreter::new(child_id.clone(), chart, behavior, context)
            .with_parent(parent_sink.clone());
        child.start().await;
        if sync {
            let _ = parent_sink.send(Event::new(statecraft_core::event::UPDATE_EVENT));
        }
        while let Some(event) = to_actor_rx.recv().await {
            let _ = child.send(event).await;
            if sync {
                let _ = parent_sink.send(Event::new(statecraft_core::event::UPDATE_EVENT));
            }
        }
        trace!(actor = %child_id, "machine actor channel closed");
    });
    ActorRef { id, to_actor: Some(to_actor_tx), task: Some(task), auto_forward, stopped, null: false }
}

fn value_to_data(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(map) => map,
        other => {
            let mut m = Map::new();
            m.insert("value".to_string(), other);
            m
        }
    }
}

fn spawn_promise(
    id: String,
    fut: Pin<Box<dyn Future<Output = Result<Value, Value>> + Send>>,
    parent_sink: ParentSink,
    stopped: Arc<AtomicBool>,
) -> ActorRef {
    let promise_id = id.clone();
    let task = tokio::spawn(async move {
        match fut.await {
            Ok(value) => {
                let _ = parent_sink.send(Event::with_data(done_invoke_event(&promise_id), value_to_data(value)));
            }
            Err(err) => {
                warn!(actor = %promise_id, "promise actor rejected");
                let _ = parent_sink.send(Event::with_data(ERROR_EXECUTION_EVENT, value_to_data(err)));
            }
        }
    });
    ActorRef { id, to_actor: None, task: Some(task), auto_forward: false, stopped, null: false }
}

fn spawn_callback(
    id: String,
    f: Box<dyn FnOnce(ParentSink, mpsc::UnboundedReceiver<Event>) + Send>,
    parent_sink: ParentSink,
    stopped: Arc<AtomicBool>,
) -> ActorRef {
    let (to_actor_tx, to_actor_rx) = mpsc::unbounded_channel::<Event>();
    let task = tokio::spawn(async move {
        f(parent_sink, to_actor_rx);
    });
    ActorRef { id, to_actor: Some(to_actor_tx), task: Some(task), auto_forward: false, stopped, null: false }
}

fn spawn_observable(
    id: String,
    mut stream: Pin<Box<dyn Stream<Item = Event> + Send>>,
    parent_sink: ParentSink,
    stopped: Arc<AtomicBool>,
) -> ActorRef {
    let obs_id = id.clone();
    let task = tokio::spawn(async move {
        while let Some(event) = stream.next().await {
            if parent_sink.send(event).is_err() {
                break;
            }
        }
        trace!(actor = %obs_id, "observable actor completed");
    });
    ActorRef { id, to_actor: None, task: Some(task), auto_forward: false, stopped, null: false }
}
