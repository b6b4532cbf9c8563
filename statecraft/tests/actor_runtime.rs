//! Black-box replay of the §8 actor scenarios (G, H) against the public
//! `Interpreter`/`ActorSource` surface. Both scenarios are actor-driven:
//! the event that completes them arrives on the parent's external queue
//! from another tokio task, so the parent has to be driven by its own
//! `run()` loop rather than a single `send()` call.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;

use statecraft_core::action::ActionDef;
use statecraft_core::chart::Chart;
use statecraft_core::config::{MachineConfig, NodeTypeConfig, StateNodeConfig, TransitionConfig};
use statecraft_core::event::done_invoke_event;
use statecraft_core::{Behavior, Event, State, StateValue};

use statecraft::actor::{ActorSource, MachineOptions};
use statecraft::Interpreter;

#[derive(Debug, Clone, Default)]
struct ParentCtx {
    pongs: u32,
}

fn child_chart() -> Arc<Chart> {
    let mut root = StateNodeConfig::default();
    root.on.insert(
        "PING".to_string(),
        vec![TransitionConfig {
            target: vec![],
            actions: vec![ActionDef::SendParent {
                event: "PONG".to_string(),
                delay_ms: None,
                id: None,
            }],
            ..Default::default()
        }],
    );
    let config = MachineConfig {
        id: "child".to_string(),
        root,
    };
    Arc::new(statecraft_core::config::build_chart(&config).expect("valid child config"))
}

fn parent_chart() -> Arc<Chart> {
    let mut root = StateNodeConfig::default();
    root.on.insert(
        "PONG".to_string(),
        vec![TransitionConfig {
            target: vec![],
            actions: vec![ActionDef::Assign {
                assigner: "count_pong".to_string(),
            }],
            ..Default::default()
        }],
    );
    let config = MachineConfig {
        id: "parent".to_string(),
        root,
    };
    Arc::new(statecraft_core::config::build_chart(&config).expect("valid parent config"))
}

/// Blocks until a `ParentCtx` with `pongs >= want` arrives on `rx`, or panics
/// after a second — the parent/child round trip is all local tokio tasks, so
/// a real hang means a wiring bug, not slowness.
async fn recv_until(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ParentCtx>, want: u32) -> ParentCtx {
    loop {
        let ctx = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("parent produced a state update before timing out")
            .expect("parent listener channel closed unexpectedly");
        if ctx.pongs >= want {
            return ctx;
        }
    }
}

// §8 scenario G: a spawned Machine actor with `autoForward: true` receives
// every external event the parent does; here it replies PONG to each PING,
// and the parent's own `PONG` handler counts them.
#[tokio::test]
async fn scenario_g_auto_forward_ping_pong_increments_parent_counter() {
    let behavior = Arc::new(
        Behavior::<ParentCtx>::new()
            .with_assigner("count_pong", |ctx: &ParentCtx, _event: &Event| ParentCtx { pongs: ctx.pongs + 1 }),
    );
    let mut parent = Interpreter::new("parent", parent_chart(), behavior, ParentCtx::default());

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    parent.subscribe(move |state: &State<ParentCtx>| {
        let _ = tx.send(state.context.clone());
    });

    parent.start().await;
    parent.spawn(
        "child",
        ActorSource::Machine {
            chart: child_chart(),
            behavior: Arc::new(Behavior::<()>::new()),
            context: (),
            options: MachineOptions {
                sync: false,
                auto_forward: true,
            },
        },
    );

    let handle = parent.handle();
    tokio::spawn(async move {
        parent.run().await;
    });

    let _ = handle.send(Event::new("PING"));
    assert_eq!(recv_until(&mut rx, 1).await.pongs, 1);

    let _ = handle.send(Event::new("PING"));
    assert_eq!(recv_until(&mut rx, 2).await.pongs, 2);
}

fn promise_parent_chart() -> Arc<Chart> {
    let mut pending = StateNodeConfig::default();
    pending.on.insert(
        done_invoke_event("my-promise"),
        vec![TransitionConfig::to("success")],
    );
    let success = StateNodeConfig {
        node_type: Some(NodeTypeConfig::Final),
        ..Default::default()
    };

    let mut states = IndexMap::new();
    states.insert("pending".to_string(), pending);
    states.insert("success".to_string(), success);

    let config = MachineConfig {
        id: "promise_parent".to_string(),
        root: StateNodeConfig {
            initial: Some("pending".to_string()),
            states,
            ..Default::default()
        },
    };
    Arc::new(statecraft_core::config::build_chart(&config).expect("valid promise parent config"))
}

// §8 scenario H: a Promise actor resolving to `"response"` raises
// `done.invoke.my-promise` against the parent, which is wired to a
// transition into the final state.
#[tokio::test]
async fn scenario_h_promise_resolution_routes_to_final() {
    let behavior = Arc::new(Behavior::<()>::new());
    let mut parent = Interpreter::new("promise-parent", promise_parent_chart(), behavior, ());

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    parent.subscribe(move |state: &State<()>| {
        let _ = tx.send(state.value.clone());
    });

    parent.start().await;
    parent.spawn(
        "my-promise",
        ActorSource::<()>::Promise(Box::pin(async {
            Ok::<Value, Value>(Value::String("response".to_string()))
        })),
    );

    tokio::spawn(async move {
        parent.run().await;
    });

    loop {
        let value: StateValue = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("parent produced a state update before timing out")
            .expect("parent listener channel closed unexpectedly");
        if value.matches("success") {
            break;
        }
    }
}
