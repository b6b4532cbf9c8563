//! The immutable result of a transition (§3 "State").

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::action::ActionDef;
use crate::chart::NodeId;
use crate::event::{Event, ScxmlEvent};
use crate::value::StateValue;

/// Per-history-node record of the atomic descendants that were active the
/// last time that history node's parent was exited (§9 "History").
pub type HistoryValue = BTreeMap<NodeId, StateValue>;

/// A serializable stand-in for a live actor reference. The interpreter crate
/// keeps the real `ActorRef` handles out of band, alongside the `State`,
/// because closures and channels are not `Serialize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSnapshot {
    pub id: String,
}

pub type Children = BTreeMap<String, ChildSnapshot>;

/// Produced by the Transition Engine; never mutated. The next `State` may
/// reference a previous one's value through `history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: Serialize", deserialize = "C: DeserializeOwned"))]
pub struct State<C> {
    pub value: StateValue,
    pub context: C,
    pub event: Event,
    #[serde(rename = "_event")]
    pub scxml_event: ScxmlEvent,
    pub actions: Vec<ActionDef>,
    #[serde(default)]
    pub children: Children,
    /// `None` for the synthetic initial state, `Some(_)` afterwards (§8
    /// invariant 4).
    pub changed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Box<StateValue>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub history_value: HistoryValue,
    pub next_events: Vec<String>,
}

impl<C: Clone> State<C> {
    /// Fabricates an inert `State` carrying only `value` and `context`
    /// (§6 `State.from`).
    pub fn from_value(value: StateValue, context: C) -> Self {
        State {
            value,
            context,
            event: Event::null_event(),
            scxml_event: ScxmlEvent::internal(Event::null_event()),
            actions: Vec::new(),
            children: Children::new(),
            changed: None,
            history: None,
            history_value: HistoryValue::new(),
            next_events: Vec::new(),
        }
    }

    /// Returns a `State` with an empty action list, preserving identity
    /// (by value) when the input already has none (§6 `State.inert`).
    pub fn inert(&self) -> State<C> {
        if self.actions.is_empty() {
            self.clone()
        } else {
            State {
                value: self.value.clone(),
                context: self.context.clone(),
                event: self.event.clone(),
                scxml_event: self.scxml_event.clone(),
                actions: Vec::new(),
                children: self.children.clone(),
                changed: self.changed,
                history: self.history.clone(),
                history_value: self.history_value.clone(),
                next_events: self.next_events.clone(),
            }
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        self.value.matches(path)
    }
}

impl<C: Serialize + DeserializeOwned + Clone> State<C> {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("State serialization is infallible for valid C")
    }

    /// Rehydrates a `State` from its JSON shape (§6 `State.create`); the
    /// result is usable as the `from` argument of the next `transition` call
    /// (§8 invariant 8).
    pub fn from_json(json: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(json)
    }
}
