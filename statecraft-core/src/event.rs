//! Caller-facing events and the SCXML envelope that wraps them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A descriptor attached to a chart transition: a literal event name, the
/// wildcard `*`, or the empty descriptor used for eventless transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDescriptor {
    Named(String),
    Wildcard,
    Eventless,
}

impl EventDescriptor {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "" => EventDescriptor::Eventless,
            "*" => EventDescriptor::Wildcard,
            other => EventDescriptor::Named(other.to_string()),
        }
    }

    /// True iff this descriptor matches a concrete event name, per the
    /// precedence in §4.3 step 2: exact string, else wildcard, else eventless.
    pub fn matches(&self, name: &str) -> bool {
        match self {
            EventDescriptor::Named(n) => n == name,
            EventDescriptor::Wildcard => name != NULL_EVENT,
            EventDescriptor::Eventless => name == NULL_EVENT,
        }
    }

    pub fn is_eventless(&self) -> bool {
        matches!(self, EventDescriptor::Eventless)
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, EventDescriptor::Wildcard)
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            EventDescriptor::Named(n) => Some(n.as_str()),
            _ => None,
        }
    }
}

/// Sentinel name used internally for the null (eventless) event that drives
/// `always` transitions. Never observable by callers.
pub const NULL_EVENT: &str = "";

pub const INIT_EVENT: &str = "xstate.init";
pub const UPDATE_EVENT: &str = "xstate.update";
pub const ERROR_EXECUTION_EVENT: &str = "error.execution";
pub const ERROR_PLATFORM_EVENT: &str = "error.platform";

pub fn done_invoke_event(actor_id: &str) -> String {
    format!("done.invoke.{actor_id}")
}

pub fn done_state_event(state_id: &str) -> String {
    format!("done.state.{state_id}")
}

pub fn after_event(delay_ms: u64, state_id: &str) -> String {
    format!("xstate.after({delay_ms})#{state_id}")
}

/// The caller-facing event: `{type, ...payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Event {
            event_type: event_type.into(),
            data: Map::new(),
        }
    }

    pub fn with_data(event_type: impl Into<String>, data: Map<String, Value>) -> Self {
        Event {
            event_type: event_type.into(),
            data,
        }
    }

    pub fn null_event() -> Self {
        Event::new(NULL_EVENT)
    }

    pub fn is_null(&self) -> bool {
        self.event_type == NULL_EVENT
    }
}

impl From<&str> for Event {
    fn from(s: &str) -> Self {
        Event::new(s)
    }
}

impl From<String> for Event {
    fn from(s: String) -> Self {
        Event::new(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScxmlEventType {
    External,
    Internal,
    Platform,
}

/// The SCXML envelope carrying routing metadata alongside the user event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScxmlEvent {
    pub name: String,
    #[serde(rename = "type")]
    pub event_type: ScxmlEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sendid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origintype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invokeid: Option<String>,
    pub data: Event,
}

impl ScxmlEvent {
    pub fn external(event: Event) -> Self {
        ScxmlEvent {
            name: event.event_type.clone(),
            event_type: ScxmlEventType::External,
            sendid: None,
            origin: None,
            origintype: None,
            invokeid: None,
            data: event,
        }
    }

    pub fn internal(event: Event) -> Self {
        ScxmlEvent {
            name: event.event_type.clone(),
            event_type: ScxmlEventType::Internal,
            sendid: None,
            origin: None,
            origintype: None,
            invokeid: None,
            data: event,
        }
    }

    pub fn platform(event: Event) -> Self {
        ScxmlEvent {
            name: event.event_type.clone(),
            event_type: ScxmlEventType::Platform,
            sendid: None,
            origin: None,
            origintype: None,
            invokeid: None,
            data: event,
        }
    }

    pub fn init() -> Self {
        ScxmlEvent::platform(Event::new(INIT_EVENT))
    }

    /// Wrap a raw caller event, preserving a pre-built envelope supplied via
    /// `__scxml` (§6) when present.
    pub fn normalize(event: Event, preset: Option<ScxmlEvent>) -> Self {
        preset.unwrap_or_else(|| ScxmlEvent::external(event))
    }
}
