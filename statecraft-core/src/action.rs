//! Tagged action variants. Per the design notes (§9) built-in action kinds use
//! a single enum dispatched by the Action Evaluator rather than virtual
//! dispatch through opaque callables.

use serde::{Deserialize, Serialize};

/// A chart-level action declaration. Names reference entries in a
/// caller-supplied behavior registry (§10.3); there is no scripting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionDef {
    /// Folded into context by the engine itself (§4.3 step 7); never appears
    /// in the `actions` list returned to the caller.
    Assign { assigner: String },
    Raise { event: String },
    Send {
        event: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        delay_ms: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    SendParent {
        event: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        delay_ms: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Cancel { id: String },
    Log {
        #[serde(skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    Start { activity: String },
    Stop { activity: String },
    /// A user-provided action invoked with `(context, event)`.
    Opaque { name: String },
}

impl ActionDef {
    pub fn is_assign(&self) -> bool {
        matches!(self, ActionDef::Assign { .. })
    }
}
