//! Immutable in-memory chart: state nodes, transitions, guards, action lists.
//!
//! A [`Chart`] is built once (see [`crate::config`]) and never mutated afterwards.
//! Nodes live in a flat arena so that ancestor walks and LCCA computation are
//! simple index operations instead of pointer chasing through `Rc<RefCell<_>>`.

use std::collections::HashMap;

use crate::action::ActionDef;
use crate::error::ChartError;
use crate::event::EventDescriptor;

/// Index into [`Chart::nodes`]. Stable for the lifetime of the chart.
pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    Shallow,
    Deep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateNodeType {
    Atomic,
    Compound,
    Parallel,
    Final,
    History(HistoryKind),
}

impl StateNodeType {
    pub fn is_atomic_like(self) -> bool {
        matches!(self, StateNodeType::Atomic | StateNodeType::Final)
    }
}

/// A transition owned by a source [`StateNode`].
#[derive(Debug, Clone)]
pub struct Transition {
    pub source: NodeId,
    pub event: EventDescriptor,
    /// Name of a guard resolved against a `Behavior` registry at run time.
    pub cond: Option<String>,
    /// Resolved absolute targets, in document order. Empty means targetless.
    pub targets: Vec<NodeId>,
    pub internal: bool,
    pub actions: Vec<ActionDef>,
}

impl Transition {
    /// A targetless transition with no actions is a pure no-op and is
    /// discarded during selection (§4.3 step 3).
    pub fn is_noop(&self) -> bool {
        self.targets.is_empty() && self.actions.is_empty()
    }
}

/// A delayed transition scheduled via `after`. Stored separately from `on`
/// because its event name is synthesized (`xstate.after(<ms>)#<id>`) and it
/// additionally carries a delay understood by the interpreter's timers.
#[derive(Debug, Clone)]
pub struct DelayedTransition {
    pub delay_ms: u64,
    pub transition: Transition,
}

#[derive(Debug, Clone)]
pub struct StateNode {
    pub id: NodeId,
    pub key: String,
    pub absolute_id: String,
    pub node_type: StateNodeType,
    pub parent: Option<NodeId>,
    /// Children in document order. Empty for atomic/final/history nodes.
    pub children: Vec<NodeId>,
    /// Default child for compound nodes; fallback target for history nodes.
    pub initial: Option<NodeId>,
    /// Deep-history fallback target if no history has been recorded yet.
    pub history_kind: Option<HistoryKind>,
    pub on: Vec<Transition>,
    pub after: Vec<DelayedTransition>,
    pub on_entry: Vec<ActionDef>,
    pub on_exit: Vec<ActionDef>,
}

impl StateNode {
    pub fn transitions_for(&self, descriptor: &str) -> impl Iterator<Item = &Transition> {
        self.on.iter().filter(move |t| t.event.matches(descriptor))
    }
}

/// The parsed, validated, immutable chart.
#[derive(Debug, Clone)]
pub struct Chart {
    pub nodes: Vec<StateNode>,
    pub by_id: HashMap<String, NodeId>,
    pub root: NodeId,
}

impl Chart {
    pub fn node(&self, id: NodeId) -> &StateNode {
        &self.nodes[id]
    }

    pub fn get_by_id(&self, absolute_id: &str) -> Result<NodeId, ChartError> {
        self.by_id
            .get(absolute_id)
            .copied()
            .ok_or_else(|| ChartError::UnknownState(absolute_id.to_string()))
    }

    pub fn child_by_key(&self, node: NodeId, key: &str) -> Option<NodeId> {
        self.nodes[node]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].key == key)
    }

    /// Ancestor chain from `node` up to and including the root.
    pub fn ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = Some(node);
        while let Some(n) = cur {
            out.push(n);
            cur = self.nodes[n].parent;
        }
        out
    }

    /// Proper ancestors of `node`, excluding itself.
    pub fn proper_ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = self.ancestors(node);
        out.remove(0);
        out
    }

    pub fn depth(&self, node: NodeId) -> usize {
        self.proper_ancestors(node).len()
    }

    pub fn is_descendant_or_self(&self, node: NodeId, ancestor: NodeId) -> bool {
        self.ancestors(node).contains(&ancestor)
    }

    pub fn is_proper_descendant(&self, node: NodeId, ancestor: NodeId) -> bool {
        node != ancestor && self.is_descendant_or_self(node, ancestor)
    }

    /// True iff every target is either `source` itself (a self-transition) or
    /// one of its proper descendants. Transitions whose targets satisfy this
    /// default to `internal: true` (§4.3 step 4): they never escape `source`,
    /// so `source` itself is never exited or re-entered.
    pub fn targets_contained_in(&self, source: NodeId, targets: &[NodeId]) -> bool {
        targets
            .iter()
            .all(|&t| t == source || self.is_proper_descendant(t, source))
    }

    /// Least common compound ancestor: the lowest non-parallel ancestor that
    /// contains every node in `nodes`. Falls back to the root, which must
    /// always be a compound node by construction.
    pub fn lcca(&self, nodes: &[NodeId]) -> NodeId {
        assert!(!nodes.is_empty());
        let chains: Vec<Vec<NodeId>> = nodes.iter().map(|&n| self.ancestors(n)).collect();
        for &candidate in &chains[0] {
            if self.nodes[candidate].node_type != StateNodeType::Compound {
                continue;
            }
            if chains.iter().all(|chain| chain.contains(&candidate)) {
                return candidate;
            }
        }
        self.root
    }

    /// Plain lowest common ancestor of two nodes, regardless of type. Unlike
    /// [`Chart::lcca`] this does not skip parallel nodes, so it can be used to
    /// tell whether two targets fall under the same OR-branch (a `Compound`
    /// ancestor, where only one child may ever be active) rather than under
    /// sibling AND-regions of a `Parallel` ancestor.
    pub fn common_ancestor(&self, a: NodeId, b: NodeId) -> NodeId {
        let chain_b = self.ancestors(b);
        self.ancestors(a)
            .into_iter()
            .find(|n| chain_b.contains(n))
            .expect("root is a common ancestor of every node")
    }
}
