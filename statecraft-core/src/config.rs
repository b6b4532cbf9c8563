//! Machine configuration (chart DSL, §6) and the pass that turns it into an
//! immutable [`Chart`].
//!
//! This is deliberately a plain data description: no fluent builder, no
//! procedural macro. Callers construct a [`MachineConfig`] with struct
//! literals or deserialize one (e.g. from JSON); guards and actions are
//! referenced by name and resolved later against a [`crate::behavior::Behavior`]
//! registry (§10.3).

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::action::ActionDef;
use crate::chart::{Chart, DelayedTransition, HistoryKind, StateNode, StateNodeType, Transition};
use crate::error::ChartError;
use crate::event::EventDescriptor;
use crate::resolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeTypeConfig {
    Atomic,
    Compound,
    Parallel,
    Final,
    History,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKindConfig {
    Shallow,
    Deep,
}

/// A single transition declaration (§3 "Transition", §6 shorthand shape).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionConfig {
    /// Target selectors, resolved via [`resolver::get_relative`]. Empty means
    /// targetless.
    #[serde(default)]
    pub target: Vec<String>,
    #[serde(default)]
    pub cond: Option<String>,
    #[serde(default)]
    pub actions: Vec<ActionDef>,
    #[serde(default)]
    pub internal: Option<bool>,
}

impl TransitionConfig {
    pub fn to(target: impl Into<String>) -> Self {
        TransitionConfig {
            target: vec![target.into()],
            ..Default::default()
        }
    }

    pub fn guarded(target: impl Into<String>, cond: impl Into<String>) -> Self {
        TransitionConfig {
            target: vec![target.into()],
            cond: Some(cond.into()),
            ..Default::default()
        }
    }

    pub fn with_actions(mut self, actions: Vec<ActionDef>) -> Self {
        self.actions = actions;
        self
    }

    pub fn internal(mut self, internal: bool) -> Self {
        self.internal = Some(internal);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateNodeConfig {
    #[serde(rename = "type", default)]
    pub node_type: Option<NodeTypeConfig>,
    #[serde(default)]
    pub initial: Option<String>,
    #[serde(default)]
    pub history: Option<HistoryKindConfig>,
    /// Document order matters here (§3, §4.1): children are entered/exited
    /// and tie-broken in the order they were declared, not alphabetically,
    /// so this is an order-preserving map rather than a `BTreeMap`.
    #[serde(default)]
    pub states: IndexMap<String, StateNodeConfig>,
    /// Same document-order requirement as `states` (§4.3 step 3, "document
    /// order wins" among same-depth candidates).
    #[serde(default)]
    pub on: IndexMap<String, Vec<TransitionConfig>>,
    #[serde(default)]
    pub always: Vec<TransitionConfig>,
    #[serde(default)]
    pub after: BTreeMap<u64, Vec<TransitionConfig>>,
    #[serde(default)]
    pub on_entry: Vec<ActionDef>,
    #[serde(default)]
    pub on_exit: Vec<ActionDef>,
}

/// The root of a chart: carries the machine id in addition to everything a
/// nested [`StateNodeConfig`] carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    pub id: String,
    #[serde(flatten)]
    pub root: StateNodeConfig,
}

struct RawTransition {
    node: usize,
    event: EventDescriptor,
    cond: Option<String>,
    target: Vec<String>,
    internal: Option<bool>,
    actions: Vec<ActionDef>,
    delay_ms: Option<u64>,
}

/// Builds an immutable [`Chart`] from a [`MachineConfig`], validating the
/// invariants in §3 and resolving every transition target and history
/// fallback to a concrete node id.
pub fn build_chart(config: &MachineConfig) -> Result<Chart, ChartError> {
    let mut nodes: Vec<StateNode> = Vec::new();
    let mut by_id = BTreeMap::new();
    let mut raw_transitions: Vec<RawTransition> = Vec::new();
    let mut raw_initial: Vec<(usize, String)> = Vec::new();
    let mut raw_history_fallback: Vec<(usize, String)> = Vec::new();

    let root_id = alloc_node(
        &mut nodes,
        &mut by_id,
        &config.root,
        "root",
        &config.id,
        None,
    )?;

    collect_transitions(&config.root, root_id, &config.id, &mut raw_transitions);
    build_children(
        &mut nodes,
        &mut by_id,
        &config.root,
        root_id,
        &config.id,
        &mut raw_transitions,
        &mut raw_initial,
        &mut raw_history_fallback,
    )?;

    let mut by_id_map: std::collections::HashMap<String, usize> = by_id.into_iter().collect();
    by_id_map.shrink_to_fit();

    let mut chart = Chart {
        nodes,
        by_id: by_id_map,
        root: root_id,
    };

    // Resolve each compound's `initial`: a key among its own direct children.
    for (node, selector) in raw_initial {
        let resolved = chart
            .child_by_key(node, &selector)
            .ok_or_else(|| ChartError::UnknownState(selector.clone()))?;
        chart.nodes[node].initial = Some(resolved);
    }
    // Resolve each history node's fallback target: a sibling within its own
    // parent compound, same resolution a transition target would get.
    for (node, selector) in raw_history_fallback {
        let resolved = resolver::get_relative(&chart, node, &selector)?;
        chart.nodes[node].initial = Some(resolved);
    }

    // Resolve transition targets now that every node id exists.
    for raw in raw_transitions {
        let mut targets = Vec::with_capacity(raw.target.len());
        for selector in &raw.target {
            targets.push(resolver::get_relative(&chart, raw.node, selector)?);
        }
        // A single transition naming two targets that fall under the same
        // `Compound` (OR) ancestor can never be entered deterministically:
        // that ancestor can only ever have one active child (§4.3, §7).
        // Targets that instead share a `Parallel` ancestor are fine — that's
        // exactly how a transition enters two AND-regions at once.
        for i in 0..targets.len() {
            for j in (i + 1)..targets.len() {
                let ancestor = chart.common_ancestor(targets[i], targets[j]);
                if chart.node(ancestor).node_type == StateNodeType::Compound {
                    return Err(ChartError::NonDeterministicEntry(
                        chart.node(ancestor).absolute_id.clone(),
                    ));
                }
            }
        }
        // A literal `.`/targetless selector always defaults to internal (it can
        // only ever mean "stay here"). A *named* target that happens to resolve
        // to the source itself (e.g. a sibling key equal to the source's own
        // key) is not the same authorial intent and defaults to external, so it
        // still re-runs onEntry/onExit (§8 scenario A).
        let literal_self_or_none =
            raw.target.is_empty() || raw.target.iter().all(|s| s.is_empty() || s == ".");
        let internal = raw.internal.unwrap_or_else(|| {
            literal_self_or_none
                || targets
                    .iter()
                    .all(|&t| chart.is_proper_descendant(t, raw.node))
        });
        let transition = Transition {
            source: raw.node,
            event: raw.event.clone(),
            cond: raw.cond,
            targets,
            internal,
            actions: raw.actions,
        };
        match raw.delay_ms {
            // Also registered under `.on` so the Transition Engine can select
            // it like any other named transition once the interpreter's timer
            // fires the synthesized `xstate.after(ms)#id` event (§4.5); `.after`
            // is kept alongside purely so the interpreter knows to schedule it.
            Some(delay_ms) => {
                chart.nodes[raw.node].on.push(transition.clone());
                chart.nodes[raw.node].after.push(DelayedTransition { delay_ms, transition });
            }
            None => chart.nodes[raw.node].on.push(transition),
        }
    }

    validate(&chart)?;
    Ok(chart)
}

#[allow(clippy::too_many_arguments)]
fn alloc_node(
    nodes: &mut Vec<StateNode>,
    by_id: &mut BTreeMap<String, usize>,
    cfg: &StateNodeConfig,
    key: &str,
    absolute_id: &str,
    parent: Option<usize>,
) -> Result<usize, ChartError> {
    let node_type = infer_node_type(cfg, absolute_id)?;
    let id = nodes.len();
    nodes.push(StateNode {
        id,
        key: key.to_string(),
        absolute_id: absolute_id.to_string(),
        node_type,
        parent,
        children: Vec::new(),
        initial: None,
        history_kind: match cfg.history {
            Some(HistoryKindConfig::Deep) => Some(HistoryKind::Deep),
            Some(HistoryKindConfig::Shallow) | None => {
                if node_type == StateNodeType::History(HistoryKind::Shallow) {
                    Some(HistoryKind::Shallow)
                } else {
                    None
                }
            }
        },
        on: Vec::new(),
        after: Vec::new(),
        on_entry: cfg.on_entry.clone(),
        on_exit: cfg.on_exit.clone(),
    });
    by_id.insert(absolute_id.to_string(), id);
    Ok(id)
}

fn infer_node_type(cfg: &StateNodeConfig, absolute_id: &str) -> Result<StateNodeType, ChartError> {
    match cfg.node_type {
        Some(NodeTypeConfig::Atomic) => Ok(StateNodeType::Atomic),
        Some(NodeTypeConfig::Final) => Ok(StateNodeType::Final),
        Some(NodeTypeConfig::History) => {
            let kind = match cfg.history {
                Some(HistoryKindConfig::Deep) => HistoryKind::Deep,
                _ => HistoryKind::Shallow,
            };
            Ok(StateNodeType::History(kind))
        }
        Some(NodeTypeConfig::Parallel) => {
            if cfg.states.len() < 2 {
                return Err(ChartError::InvalidParallel(absolute_id.to_string()));
            }
            Ok(StateNodeType::Parallel)
        }
        Some(NodeTypeConfig::Compound) => {
            if cfg.states.is_empty() {
                return Err(ChartError::InvalidCompound(absolute_id.to_string()));
            }
            Ok(StateNodeType::Compound)
        }
        None => {
            if cfg.states.is_empty() {
                Ok(StateNodeType::Atomic)
            } else {
                Ok(StateNodeType::Compound)
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn build_children(
    nodes: &mut Vec<StateNode>,
    by_id: &mut BTreeMap<String, usize>,
    cfg: &StateNodeConfig,
    node_id: usize,
    absolute_id: &str,
    raw_transitions: &mut Vec<RawTransition>,
    raw_initial: &mut Vec<(usize, String)>,
    raw_history_fallback: &mut Vec<(usize, String)>,
) -> Result<(), ChartError> {
    let node_type = nodes[node_id].node_type;
    if matches!(node_type, StateNodeType::Atomic | StateNodeType::Final) && !cfg.states.is_empty()
    {
        return Err(ChartError::InvalidAtomic(absolute_id.to_string()));
    }

    let mut child_ids = Vec::with_capacity(cfg.states.len());
    for (key, child_cfg) in &cfg.states {
        let child_absolute = format!("{absolute_id}.{key}");
        let child_id = alloc_node(nodes, by_id, child_cfg, key, &child_absolute, Some(node_id))?;
        child_ids.push(child_id);
        collect_transitions(child_cfg, child_id, &child_absolute, raw_transitions);
        build_children(
            nodes,
            by_id,
            child_cfg,
            child_id,
            &child_absolute,
            raw_transitions,
            raw_initial,
            raw_history_fallback,
        )?;
    }
    nodes[node_id].children = child_ids;

    match node_type {
        StateNodeType::Compound => {
            let selector = cfg
                .initial
                .clone()
                .or_else(|| cfg.states.keys().next().cloned())
                .ok_or_else(|| ChartError::InvalidCompound(absolute_id.to_string()))?;
            raw_initial.push((node_id, selector));
        }
        StateNodeType::History(_) => {
            if let Some(selector) = &cfg.initial {
                raw_history_fallback.push((node_id, selector.clone()));
            }
        }
        _ => {}
    }

    Ok(())
}

fn collect_transitions(
    cfg: &StateNodeConfig,
    node_id: usize,
    absolute_id: &str,
    out: &mut Vec<RawTransition>,
) {
    for (event_name, transitions) in &cfg.on {
        for t in transitions {
            out.push(RawTransition {
                node: node_id,
                event: EventDescriptor::parse(event_name),
                cond: t.cond.clone(),
                target: t.target.clone(),
                internal: t.internal,
                actions: t.actions.clone(),
                delay_ms: None,
            });
        }
    }
    for t in &cfg.always {
        out.push(RawTransition {
            node: node_id,
            event: EventDescriptor::Eventless,
            cond: t.cond.clone(),
            target: t.target.clone(),
            internal: t.internal,
            actions: t.actions.clone(),
            delay_ms: None,
        });
    }
    for (delay_ms, transitions) in &cfg.after {
        for t in transitions {
            out.push(RawTransition {
                node: node_id,
                event: EventDescriptor::Named(crate::event::after_event(*delay_ms, absolute_id)),
                cond: t.cond.clone(),
                target: t.target.clone(),
                internal: t.internal,
                actions: t.actions.clone(),
                delay_ms: Some(*delay_ms),
            });
        }
    }
}

fn validate(chart: &Chart) -> Result<(), ChartError> {
    for node in &chart.nodes {
        match node.node_type {
            StateNodeType::Compound => {
                if node.children.is_empty() || node.initial.is_none() {
                    return Err(ChartError::InvalidCompound(node.absolute_id.clone()));
                }
                if let Some(initial) = node.initial {
                    if !node.children.contains(&initial) {
                        return Err(ChartError::InvalidCompound(node.absolute_id.clone()));
                    }
                }
            }
            StateNodeType::Parallel => {
                if node.children.len() < 2 {
                    return Err(ChartError::InvalidParallel(node.absolute_id.clone()));
                }
            }
            StateNodeType::Atomic | StateNodeType::Final => {
                if !node.children.is_empty() {
                    return Err(ChartError::InvalidAtomic(node.absolute_id.clone()));
                }
            }
            StateNodeType::History(_) => {}
        }
    }
    detect_initial_cycles(chart)
}

fn detect_initial_cycles(chart: &Chart) -> Result<(), ChartError> {
    for node in &chart.nodes {
        if node.node_type != StateNodeType::Compound {
            continue;
        }
        let mut seen = std::collections::HashSet::new();
        let mut cur = node.id;
        loop {
            if !seen.insert(cur) {
                return Err(ChartError::InitialCycle(node.absolute_id.clone()));
            }
            match chart.nodes[cur].node_type {
                StateNodeType::Compound => {
                    cur = chart.nodes[cur]
                        .initial
                        .expect("validated compound has initial");
                }
                _ => break,
            }
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Builds the chart used throughout §8's worked examples: `one` /
    /// `two.deep.{foo,bar}` / `three` (parallel, `first`/`second` regions).
    pub(crate) fn linear_chart() -> Chart {
        let mut deep_states = IndexMap::new();
        deep_states.insert("foo".to_string(), StateNodeConfig::default());
        deep_states.insert("bar".to_string(), StateNodeConfig::default());
        let deep = StateNodeConfig {
            initial: Some("foo".to_string()),
            states: deep_states,
            on: IndexMap::from([
                (
                    "DEEP_EVENT".to_string(),
                    vec![TransitionConfig::to(".")],
                ),
            ]),
            ..Default::default()
        };
        let mut two_states = IndexMap::new();
        two_states.insert("deep".to_string(), deep);
        let two = StateNodeConfig {
            initial: Some("deep".to_string()),
            states: two_states,
            on: IndexMap::from([(
                "FOO_EVENT".to_string(),
                vec![TransitionConfig::to(".")],
            )]),
            ..Default::default()
        };

        let mut first_states = IndexMap::new();
        first_states.insert("p31".to_string(), StateNodeConfig::default());
        first_states.insert("p32".to_string(), StateNodeConfig::default());
        let first = StateNodeConfig {
            initial: Some("p31".to_string()),
            states: first_states,
            on: IndexMap::from([("P31".to_string(), vec![TransitionConfig::to("p32")])]),
            ..Default::default()
        };
        let mut second_states = IndexMap::new();
        second_states.insert("p41".to_string(), StateNodeConfig::default());
        second_states.insert("p42".to_string(), StateNodeConfig::default());
        let second = StateNodeConfig {
            initial: Some("p41".to_string()),
            states: second_states,
            on: IndexMap::from([("P32".to_string(), vec![TransitionConfig::to("p42")])]),
            ..Default::default()
        };
        let mut three_states = IndexMap::new();
        three_states.insert("first".to_string(), first);
        three_states.insert("second".to_string(), second);
        let three = StateNodeConfig {
            node_type: Some(NodeTypeConfig::Parallel),
            states: three_states,
            on: IndexMap::from([(
                "THREE_EVENT".to_string(),
                vec![TransitionConfig::to(".")],
            )]),
            ..Default::default()
        };

        let mut one = StateNodeConfig {
            on_entry: vec![ActionDef::Opaque {
                name: "enteredOne".to_string(),
            }],
            ..Default::default()
        };
        one.on.insert(
            "EXTERNAL".to_string(),
            vec![TransitionConfig::to("one")],
        );
        one.on.insert(
            "INTERNAL".to_string(),
            vec![TransitionConfig {
                target: vec![],
                actions: vec![ActionDef::Opaque {
                    name: "doSomething".to_string(),
                }],
                ..Default::default()
            }],
        );
        one.on
            .insert("INERT".to_string(), vec![TransitionConfig::default()]);
        one.on.insert(
            "TO_TWO".to_string(),
            vec![TransitionConfig::to("two")],
        );
        one.on.insert(
            "TO_THREE".to_string(),
            vec![TransitionConfig::to("three")],
        );

        let mut root_states = IndexMap::new();
        root_states.insert("one".to_string(), one);
        root_states.insert("two".to_string(), two);
        root_states.insert("three".to_string(), three);

        let config = MachineConfig {
            id: "machine".to_string(),
            root: StateNodeConfig {
                initial: Some("one".to_string()),
                states: root_states,
                on: IndexMap::from([(
                    "MACHINE_EVENT".to_string(),
                    vec![TransitionConfig::default()],
                )]),
                ..Default::default()
            },
        };

        build_chart(&config).expect("test chart is valid")
    }
}
