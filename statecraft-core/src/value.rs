//! Representation & equality for hierarchical/parallel configurations.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::chart::{Chart, NodeId, StateNodeType};
use crate::error::TransitionError;

/// Either an atomic leaf of a compound state, or a map from region/child
/// name to its own `StateValue` (parallel or nested compound).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Atomic(String),
    Compound(BTreeMap<String, StateValue>),
}

impl StateValue {
    /// True iff every segment of `path` appears on the configuration branch
    /// in order, e.g. `"two.deep"` matches `{two: {deep: "foo"}}`.
    pub fn matches(&self, path: &str) -> bool {
        let mut segments = path.split('.');
        let Some(first) = segments.next() else {
            return true;
        };
        self.matches_segments(first, segments)
    }

    fn matches_segments<'a>(&self, head: &str, mut rest: impl Iterator<Item = &'a str>) -> bool {
        match self {
            StateValue::Atomic(key) => key == head && rest.next().is_none(),
            StateValue::Compound(map) => match map.get(head) {
                Some(sub) => match rest.next() {
                    Some(next_head) => sub.matches_segments(next_head, rest),
                    None => true,
                },
                None => false,
            },
        }
    }

    /// Depth-first enumeration of every ancestor path in the configuration,
    /// e.g. `{two: {deep: "foo"}}` -> `["two", "two.deep", "two.deep.foo"]`.
    pub fn to_strings(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_strings(None, &mut out);
        out
    }

    fn collect_strings(&self, prefix: Option<&str>, out: &mut Vec<String>) {
        match self {
            StateValue::Atomic(key) => {
                out.push(join(prefix, key));
            }
            StateValue::Compound(map) => {
                for (key, sub) in map {
                    let path = join(prefix, key);
                    out.push(path.clone());
                    sub.collect_strings(Some(&path), out);
                }
            }
        }
    }

    /// Structural recursive equality (§4.2). Equivalent to `==`, exposed for
    /// API fidelity with the source algorithm.
    pub fn equals(&self, other: &StateValue) -> bool {
        self == other
    }
}

fn join(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(p) => format!("{p}.{key}"),
        None => key.to_string(),
    }
}

/// Computes the value a node contributes when embedded under its parent
/// (or, for the root, the overall `State.value`). See the chart-walk
/// derivation in DESIGN.md for why this single recursive rule produces
/// exactly the shapes in §8's worked examples without double-wrapping.
pub fn value_at(chart: &Chart, node: NodeId, configuration: &BTreeSet<NodeId>) -> StateValue {
    let n = chart.node(node);
    match n.node_type {
        StateNodeType::Atomic | StateNodeType::Final | StateNodeType::History(_) => {
            StateValue::Atomic(n.key.clone())
        }
        StateNodeType::Compound => {
            let active = n
                .children
                .iter()
                .copied()
                .find(|c| configuration.contains(c))
                .expect("compound node in configuration must have exactly one active child");
            let child = chart.node(active);
            if child.node_type.is_atomic_like() {
                StateValue::Atomic(child.key.clone())
            } else {
                let mut map = BTreeMap::new();
                map.insert(child.key.clone(), value_at(chart, active, configuration));
                StateValue::Compound(map)
            }
        }
        StateNodeType::Parallel => {
            let map = n
                .children
                .iter()
                .map(|&region| (chart.node(region).key.clone(), value_at(chart, region, configuration)))
                .collect();
            StateValue::Compound(map)
        }
    }
}

/// Reconstructs the full configuration (every active node, including all
/// ancestors) implied by a `StateValue`. Used to rehydrate a `State` from
/// JSON (§6, §8 invariant 8) without re-running the chart from scratch.
pub fn configuration_from_value(
    chart: &Chart,
    value: &StateValue,
) -> Result<BTreeSet<NodeId>, TransitionError> {
    let mut set = BTreeSet::new();
    set.insert(chart.root);
    fill_configuration(chart, chart.root, value, &mut set)?;
    Ok(set)
}

pub(crate) fn fill_configuration(
    chart: &Chart,
    node: NodeId,
    value: &StateValue,
    set: &mut BTreeSet<NodeId>,
) -> Result<(), TransitionError> {
    let n = chart.node(node);
    match n.node_type {
        StateNodeType::Atomic | StateNodeType::Final | StateNodeType::History(_) => Ok(()),
        StateNodeType::Compound => {
            let (child_key, sub_value) = match value {
                StateValue::Atomic(k) => (k.as_str(), None),
                StateValue::Compound(map) => {
                    let (k, v) = map
                        .iter()
                        .next()
                        .ok_or_else(|| TransitionError::UnknownState(n.absolute_id.clone()))?;
                    (k.as_str(), Some(v))
                }
            };
            let child = chart
                .child_by_key(node, child_key)
                .ok_or_else(|| TransitionError::UnknownState(child_key.to_string()))?;
            set.insert(child);
            match sub_value {
                Some(sub) => fill_configuration(chart, child, sub, set),
                None => Ok(()),
            }
        }
        StateNodeType::Parallel => {
            let map = match value {
                StateValue::Compound(m) => m,
                StateValue::Atomic(_) => {
                    return Err(TransitionError::UnknownState(n.absolute_id.clone()));
                }
            };
            for &region in &n.children {
                let key = &chart.node(region).key;
                let sub = map
                    .get(key)
                    .ok_or_else(|| TransitionError::UnknownState(key.clone()))?;
                set.insert(region);
                fill_configuration(chart, region, sub, set)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_strings_atomic() {
        let v = StateValue::Atomic("one".into());
        assert_eq!(v.to_strings(), vec!["one".to_string()]);
    }

    #[test]
    fn to_strings_nested() {
        let mut deep = BTreeMap::new();
        deep.insert("deep".to_string(), StateValue::Atomic("foo".to_string()));
        let v = StateValue::Compound(deep);
        assert_eq!(
            v.to_strings(),
            vec!["deep".to_string(), "deep.foo".to_string()]
        );
    }

    #[test]
    fn matches_nested_path() {
        let mut inner = BTreeMap::new();
        inner.insert("deep".to_string(), StateValue::Atomic("foo".to_string()));
        let mut outer = BTreeMap::new();
        outer.insert("two".to_string(), StateValue::Compound(inner));
        let v = StateValue::Compound(outer);
        assert!(v.matches("two"));
        assert!(v.matches("two.deep"));
        assert!(v.matches("two.deep.foo"));
        assert!(!v.matches("two.deep.bar"));
        assert!(!v.matches("one"));
    }
}
