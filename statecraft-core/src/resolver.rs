//! Resolves relative/absolute state identifiers against the chart (§4.1).

use crate::chart::{Chart, NodeId};
use crate::error::ChartError;

/// Resolves a selector that may be:
/// - the empty string or a lone `.` → the source itself (self-targeted transition)
/// - starting with `.` → a descendant by dotted path from `source`
/// - starting with `#` → absolute lookup by node id
/// - anything else → a plain key, tried first as a child of `source` (the
///   common case: a compound's own transition naming one of its own
///   children) and, failing that, as a sibling within `source`'s parent
pub fn get_relative(chart: &Chart, source: NodeId, selector: &str) -> Result<NodeId, ChartError> {
    if selector.is_empty() || selector == "." {
        return Ok(source);
    }
    if let Some(rest) = selector.strip_prefix('#') {
        return chart.get_by_id(rest);
    }
    if let Some(rest) = selector.strip_prefix('.') {
        let mut cur = source;
        for segment in rest.split('.') {
            cur = chart
                .child_by_key(cur, segment)
                .ok_or_else(|| ChartError::UnknownState(selector.to_string()))?;
        }
        return Ok(cur);
    }
    if let Some(child) = chart.child_by_key(source, selector) {
        return Ok(child);
    }
    let parent = chart
        .node(source)
        .parent
        .ok_or_else(|| ChartError::UnknownState(selector.to_string()))?;
    chart
        .child_by_key(parent, selector)
        .ok_or_else(|| ChartError::UnknownState(selector.to_string()))
}

pub fn get_by_id(chart: &Chart, id: &str) -> Result<NodeId, ChartError> {
    chart.get_by_id(id)
}

pub fn lcca(chart: &Chart, nodes: &[NodeId]) -> NodeId {
    chart.lcca(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::linear_chart;

    #[test]
    fn self_selector() {
        let chart = linear_chart();
        let two = chart.get_by_id("machine.two").unwrap();
        assert_eq!(get_relative(&chart, two, "").unwrap(), two);
        assert_eq!(get_relative(&chart, two, ".").unwrap(), two);
    }

    #[test]
    fn sibling_selector() {
        let chart = linear_chart();
        let one = chart.get_by_id("machine.one").unwrap();
        let two = chart.get_by_id("machine.two").unwrap();
        assert_eq!(get_relative(&chart, one, "two").unwrap(), two);
    }

    #[test]
    fn descendant_selector() {
        let chart = linear_chart();
        let root = chart.root;
        let foo = chart.get_by_id("machine.two.deep.foo").unwrap();
        assert_eq!(get_relative(&chart, root, ".two.deep.foo").unwrap(), foo);
    }

    #[test]
    fn absolute_selector() {
        let chart = linear_chart();
        let one = chart.get_by_id("machine.one").unwrap();
        let foo = chart.get_by_id("machine.two.deep.foo").unwrap();
        assert_eq!(get_relative(&chart, one, "#machine.two.deep.foo").unwrap(), foo);
    }
}
