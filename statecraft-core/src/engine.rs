//! The pure Transition Engine (§4.3): `transition(chart, prev, event)` and
//! nothing else. No I/O, no timers, no actor spawning — those live in the
//! `statecraft` interpreter crate, which calls this function once per
//! microstep and loops it for eventless follow-ups.

use std::collections::BTreeSet;

use crate::action::ActionDef;
use crate::behavior::Behavior;
use crate::chart::{Chart, NodeId, StateNodeType, Transition};
use crate::error::TransitionError;
use crate::event::{Event, EventDescriptor, ScxmlEvent, INIT_EVENT};
use crate::state::{HistoryValue, State};
use crate::value::{configuration_from_value, fill_configuration, value_at, StateValue};

/// Runs one microstep: resolves `scxml_event` against `prev`'s configuration,
/// applies the winning transition(s), and returns the resulting `State`.
///
/// This never drives eventless (`always`) follow-ups or `after` timers — the
/// interpreter is responsible for re-invoking this function until a fixed
/// point is reached (§4.5).
pub fn transition<C: Clone>(
    chart: &Chart,
    behavior: &Behavior<C>,
    prev: &State<C>,
    scxml_event: ScxmlEvent,
) -> Result<State<C>, TransitionError> {
    let prev_config = configuration_from_value(chart, &prev.value)?;
    let event = &scxml_event.data;

    let selected = select_transitions(chart, behavior, &prev.context, event, &prev_config)?;
    let chosen = resolve_conflicts(chart, &prev_config, &selected);

    let exited: BTreeSet<NodeId> = chosen.iter().flat_map(|c| c.exit_set.iter().copied()).collect();
    let next_history_value = record_history(chart, &prev_config, &prev.history_value, &exited);

    let mut entry: BTreeSet<NodeId> = BTreeSet::new();
    let chosen_transitions: Vec<&Transition> = chosen
        .iter()
        .map(|c| &chart.node(c.source).on[c.idx])
        .collect();
    for t in &chosen_transitions {
        compute_entry_for_transition(chart, t, exit_scope(chart, t), &next_history_value, &mut entry)?;
    }

    let mut next_config: BTreeSet<NodeId> = prev_config
        .iter()
        .copied()
        .filter(|n| !exited.contains(n))
        .collect();
    next_config.extend(entry.iter().copied());
    detect_entry_conflicts(chart, &next_config)?;

    let (actions, context, assign_ran) =
        fold_actions(chart, behavior, &prev.context, event, &exited, &entry, &chosen_transitions)?;

    let next_value = value_at(chart, chart.root, &next_config);
    let is_init = event.event_type == INIT_EVENT;
    let value_changed = next_value != prev.value;
    let changed = if is_init {
        None
    } else {
        Some(value_changed || !actions.is_empty() || assign_ran)
    };

    let next_events = collect_next_events(chart, &next_config);

    Ok(State {
        value: next_value,
        context,
        event: event.clone(),
        scxml_event: scxml_event.clone(),
        actions,
        children: prev.children.clone(),
        changed,
        history: changed.map(|_| Box::new(prev.value.clone())),
        history_value: next_history_value,
        next_events,
    })
}

/// Synthesizes the machine's initial `State` by entering the root's default
/// descendants, as if driven by the synthetic `xstate.init` event (§4.5
/// `start()`). No guards run on initial entry (there is no prior transition
/// to guard), but an `onEntry: [assign(...)]` on a default-entered state is
/// still folded into context, exactly as it would be for any other entry.
pub fn initial_state<C: Clone>(
    chart: &Chart,
    behavior: &Behavior<C>,
    context: C,
) -> Result<State<C>, TransitionError> {
    let mut entry: BTreeSet<NodeId> = BTreeSet::new();
    entry.insert(chart.root);
    default_descendants(chart, chart.root, &HistoryValue::new(), &mut entry)?;

    let mut entry_order: Vec<NodeId> = entry.iter().copied().collect();
    entry_order.sort_by_key(|&n| chart.depth(n));

    let event = Event::new(INIT_EVENT);
    let mut actions = Vec::new();
    let mut context = context;
    for &n in &entry_order {
        for action in &chart.node(n).on_entry {
            match action {
                ActionDef::Assign { assigner } => {
                    let f = behavior
                        .assigner(assigner)
                        .ok_or_else(|| TransitionError::UnknownAssigner(assigner.clone()))?;
                    context = f(&context, &event);
                }
                other => actions.push(other.clone()),
            }
        }
    }

    let value = value_at(chart, chart.root, &entry);
    Ok(State {
        value,
        context,
        event,
        scxml_event: ScxmlEvent::init(),
        actions,
        children: Default::default(),
        changed: None,
        history: None,
        history_value: HistoryValue::new(),
        next_events: collect_next_events(chart, &entry),
    })
}

/// Convenience entry point for a caller-originated event, wrapped as an
/// external SCXML event (§4.1 "normalize").
pub fn send<C: Clone>(
    chart: &Chart,
    behavior: &Behavior<C>,
    prev: &State<C>,
    event: impl Into<Event>,
) -> Result<State<C>, TransitionError> {
    transition(chart, behavior, prev, ScxmlEvent::external(event.into()))
}

struct Candidate {
    source: NodeId,
    idx: usize,
    exit_set: BTreeSet<NodeId>,
}

/// Per atomic leaf in `configuration`, walk ancestors collecting the first
/// transition whose event descriptor matches and whose guard (if any) passes
/// (§4.3 step 2). No-op transitions (targetless, actionless) are skipped as
/// though they were never declared, so the walk keeps climbing past them.
fn select_transitions<C>(
    chart: &Chart,
    behavior: &Behavior<C>,
    context: &C,
    event: &Event,
    configuration: &BTreeSet<NodeId>,
) -> Result<Vec<(NodeId, usize)>, TransitionError> {
    let mut selected = Vec::new();
    let mut seen = BTreeSet::new();
    for &leaf in configuration {
        if !chart.node(leaf).node_type.is_atomic_like() {
            continue;
        }
        if let Some(hit) = select_for_leaf(chart, behavior, context, event, leaf)? {
            if seen.insert(hit) {
                selected.push(hit);
            }
        }
    }
    Ok(selected)
}

fn select_for_leaf<C>(
    chart: &Chart,
    behavior: &Behavior<C>,
    context: &C,
    event: &Event,
    leaf: NodeId,
) -> Result<Option<(NodeId, usize)>, TransitionError> {
    for node in chart.ancestors(leaf) {
        let transitions = &chart.node(node).on;
        let mut exact = Vec::new();
        let mut wild = Vec::new();
        for (i, t) in transitions.iter().enumerate() {
            if t.is_noop() || !t.event.matches(&event.event_type) {
                continue;
            }
            match t.event {
                EventDescriptor::Wildcard => wild.push(i),
                EventDescriptor::Named(_) | EventDescriptor::Eventless => exact.push(i),
            }
        }
        for i in exact.into_iter().chain(wild) {
            let t = &transitions[i];
            let passes = match &t.cond {
                None => true,
                Some(name) => {
                    let guard = behavior.guard(name).ok_or_else(|| TransitionError::GuardException {
                        guard: name.clone(),
                        event: event.event_type.clone(),
                    })?;
                    guard(context, event).map_err(|_| TransitionError::GuardException {
                        guard: name.clone(),
                        event: event.event_type.clone(),
                    })?
                }
            };
            if passes {
                return Ok(Some((node, i)));
            }
        }
    }
    Ok(None)
}

/// §4.3 step 4: the state below which a transition is confined. Internal
/// transitions whose targets never escape `source` leave it as the scope
/// itself; everything else escapes to the least common compound ancestor.
fn exit_scope(chart: &Chart, t: &Transition) -> NodeId {
    if t.internal && chart.targets_contained_in(t.source, &t.targets) {
        t.source
    } else {
        let mut nodes = Vec::with_capacity(t.targets.len() + 1);
        nodes.push(t.source);
        nodes.extend(t.targets.iter().copied());
        chart.lcca(&nodes)
    }
}

/// §4.3 step 3: deeper sources win; among equal depth, the order transitions
/// were selected in (document order) wins. `selected` is already in that
/// order, so a stable sort by depth alone reproduces both rules at once.
fn resolve_conflicts(
    chart: &Chart,
    prev_config: &BTreeSet<NodeId>,
    selected: &[(NodeId, usize)],
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = selected
        .iter()
        .map(|&(source, idx)| {
            let t = &chart.node(source).on[idx];
            let scope = exit_scope(chart, t);
            let exit_set = prev_config
                .iter()
                .copied()
                .filter(|&s| chart.is_proper_descendant(s, scope))
                .collect();
            Candidate { source, idx, exit_set }
        })
        .collect();
    candidates.sort_by(|a, b| chart.depth(b.source).cmp(&chart.depth(a.source)));

    let mut chosen = Vec::new();
    let mut claimed: BTreeSet<NodeId> = BTreeSet::new();
    for c in candidates {
        if c.exit_set.is_disjoint(&claimed) {
            claimed.extend(c.exit_set.iter().copied());
            chosen.push(c);
        }
    }
    chosen
}

/// Records, for every history pseudostate owned by an exited compound or
/// parallel node, the descendant configuration that compound had at the
/// moment it was exited (§9 "History").
fn record_history(
    chart: &Chart,
    prev_config: &BTreeSet<NodeId>,
    prev_history: &HistoryValue,
    exited: &BTreeSet<NodeId>,
) -> HistoryValue {
    let mut next = prev_history.clone();
    for &n in exited {
        for &child in &chart.node(n).children {
            if let StateNodeType::History(kind) = chart.node(child).node_type {
                let snapshot = value_at(chart, n, prev_config);
                let snapshot = match kind {
                    crate::chart::HistoryKind::Deep => snapshot,
                    crate::chart::HistoryKind::Shallow => match snapshot {
                        StateValue::Atomic(_) => snapshot,
                        StateValue::Compound(map) => {
                            let key = map
                                .into_keys()
                                .next()
                                .expect("exited compound has an active child");
                            StateValue::Atomic(key)
                        }
                    },
                };
                next.insert(child, snapshot);
            }
        }
    }
    next
}

fn ancestors_between(chart: &Chart, target: NodeId, scope: NodeId) -> Vec<NodeId> {
    chart
        .proper_ancestors(target)
        .into_iter()
        .filter(|&a| chart.is_proper_descendant(a, scope))
        .collect()
}

/// §4.3 step 5, for a single selected transition: the ancestor chain up to
/// (not including) the exit scope, default content for any sibling region of
/// a newly-entered parallel ancestor that none of this transition's targets
/// passes through, and each target's own resolution (possibly through
/// history).
fn compute_entry_for_transition(
    chart: &Chart,
    t: &Transition,
    scope: NodeId,
    history_value: &HistoryValue,
    entry: &mut BTreeSet<NodeId>,
) -> Result<(), TransitionError> {
    if t.targets.is_empty() {
        return Ok(());
    }
    let mut ancestors_all: BTreeSet<NodeId> = BTreeSet::new();
    for &target in &t.targets {
        ancestors_all.extend(ancestors_between(chart, target, scope));
    }
    entry.extend(ancestors_all.iter().copied());

    for &a in &ancestors_all {
        if chart.node(a).node_type != StateNodeType::Parallel {
            continue;
        }
        for &region in &chart.node(a).children {
            let covered = t
                .targets
                .iter()
                .any(|&target| chart.is_descendant_or_self(target, region));
            if !covered {
                entry.insert(region);
                default_descendants(chart, region, history_value, entry)?;
            }
        }
    }

    for &target in &t.targets {
        resolve_target_into(chart, target, history_value, entry)?;
    }
    Ok(())
}

/// Adds `target` (or, if it is a history pseudostate, whatever it resolves
/// to) plus its own default descendants.
fn resolve_target_into(
    chart: &Chart,
    target: NodeId,
    history_value: &HistoryValue,
    entry: &mut BTreeSet<NodeId>,
) -> Result<(), TransitionError> {
    if let StateNodeType::History(_) = chart.node(target).node_type {
        let parent = chart.node(target).parent.expect("history node has a parent");
        match history_value.get(&target) {
            Some(StateValue::Atomic(key)) => {
                if let Some(child) = chart.child_by_key(parent, key) {
                    entry.insert(child);
                    default_descendants(chart, child, history_value, entry)?;
                }
            }
            Some(v @ StateValue::Compound(_)) => {
                fill_configuration(chart, parent, v, entry)?;
            }
            None => {
                let fallback = chart
                    .node(target)
                    .initial
                    .expect("history node without a recorded value must have a fallback");
                entry.insert(fallback);
                default_descendants(chart, fallback, history_value, entry)?;
            }
        }
        return Ok(());
    }
    entry.insert(target);
    default_descendants(chart, target, history_value, entry)
}

fn default_descendants(
    chart: &Chart,
    node: NodeId,
    history_value: &HistoryValue,
    entry: &mut BTreeSet<NodeId>,
) -> Result<(), TransitionError> {
    match chart.node(node).node_type {
        StateNodeType::Atomic | StateNodeType::Final => Ok(()),
        StateNodeType::Compound => {
            let initial = chart.node(node).initial.expect("compound has an initial");
            entry.insert(initial);
            default_descendants(chart, initial, history_value, entry)
        }
        StateNodeType::Parallel => {
            for &region in &chart.node(node).children {
                entry.insert(region);
                default_descendants(chart, region, history_value, entry)?;
            }
            Ok(())
        }
        StateNodeType::History(_) => resolve_target_into(chart, node, history_value, entry),
    }
}

/// §4.3 step 3 cont'd / §7: catches conflicts `resolve_conflicts`'s exit-set
/// check can't see — e.g. two transitions (or one transition's own multiple
/// targets) each entering a different child of the same `Compound` region,
/// which can only ever have one active child at a time.
fn detect_entry_conflicts(chart: &Chart, next_config: &BTreeSet<NodeId>) -> Result<(), TransitionError> {
    for &n in next_config {
        if chart.node(n).node_type != StateNodeType::Compound {
            continue;
        }
        let active_children = chart
            .node(n)
            .children
            .iter()
            .copied()
            .filter(|c| next_config.contains(c))
            .count();
        if active_children > 1 {
            return Err(TransitionError::NonDeterministicEntry(
                chart.node(n).absolute_id.clone(),
            ));
        }
    }
    Ok(())
}

/// §4.3 steps 6-7: assembles the ordered action list (exit, deepest first;
/// transition actions in selection order; entry, shallowest first) while
/// folding `assign` actions into context as they're encountered.
fn fold_actions<C: Clone>(
    chart: &Chart,
    behavior: &Behavior<C>,
    context: &C,
    event: &Event,
    exited: &BTreeSet<NodeId>,
    entered: &BTreeSet<NodeId>,
    chosen_transitions: &[&Transition],
) -> Result<(Vec<ActionDef>, C, bool), TransitionError> {
    let mut exit_order: Vec<NodeId> = exited.iter().copied().collect();
    exit_order.sort_by(|&a, &b| chart.depth(b).cmp(&chart.depth(a)));

    let mut entry_order: Vec<NodeId> = entered.iter().copied().collect();
    entry_order.sort_by_key(|&n| chart.depth(n));

    let mut out = Vec::new();
    for &n in &exit_order {
        out.extend(chart.node(n).on_exit.iter().cloned());
    }

    let mut context = context.clone();
    let mut assign_ran = false;
    for t in chosen_transitions {
        for action in &t.actions {
            match action {
                ActionDef::Assign { assigner } => {
                    assign_ran = true;
                    let f = behavior
                        .assigner(assigner)
                        .ok_or_else(|| TransitionError::UnknownAssigner(assigner.clone()))?;
                    context = f(&context, event);
                }
                other => out.push(other.clone()),
            }
        }
    }

    for &n in &entry_order {
        out.extend(chart.node(n).on_entry.iter().cloned());
    }

    Ok((out, context, assign_ran))
}

fn collect_next_events(chart: &Chart, configuration: &BTreeSet<NodeId>) -> Vec<String> {
    let mut set = std::collections::BTreeSet::new();
    for &n in configuration {
        for t in &chart.node(n).on {
            if let EventDescriptor::Named(name) = &t.event {
                set.insert(name.clone());
            }
        }
    }
    set.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::linear_chart;
    use crate::value::StateValue;

    fn init_state(chart: &Chart) -> State<()> {
        initial_state(chart, &Behavior::<()>::new(), ()).expect("no assign in fixture's onEntry")
    }

    // §8 scenario A: a named (non-`.`) self-target re-enters the state, so its
    // onEntry action fires and `changed` is true even though the value string
    // is unchanged.
    #[test]
    fn external_self_transition_reenters_and_changes() {
        let chart = linear_chart();
        let behavior = Behavior::<()>::new();
        let prev = init_state(&chart);
        assert_eq!(prev.value, StateValue::Atomic("one".to_string()));

        let next = send(&chart, &behavior, &prev, Event::new("EXTERNAL")).unwrap();
        assert_eq!(next.value, StateValue::Atomic("one".to_string()));
        assert_eq!(next.changed, Some(true));
        assert_eq!(next.actions, vec![ActionDef::Opaque { name: "enteredOne".to_string() }]);
    }

    // §8 scenario B: after the re-entry above, a genuine no-op leaves `changed`
    // false.
    #[test]
    fn inert_after_external_self_transition_is_unchanged() {
        let chart = linear_chart();
        let behavior = Behavior::<()>::new();
        let prev = init_state(&chart);
        let after_external = send(&chart, &behavior, &prev, Event::new("EXTERNAL")).unwrap();

        let next = send(&chart, &behavior, &after_external, Event::new("INERT")).unwrap();
        assert_eq!(next.value, StateValue::Atomic("one".to_string()));
        assert_eq!(next.changed, Some(false));
    }

    #[test]
    fn unmatched_event_does_not_change_state() {
        let chart = linear_chart();
        let behavior = Behavior::<()>::new();
        let prev = init_state(&chart);
        let next = send(&chart, &behavior, &prev, Event::new("NOPE")).unwrap();
        assert_eq!(next.value, prev.value);
        assert_eq!(next.changed, Some(false));
    }

    #[test]
    fn nested_compound_transition_enters_default_deep_child() {
        let chart = linear_chart();
        let behavior = Behavior::<()>::new();
        let prev = init_state(&chart);

        let next = send(&chart, &behavior, &prev, Event::new("TO_TWO")).unwrap();
        let mut deep = BTreeMapValue::new();
        deep.insert("deep".to_string(), StateValue::Atomic("foo".to_string()));
        let mut expect = BTreeMapValue::new();
        expect.insert("two".to_string(), StateValue::Compound(deep));
        assert_eq!(next.value, StateValue::Compound(expect));
    }

    #[test]
    fn parallel_transition_enters_both_regions_default() {
        let chart = linear_chart();
        let behavior = Behavior::<()>::new();
        let prev = init_state(&chart);

        let next = send(&chart, &behavior, &prev, Event::new("TO_THREE")).unwrap();
        let three = match next.value {
            StateValue::Compound(ref m) => m.get("three").cloned().expect("three active"),
            _ => panic!("expected compound value"),
        };
        match three {
            StateValue::Compound(ref m) => {
                assert_eq!(m.get("first"), Some(&StateValue::Atomic("p31".to_string())));
                assert_eq!(m.get("second"), Some(&StateValue::Atomic("p41".to_string())));
            }
            _ => panic!("expected parallel compound value"),
        }
    }

    #[test]
    fn parallel_regions_independently_progress() {
        let chart = linear_chart();
        let behavior = Behavior::<()>::new();
        let prev = init_state(&chart);
        let in_three = send(&chart, &behavior, &prev, Event::new("TO_THREE")).unwrap();

        let three_of = |v: &StateValue| -> StateValue {
            match v {
                StateValue::Compound(m) => m.get("three").cloned().expect("three active"),
                _ => panic!("expected compound value"),
            }
        };

        let after_p31 = send(&chart, &behavior, &in_three, Event::new("P31")).unwrap();
        match three_of(&after_p31.value) {
            StateValue::Compound(m) => {
                assert_eq!(m.get("first"), Some(&StateValue::Atomic("p32".to_string())));
                assert_eq!(m.get("second"), Some(&StateValue::Atomic("p41".to_string())));
            }
            _ => panic!("expected parallel compound value"),
        }

        let after_p32 = send(&chart, &behavior, &after_p31, Event::new("P32")).unwrap();
        match three_of(&after_p32.value) {
            StateValue::Compound(m) => {
                assert_eq!(m.get("first"), Some(&StateValue::Atomic("p32".to_string())));
                assert_eq!(m.get("second"), Some(&StateValue::Atomic("p42".to_string())));
            }
            _ => panic!("expected parallel compound value"),
        }
    }

    #[test]
    fn internal_transition_with_only_actions_keeps_value_but_changes() {
        let chart = linear_chart();
        let behavior = Behavior::<()>::new();
        let prev = init_state(&chart);

        let next = send(&chart, &behavior, &prev, Event::new("INTERNAL")).unwrap();
        assert_eq!(next.value, prev.value);
        assert_eq!(next.changed, Some(true));
        assert_eq!(next.actions.len(), 1);
    }

    #[test]
    fn targetless_actionless_transition_is_a_noop() {
        let chart = linear_chart();
        let behavior = Behavior::<()>::new();
        let prev = init_state(&chart);

        let next = send(&chart, &behavior, &prev, Event::new("INERT")).unwrap();
        assert_eq!(next.value, prev.value);
        assert_eq!(next.changed, Some(false));
        assert!(next.actions.is_empty());
    }

    // §8 scenario D's `nextEvents` check.
    #[test]
    fn next_events_reflect_new_configuration() {
        let chart = linear_chart();
        let behavior = Behavior::<()>::new();
        let prev = init_state(&chart);

        let next = send(&chart, &behavior, &prev, Event::new("TO_TWO")).unwrap();
        let mut events = next.next_events.clone();
        events.sort();
        assert_eq!(
            events,
            vec![
                "DEEP_EVENT".to_string(),
                "FOO_EVENT".to_string(),
                "MACHINE_EVENT".to_string(),
            ]
        );
    }

    // §8 scenario E's `nextEvents` check.
    #[test]
    fn next_events_across_parallel_regions() {
        let chart = linear_chart();
        let behavior = Behavior::<()>::new();
        let prev = init_state(&chart);
        let in_three = send(&chart, &behavior, &prev, Event::new("TO_THREE")).unwrap();

        let mut events = in_three.next_events.clone();
        events.sort();
        assert_eq!(
            events,
            vec![
                "MACHINE_EVENT".to_string(),
                "P31".to_string(),
                "P32".to_string(),
                "THREE_EVENT".to_string(),
            ]
        );
    }

    // Thin helper so the nested-compound test above reads like the §8
    // worked example instead of importing `std::collections::BTreeMap`
    // under a name that collides with `StateValue`'s own variant.
    type BTreeMapValue = std::collections::BTreeMap<String, StateValue>;
}
