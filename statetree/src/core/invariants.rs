//! Structural invariants checked when a graph is linked.

use std::collections::HashSet;

use tracing::warn;

use crate::core::graph::{StateGraph, StateNode};
use crate::core::types::{IndexRange, StateHandle, TransitionKind, TransitionTarget};

/// Check every cross reference inside a compiled graph:
/// - at least one state, root at index 0 without a parent
/// - unique state names
/// - child ranges in bounds, after their parent, pointing back at it
/// - transition and condition ranges in bounds
/// - transition and default targets resolvable
/// - condition handles readable for their kind, comparator valid for it
///
/// A task range past the end of the task list is not an error: the state is
/// logged and routes selection to its children at runtime.
pub fn validate_graph(graph: &StateGraph) -> Vec<String> {
    let mut errors = Vec::new();
    let states = graph.states();

    if states.is_empty() {
        errors.push("graph has no states".to_string());
        return errors;
    }
    if states.len() >= usize::from(u16::MAX) {
        errors.push(format!("graph has {} states, too many to address", states.len()));
        return errors;
    }
    if states[0].parent.is_valid() {
        errors.push(format!("{}: root must not have a parent", states[0].name));
    }

    let mut seen = HashSet::new();
    let mut claimed = vec![0usize; states.len()];
    for (index, node) in states.iter().enumerate() {
        let path = graph
            .state_path(StateHandle(index as u16))
            .unwrap_or_else(|| node.name.clone());
        if !seen.insert(node.name.as_str()) {
            errors.push(format!("duplicate state name '{}' at {}", node.name, path));
        }
        if index > 0 && !node.parent.is_valid() {
            errors.push(format!("{path}: only the root may lack a parent"));
        }
        validate_children(graph, index, node, &path, &mut claimed, &mut errors);
        validate_node_ranges(graph, node, &path, &mut errors);
        validate_target(graph, node.on_success, &path, "on_success", &mut errors);
        validate_target(graph, node.on_failure, &path, "on_failure", &mut errors);
    }

    for (index, count) in claimed.iter().enumerate().skip(1) {
        if *count != 1 {
            errors.push(format!(
                "{}: listed as a child {} times, expected once",
                states[index].name, count
            ));
        }
    }

    for (index, rule) in graph.transitions().iter().enumerate() {
        if !in_bounds(rule.conditions, graph.conditions().len()) {
            errors.push(format!("transition {index}: conditions out of range"));
        }
        let needs_target = matches!(rule.kind, TransitionKind::GotoState);
        let bad_target = rule.target.is_valid() && rule.target.index() >= states.len();
        if bad_target || (needs_target && !rule.target.is_valid()) {
            errors.push(format!("transition {index}: target {} does not exist", rule.target));
        }
    }

    let pool_size = usize::from(graph.variables().pool_size());
    let constants = graph.constants();
    for (index, condition) in graph.conditions().iter().enumerate() {
        let size = condition.kind.size();
        for handle in [condition.left, condition.right] {
            let in_pool = handle.index() < pool_size && handle.index() + size <= pool_size;
            if !in_pool && !constants.contains(handle, size) {
                errors.push(format!(
                    "condition {index}: handle {} cannot hold a {}",
                    handle.0,
                    condition.kind.label()
                ));
            }
        }
        if !condition.comparator.is_valid_for(condition.kind) {
            errors.push(format!(
                "condition {index}: '{}' is not defined for {}",
                condition.comparator,
                condition.kind.label()
            ));
        }
    }

    errors
}

fn validate_children(
    graph: &StateGraph,
    index: usize,
    node: &StateNode,
    path: &str,
    claimed: &mut [usize],
    errors: &mut Vec<String>,
) {
    if node.children.is_empty() {
        return;
    }
    if !in_bounds(node.children, graph.states().len()) {
        errors.push(format!("{path}: children out of range"));
        return;
    }
    if usize::from(node.children.begin) <= index {
        errors.push(format!("{path}: children must follow their parent"));
    }
    for child in node.children.iter() {
        claimed[usize::from(child)] += 1;
        let child_node = &graph.states()[usize::from(child)];
        if child_node.parent.index() != index {
            errors.push(format!(
                "{path}: child '{}' names a different parent",
                child_node.name
            ));
        }
    }
}

fn validate_node_ranges(graph: &StateGraph, node: &StateNode, path: &str, errors: &mut Vec<String>) {
    if node.tasks.begin > node.tasks.end {
        errors.push(format!("{path}: tasks range is reversed"));
    } else if !in_bounds(node.tasks, graph.tasks().len()) {
        warn!(state = path, "tasks out of range, state will act as a router");
    }
    if !in_bounds(node.transitions, graph.transitions().len()) {
        errors.push(format!("{path}: transitions out of range"));
    }
    if !in_bounds(node.enter_conditions, graph.conditions().len()) {
        errors.push(format!("{path}: enter conditions out of range"));
    }
}

fn validate_target(
    graph: &StateGraph,
    target: TransitionTarget,
    path: &str,
    label: &str,
    errors: &mut Vec<String>,
) {
    let state = target.state;
    let missing = match target.kind {
        TransitionKind::GotoState => !state.is_valid() || state.index() >= graph.states().len(),
        TransitionKind::NextState => state.is_valid() && state.index() >= graph.states().len(),
        _ => false,
    };
    if missing {
        errors.push(format!("{path}: {label} target {state} does not exist"));
    }
}

fn in_bounds(range: IndexRange, len: usize) -> bool {
    range.begin <= range.end && usize::from(range.end) <= len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::condition::{Comparator, Condition};
    use crate::core::graph::{GraphParts, StateGraph, TransitionRule};
    use crate::core::variables::{VariableHandle, VariableKind, VariableTable, VariableValue};

    fn node(name: &str, parent: StateHandle, children: IndexRange) -> StateNode {
        StateNode {
            name: name.to_string(),
            parent,
            children,
            tasks: IndexRange::EMPTY,
            transitions: IndexRange::EMPTY,
            enter_conditions: IndexRange::EMPTY,
            on_success: TransitionTarget::NOT_SET,
            on_failure: TransitionTarget::NOT_SET,
        }
    }

    fn two_states() -> GraphParts {
        GraphParts {
            name: "g".to_string(),
            states: vec![
                node("Root", StateHandle::INVALID, IndexRange::new(1, 2)),
                node("A", StateHandle::ROOT, IndexRange::EMPTY),
            ],
            ..GraphParts::default()
        }
    }

    #[test]
    fn well_formed_graph_has_no_errors() {
        let graph = StateGraph::from_parts(two_states());
        assert!(validate_graph(&graph).is_empty());
    }

    #[test]
    fn duplicate_names_and_orphans_are_reported() {
        let mut parts = two_states();
        parts
            .states
            .push(node("A", StateHandle::ROOT, IndexRange::EMPTY));
        let errors = validate_graph(&StateGraph::from_parts(parts));
        assert!(errors.iter().any(|err| err.contains("duplicate state name 'A'")));
        assert!(errors.iter().any(|err| err.contains("listed as a child 0 times")));
    }

    #[test]
    fn dangling_goto_is_reported() {
        let mut parts = two_states();
        parts.states[1].on_success = TransitionTarget::new(TransitionKind::GotoState, StateHandle(7));
        parts.transitions.push(TransitionRule {
            conditions: IndexRange::EMPTY,
            target: StateHandle::INVALID,
            kind: TransitionKind::GotoState,
        });
        parts.states[1].transitions = IndexRange::new(0, 1);
        let errors = validate_graph(&StateGraph::from_parts(parts));
        assert!(
            errors
                .iter()
                .any(|err| err == "Root/A: on_success target #7 does not exist")
        );
        assert!(errors.iter().any(|err| err.starts_with("transition 0")));
    }

    #[test]
    fn missing_tasks_are_not_a_link_error() {
        let mut parts = two_states();
        parts.states[1].tasks = IndexRange::new(0, 2);
        assert!(validate_graph(&StateGraph::from_parts(parts)).is_empty());

        let mut parts = two_states();
        parts.states[1].tasks = IndexRange::new(2, 1);
        let errors = validate_graph(&StateGraph::from_parts(parts));
        assert_eq!(errors, ["Root/A: tasks range is reversed"]);
    }

    #[test]
    fn condition_handles_and_comparators_are_checked() {
        let mut parts = two_states();
        parts.variables = VariableTable::builder()
            .variable("flag", VariableValue::Bool(false))
            .finish()
            .expect("table");
        parts.conditions = vec![
            Condition::new(
                VariableHandle(0),
                Comparator::Less,
                VariableHandle(0),
                VariableKind::Bool,
            ),
            Condition::new(
                VariableHandle(0),
                Comparator::Equal,
                VariableHandle(40),
                VariableKind::Int,
            ),
        ];
        let errors = validate_graph(&StateGraph::from_parts(parts));
        assert!(errors.iter().any(|err| err.contains("'<' is not defined for bool")));
        assert!(errors.iter().any(|err| err.contains("handle 40 cannot hold a int")));
        assert!(errors.iter().any(|err| err.contains("handle 0 cannot hold a int")));
    }
}
