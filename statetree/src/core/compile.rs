//! Turns a tree of named state drafts into a flat, linked [`StateGraph`].
//!
//! States are numbered breadth first from the root, which keeps every state's
//! children contiguous. Names are resolved here: variables and constants
//! through the [`VariableTable`], goto targets through state names, and
//! `NextState` to the following sibling.

use std::collections::{HashMap, VecDeque};

use crate::core::arena::InstanceObject;
use crate::core::condition::{Comparator, Condition};
use crate::core::graph::{GraphParts, StateGraph, StateNode, TransitionRule};
use crate::core::task::{Evaluator, Task};
use crate::core::types::{IndexRange, StateHandle, TransitionKind, TransitionTarget};
use crate::core::variables::VariableTable;

/// Where a transition leads, by name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TargetDraft {
    #[default]
    NotSet,
    Succeeded,
    Failed,
    NextState,
    SelectChildState,
    GotoState(String),
}

/// `left op right`, naming variables or constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionDraft {
    pub left: String,
    pub comparator: Comparator,
    pub right: String,
}

impl ConditionDraft {
    pub fn new(left: impl Into<String>, comparator: Comparator, right: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            comparator,
            right: right.into(),
        }
    }
}

/// Index of a state inside a [`StateGraphBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DraftId(usize);

#[derive(Debug)]
struct StateDraft {
    name: String,
    parent: Option<usize>,
    children: Vec<usize>,
    tasks: Vec<Box<dyn Task>>,
    transitions: Vec<(Vec<ConditionDraft>, TargetDraft)>,
    enter_conditions: Vec<ConditionDraft>,
    on_success: TargetDraft,
    on_failure: TargetDraft,
}

#[derive(Debug)]
pub struct StateGraphBuilder {
    name: String,
    variables: VariableTable,
    states: Vec<StateDraft>,
    evaluators: Vec<Box<dyn Evaluator>>,
    objects: Vec<Box<dyn InstanceObject>>,
}

impl StateGraphBuilder {
    pub fn new(name: impl Into<String>, variables: VariableTable) -> Self {
        Self {
            name: name.into(),
            variables,
            states: Vec::new(),
            evaluators: Vec::new(),
            objects: Vec::new(),
        }
    }

    /// Add a state; `None` as parent makes it the root.
    pub fn add_state(&mut self, parent: Option<DraftId>, name: impl Into<String>) -> DraftId {
        let id = self.states.len();
        self.states.push(StateDraft {
            name: name.into(),
            parent: parent.map(|p| p.0),
            children: Vec::new(),
            tasks: Vec::new(),
            transitions: Vec::new(),
            enter_conditions: Vec::new(),
            on_success: TargetDraft::NotSet,
            on_failure: TargetDraft::NotSet,
        });
        if let Some(parent) = parent {
            self.states[parent.0].children.push(id);
        }
        DraftId(id)
    }

    pub fn add_task(&mut self, state: DraftId, task: Box<dyn Task>) -> &mut Self {
        self.states[state.0].tasks.push(task);
        self
    }

    pub fn add_evaluator(&mut self, evaluator: Box<dyn Evaluator>) -> &mut Self {
        self.evaluators.push(evaluator);
        self
    }

    pub fn add_object(&mut self, object: Box<dyn InstanceObject>) -> &mut Self {
        self.objects.push(object);
        self
    }

    pub fn add_transition(
        &mut self,
        state: DraftId,
        conditions: Vec<ConditionDraft>,
        target: TargetDraft,
    ) -> &mut Self {
        self.states[state.0].transitions.push((conditions, target));
        self
    }

    pub fn add_enter_condition(&mut self, state: DraftId, condition: ConditionDraft) -> &mut Self {
        self.states[state.0].enter_conditions.push(condition);
        self
    }

    pub fn on_success(&mut self, state: DraftId, target: TargetDraft) -> &mut Self {
        self.states[state.0].on_success = target;
        self
    }

    pub fn on_failure(&mut self, state: DraftId, target: TargetDraft) -> &mut Self {
        self.states[state.0].on_failure = target;
        self
    }

    /// Flatten, resolve names and link. Every problem found is reported.
    pub fn build(self) -> Result<StateGraph, Vec<String>> {
        let mut errors = Vec::new();

        let roots: Vec<usize> = (0..self.states.len())
            .filter(|&i| self.states[i].parent.is_none())
            .collect();
        let root = match roots.as_slice() {
            [root] => *root,
            [] => return Err(vec!["graph needs exactly one root state, found 0".to_string()]),
            many => {
                return Err(vec![format!(
                    "graph needs exactly one root state, found {}",
                    many.len()
                )]);
            }
        };
        if self.states.len() >= usize::from(u16::MAX) {
            return Err(vec![format!("{} states exceed the handle range", self.states.len())]);
        }

        // Breadth-first numbering keeps siblings adjacent.
        let mut order = Vec::with_capacity(self.states.len());
        let mut queue = VecDeque::from([root]);
        while let Some(draft) = queue.pop_front() {
            order.push(draft);
            queue.extend(self.states[draft].children.iter().copied());
        }
        if order.len() != self.states.len() {
            errors.push(format!(
                "{} states are not reachable from the root",
                self.states.len() - order.len()
            ));
        }

        let mut handle_of = vec![StateHandle::INVALID; self.states.len()];
        for (position, &draft) in order.iter().enumerate() {
            handle_of[draft] = StateHandle(position as u16);
        }
        let mut by_name: HashMap<&str, StateHandle> = HashMap::new();
        for &draft in &order {
            let name = self.states[draft].name.as_str();
            if by_name.insert(name, handle_of[draft]).is_some() {
                errors.push(format!("duplicate state name '{name}'"));
            }
        }

        let next_sibling = |draft: usize| -> StateHandle {
            let Some(parent) = self.states[draft].parent else {
                return StateHandle::INVALID;
            };
            let siblings = &self.states[parent].children;
            siblings
                .iter()
                .position(|&s| s == draft)
                .and_then(|pos| siblings.get(pos + 1))
                .map_or(StateHandle::INVALID, |&s| handle_of[s])
        };
        let resolve = |draft: usize, target: &TargetDraft, errors: &mut Vec<String>| {
            let state_name = &self.states[draft].name;
            match target {
                TargetDraft::NotSet => TransitionTarget::NOT_SET,
                TargetDraft::Succeeded => {
                    TransitionTarget::new(TransitionKind::Succeeded, StateHandle::INVALID)
                }
                TargetDraft::Failed => {
                    TransitionTarget::new(TransitionKind::Failed, StateHandle::INVALID)
                }
                TargetDraft::NextState => {
                    TransitionTarget::new(TransitionKind::NextState, next_sibling(draft))
                }
                TargetDraft::SelectChildState => TransitionTarget::new(
                    TransitionKind::SelectChildState,
                    handle_of[draft],
                ),
                TargetDraft::GotoState(name) => match by_name.get(name.as_str()) {
                    Some(&handle) => TransitionTarget::new(TransitionKind::GotoState, handle),
                    None => {
                        errors.push(format!("{state_name}: unknown target state '{name}'"));
                        TransitionTarget::NOT_SET
                    }
                },
            }
        };

        let mut conditions = Vec::new();
        let mut transitions = Vec::new();
        let mut states = Vec::with_capacity(order.len());
        let mut next_child = 1u16;
        let mut task_count = 0u16;

        for &draft in &order {
            let source = &self.states[draft];
            let children = IndexRange::new(next_child, next_child + source.children.len() as u16);
            next_child = children.end;

            let tasks = IndexRange::new(task_count, task_count + source.tasks.len() as u16);
            task_count = tasks.end;

            let enter_begin = conditions.len() as u16;
            for draft_condition in &source.enter_conditions {
                if let Some(condition) =
                    self.resolve_condition(&source.name, draft_condition, &mut errors)
                {
                    conditions.push(condition);
                }
            }
            let enter_conditions = IndexRange::new(enter_begin, conditions.len() as u16);

            let transition_begin = transitions.len() as u16;
            for (draft_conditions, target) in &source.transitions {
                let begin = conditions.len() as u16;
                for draft_condition in draft_conditions {
                    if let Some(condition) =
                        self.resolve_condition(&source.name, draft_condition, &mut errors)
                    {
                        conditions.push(condition);
                    }
                }
                let resolved = resolve(draft, target, &mut errors);
                transitions.push(TransitionRule {
                    conditions: IndexRange::new(begin, conditions.len() as u16),
                    target: resolved.state,
                    kind: resolved.kind,
                });
            }

            states.push(StateNode {
                name: source.name.clone(),
                parent: source
                    .parent
                    .map_or(StateHandle::INVALID, |parent| handle_of[parent]),
                children,
                tasks,
                transitions: IndexRange::new(transition_begin, transitions.len() as u16),
                enter_conditions,
                on_success: resolve(draft, &source.on_success, &mut errors),
                on_failure: resolve(draft, &source.on_failure, &mut errors),
            });
        }

        if conditions.len() >= usize::from(u16::MAX) || transitions.len() >= usize::from(u16::MAX)
        {
            errors.push("too many conditions or transitions to address".to_string());
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        let Self {
            name,
            variables,
            states: drafts,
            evaluators,
            objects,
        } = self;
        let mut slots: Vec<Option<Vec<Box<dyn Task>>>> =
            drafts.into_iter().map(|draft| Some(draft.tasks)).collect();
        let tasks = order
            .iter()
            .flat_map(|&draft| slots[draft].take().unwrap_or_default())
            .collect();

        let mut graph = StateGraph::from_parts(GraphParts {
            name,
            states,
            transitions,
            conditions,
            variables,
            evaluators,
            tasks,
            objects,
        });
        graph.link()?;
        Ok(graph)
    }

    fn resolve_condition(
        &self,
        state: &str,
        draft: &ConditionDraft,
        errors: &mut Vec<String>,
    ) -> Option<Condition> {
        let left = self.variables.entry(&draft.left);
        let right = self.variables.entry(&draft.right);
        let (left, right) = match (left, right) {
            (Some(left), Some(right)) => (left, right),
            (left, right) => {
                for (name, entry) in [(&draft.left, left), (&draft.right, right)] {
                    if entry.is_none() {
                        errors.push(format!("{state}: unknown variable '{name}'"));
                    }
                }
                return None;
            }
        };
        if left.kind != right.kind {
            errors.push(format!(
                "{state}: cannot compare {} '{}' with {} '{}'",
                left.kind, left.name, right.kind, right.name
            ));
            return None;
        }
        if !draft.comparator.is_valid_for(left.kind) {
            errors.push(format!(
                "{state}: '{}' is not defined for {}",
                draft.comparator, left.kind
            ));
            return None;
        }
        Some(Condition::new(
            left.handle,
            draft.comparator,
            right.handle,
            left.kind,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::variables::VariableValue;
    use crate::test_support::AlwaysSucceed;

    fn table() -> VariableTable {
        VariableTable::builder()
            .variable("hp", VariableValue::Int(10))
            .variable("alert", VariableValue::Bool(false))
            .constant("limit", VariableValue::Int(5))
            .finish()
            .expect("table")
    }

    #[test]
    fn children_are_contiguous_and_breadth_first() {
        let mut builder = StateGraphBuilder::new("g", table());
        let root = builder.add_state(None, "Root");
        let a = builder.add_state(Some(root), "A");
        let a1 = builder.add_state(Some(a), "A1");
        let b = builder.add_state(Some(root), "B");
        builder.add_task(a1, Box::new(AlwaysSucceed::new("a1")));
        builder.add_task(b, Box::new(AlwaysSucceed::new("b")));
        builder.on_success(a1, TargetDraft::GotoState("B".to_string()));

        let graph = builder.build().expect("build");
        let names: Vec<&str> = graph.states().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Root", "A", "B", "A1"]);
        assert_eq!(graph.states()[0].children, IndexRange::new(1, 3));
        assert_eq!(graph.states()[1].children, IndexRange::new(3, 4));
        assert_eq!(graph.states()[3].parent, StateHandle(1));
        assert_eq!(
            graph.states()[3].on_success,
            TransitionTarget::new(TransitionKind::GotoState, StateHandle(2))
        );
        // tasks follow state order, so B's task precedes A1's
        assert_eq!(graph.states()[2].tasks, IndexRange::new(0, 1));
        assert_eq!(graph.tasks()[1].name(), "a1");
        assert!(graph.is_ready_to_run());
    }

    #[test]
    fn next_state_resolves_to_following_sibling() {
        let mut builder = StateGraphBuilder::new("g", table());
        let root = builder.add_state(None, "Root");
        let a = builder.add_state(Some(root), "A");
        let b = builder.add_state(Some(root), "B");
        builder.on_success(a, TargetDraft::NextState);
        builder.on_success(b, TargetDraft::NextState);
        let graph = builder.build().expect("build");
        assert_eq!(graph.states()[1].on_success.state, StateHandle(2));
        assert_eq!(graph.states()[2].on_success.state, StateHandle::INVALID);
    }

    #[test]
    fn conditions_resolve_variables_and_constants() {
        let mut builder = StateGraphBuilder::new("g", table());
        let root = builder.add_state(None, "Root");
        let a = builder.add_state(Some(root), "A");
        builder.add_enter_condition(a, ConditionDraft::new("hp", Comparator::Greater, "limit"));
        let graph = builder.build().expect("build");
        let condition = graph.conditions()[0];
        assert_eq!(condition.kind, crate::core::variables::VariableKind::Int);
        assert_eq!(condition.right, graph.variables().handle("limit").expect("limit"));
        assert_eq!(graph.states()[1].enter_conditions, IndexRange::new(0, 1));
    }

    #[test]
    fn all_resolution_errors_are_reported_together() {
        let mut builder = StateGraphBuilder::new("g", table());
        let root = builder.add_state(None, "Root");
        let a = builder.add_state(Some(root), "A");
        builder.add_state(Some(root), "A");
        builder.add_enter_condition(a, ConditionDraft::new("hp", Comparator::Equal, "alert"));
        builder.add_enter_condition(a, ConditionDraft::new("alert", Comparator::Less, "alert"));
        builder.add_transition(
            a,
            vec![ConditionDraft::new("ghost", Comparator::Equal, "hp")],
            TargetDraft::GotoState("Nowhere".to_string()),
        );

        let errors = builder.build().expect_err("should fail");
        assert!(errors.iter().any(|e| e.contains("duplicate state name 'A'")));
        assert!(errors.iter().any(|e| e.contains("cannot compare int 'hp' with bool 'alert'")));
        assert!(errors.iter().any(|e| e.contains("'<' is not defined for bool")));
        assert!(errors.iter().any(|e| e.contains("unknown variable 'ghost'")));
        assert!(errors.iter().any(|e| e.contains("unknown target state 'Nowhere'")));
    }

    #[test]
    fn multiple_roots_are_rejected() {
        let mut builder = StateGraphBuilder::new("g", table());
        builder.add_state(None, "One");
        builder.add_state(None, "Two");
        let errors = builder.build().expect_err("should fail");
        assert_eq!(errors, ["graph needs exactly one root state, found 2"]);
    }
}
