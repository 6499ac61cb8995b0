//! The compiled, immutable state graph.
//!
//! States are stored flat with the root at index 0. Each state's children
//! occupy a contiguous range of the state array, and its tasks, transitions and
//! enter conditions are ranges into their own flat arrays. After [`StateGraph::link`]
//! succeeds the graph is read-only and shared between instances behind an `Arc`.

use std::fmt;

use tracing::{debug, error};

use crate::core::arena::{InstanceData, InstanceObject, RecordValue};
use crate::core::condition::Condition;
use crate::core::invariants::validate_graph;
use crate::core::task::{Evaluator, Task};
use crate::core::types::{IndexRange, Owner, StateHandle, TransitionKind, TransitionTarget};
use crate::core::variables::{ConstantTable, VariableTable};

#[derive(Debug, Clone, PartialEq)]
pub struct StateNode {
    pub name: String,
    pub parent: StateHandle,
    pub children: IndexRange,
    pub tasks: IndexRange,
    pub transitions: IndexRange,
    pub enter_conditions: IndexRange,
    pub on_success: TransitionTarget,
    pub on_failure: TransitionTarget,
}

impl StateNode {
    /// A state without tasks only routes selection to its children.
    pub fn is_router(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    pub conditions: IndexRange,
    pub target: StateHandle,
    pub kind: TransitionKind,
}

/// Raw compiled arrays, before linking.
#[derive(Debug, Default)]
pub struct GraphParts {
    pub name: String,
    pub states: Vec<StateNode>,
    pub transitions: Vec<TransitionRule>,
    pub conditions: Vec<Condition>,
    pub variables: VariableTable,
    pub evaluators: Vec<Box<dyn Evaluator>>,
    pub tasks: Vec<Box<dyn Task>>,
    pub objects: Vec<Box<dyn InstanceObject>>,
}

pub struct StateGraph {
    name: String,
    states: Vec<StateNode>,
    transitions: Vec<TransitionRule>,
    conditions: Vec<Condition>,
    variables: VariableTable,
    evaluators: Vec<Box<dyn Evaluator>>,
    tasks: Vec<Box<dyn Task>>,
    objects: Vec<Box<dyn InstanceObject>>,
    default_instance: InstanceData,
    linked: bool,
}

impl StateGraph {
    /// Unlinked graph; call [`StateGraph::link`] before running it.
    pub fn from_parts(parts: GraphParts) -> Self {
        Self {
            name: parts.name,
            states: parts.states,
            transitions: parts.transitions,
            conditions: parts.conditions,
            variables: parts.variables,
            evaluators: parts.evaluators,
            tasks: parts.tasks,
            objects: parts.objects,
            default_instance: InstanceData::new(),
            linked: false,
        }
    }

    /// Resolve node references and assemble the default instance data.
    ///
    /// Record slots are ordered evaluators first, then tasks, in array order.
    pub fn link(&mut self) -> Result<(), Vec<String>> {
        self.linked = false;
        self.default_instance.reset();

        let errors = validate_graph(self);
        if !errors.is_empty() {
            for err in &errors {
                error!(graph = %self.name, "link failure: {err}");
            }
            return Err(errors);
        }

        let values: Vec<RecordValue> = self
            .evaluators
            .iter()
            .map(|evaluator| evaluator.instance_record())
            .chain(self.tasks.iter().map(|task| task.instance_record()))
            .collect();
        let owner = Owner::new(self.name.clone());
        if let Err(err) = self
            .default_instance
            .initialize(&owner, &values, &self.objects)
        {
            error!(graph = %self.name, "link failure: {err}");
            return Err(vec![format!("instance data: {err}")]);
        }

        self.linked = true;
        debug!(
            graph = %self.name,
            states = self.states.len(),
            records = self.default_instance.num_items(),
            bytes = self.default_instance.size(),
            "graph linked"
        );
        Ok(())
    }

    /// At least one state and a successfully linked default instance.
    pub fn is_ready_to_run(&self) -> bool {
        !self.states.is_empty() && self.linked && self.default_instance.is_allocated()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn states(&self) -> &[StateNode] {
        &self.states
    }

    pub fn state(&self, handle: StateHandle) -> Option<&StateNode> {
        self.states.get(handle.index())
    }

    pub fn transitions(&self) -> &[TransitionRule] {
        &self.transitions
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn transitions_of(&self, node: &StateNode) -> &[TransitionRule] {
        self.transitions
            .get(node.transitions.as_usize())
            .unwrap_or(&[])
    }

    pub fn conditions_in(&self, range: IndexRange) -> &[Condition] {
        self.conditions.get(range.as_usize()).unwrap_or(&[])
    }

    pub fn children_of(&self, node: &StateNode) -> impl DoubleEndedIterator<Item = StateHandle> {
        node.children.iter().map(StateHandle)
    }

    pub fn variables(&self) -> &VariableTable {
        &self.variables
    }

    pub fn constants(&self) -> &ConstantTable {
        self.variables.constants()
    }

    pub fn evaluators(&self) -> &[Box<dyn Evaluator>] {
        &self.evaluators
    }

    pub fn tasks(&self) -> &[Box<dyn Task>] {
        &self.tasks
    }

    pub fn default_instance(&self) -> &InstanceData {
        &self.default_instance
    }

    pub fn evaluator_slot(&self, index: usize) -> usize {
        index
    }

    pub fn task_slot(&self, index: usize) -> usize {
        self.evaluators.len() + index
    }

    pub fn find_state(&self, name: &str) -> Option<StateHandle> {
        self.states
            .iter()
            .position(|state| state.name == name)
            .map(|index| StateHandle(index as u16))
    }

    /// `/`-separated names from the root down to `handle`.
    pub fn state_path(&self, handle: StateHandle) -> Option<String> {
        if !handle.is_valid() {
            return None;
        }
        let mut names = Vec::new();
        let mut cursor = handle;
        while cursor.is_valid() {
            let node = self.state(cursor)?;
            names.push(node.name.as_str());
            if names.len() > self.states.len() {
                return None;
            }
            cursor = node.parent;
        }
        names.reverse();
        Some(names.join("/"))
    }
}

impl fmt::Debug for StateGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateGraph")
            .field("name", &self.name)
            .field("states", &self.states.len())
            .field("transitions", &self.transitions.len())
            .field("conditions", &self.conditions.len())
            .field("evaluators", &self.evaluators.len())
            .field("tasks", &self.tasks.len())
            .field("linked", &self.linked)
            .finish()
    }
}
