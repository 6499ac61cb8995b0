//! Runtime instance of a linked [`StateGraph`].
//!
//! One instance owns its own copy of every task and evaluator, its instance
//! data block and its variable pool; the graph itself is shared read-only.
//! An instance is single threaded. Separate instances of one graph may run on
//! separate threads.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::core::arena::InstanceData;
use crate::core::condition::all_pass;
use crate::core::graph::{StateGraph, StateNode};
use crate::core::task::{Evaluator, ExecutionContext, Task};
use crate::core::types::{Owner, RunStatus, StateHandle, TransitionKind, TransitionTarget};
use crate::core::variables::{PoolValue, VariableHandle, VariablePool};

/// Outcome of next-state resolution for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    /// Stay in the current state.
    Keep,
    Enter(StateHandle),
    Finish(RunStatus),
    /// A transition fired but led nowhere.
    Unresolved,
}

pub struct RuntimeInstance {
    owner: Option<Owner>,
    graph: Option<Arc<StateGraph>>,
    evaluators: Vec<Box<dyn Evaluator>>,
    tasks: Vec<Box<dyn Task>>,
    data: InstanceData,
    variables: VariablePool,
    current_state: StateHandle,
    current_task: Option<usize>,
    next_task: Option<usize>,
    activation_started: bool,
    last_state_status: RunStatus,
    run_status: RunStatus,
}

impl Default for RuntimeInstance {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeInstance {
    pub fn new() -> Self {
        Self {
            owner: None,
            graph: None,
            evaluators: Vec::new(),
            tasks: Vec::new(),
            data: InstanceData::new(),
            variables: VariablePool::default(),
            current_state: StateHandle::INVALID,
            current_task: None,
            next_task: None,
            activation_started: false,
            last_state_status: RunStatus::Running,
            run_status: RunStatus::Failed,
        }
    }

    /// Bind to `graph` for `owner`. On failure the instance stays inert and
    /// every later call is a no-op.
    pub fn init(&mut self, owner: Owner, graph: Arc<StateGraph>) -> bool {
        self.reset();
        if !graph.is_ready_to_run() {
            error!(owner = %owner.name, graph = graph.name(), "graph is not ready to run");
            return false;
        }

        self.data.copy_from(&owner, graph.default_instance());
        self.evaluators = graph.evaluators().iter().map(|e| e.duplicate()).collect();
        self.tasks = graph.tasks().iter().map(|t| t.duplicate()).collect();
        self.variables = VariablePool::from_bytes(graph.variables().pool_defaults().to_vec());
        debug!(
            owner = %owner.name,
            graph = graph.name(),
            tasks = self.tasks.len(),
            evaluators = self.evaluators.len(),
            "instance initialized"
        );
        self.owner = Some(owner);
        self.graph = Some(graph);
        true
    }

    /// Drop the graph binding and all per-instance state.
    pub fn reset(&mut self) {
        self.owner = None;
        self.graph = None;
        self.evaluators.clear();
        self.tasks.clear();
        self.data.reset();
        self.variables.clear();
        self.current_state = StateHandle::INVALID;
        self.current_task = None;
        self.next_task = None;
        self.activation_started = false;
        self.last_state_status = RunStatus::Running;
        self.run_status = RunStatus::Failed;
    }

    pub fn start(&mut self) -> RunStatus {
        let Some(graph) = self.graph.clone() else {
            return self.run_status;
        };
        if self.run_status == RunStatus::Running {
            self.exit_state(&graph);
        }
        for index in 0..self.evaluators.len() {
            self.run_evaluator(&graph, index, |evaluator, ctx| evaluator.activate(ctx));
        }
        self.current_state = StateHandle::INVALID;
        self.last_state_status = RunStatus::Running;
        self.run_status = RunStatus::Running;
        debug!(graph = graph.name(), "started");
        self.run_status
    }

    /// Halt at any time. A running instance ends `Succeeded`.
    pub fn stop(&mut self) -> RunStatus {
        let Some(graph) = self.graph.clone() else {
            return self.run_status;
        };
        self.exit_state(&graph);
        for index in 0..self.evaluators.len() {
            self.run_evaluator(&graph, index, |evaluator, ctx| evaluator.deactivate(ctx));
        }
        if self.run_status == RunStatus::Running {
            self.run_status = RunStatus::Succeeded;
        }
        debug!(graph = graph.name(), status = %self.run_status, "stopped");
        self.run_status
    }

    pub fn tick(&mut self, dt: f32) -> RunStatus {
        if self.run_status != RunStatus::Running || self.owner.is_none() {
            return self.run_status;
        }
        let Some(graph) = self.graph.clone() else {
            return self.run_status;
        };

        for index in 0..self.evaluators.len() {
            self.run_evaluator(&graph, index, |evaluator, ctx| evaluator.tick(ctx, dt));
        }

        let resolution = if !self.current_state.is_valid() {
            self.select_state(&graph, StateHandle::ROOT)
                .map_or(Resolution::Unresolved, Resolution::Enter)
        } else if self.last_state_status == RunStatus::Running {
            self.trigger_transitions(&graph, self.current_state)
        } else {
            self.trigger_default_transition(&graph, self.current_state, self.last_state_status)
        };

        match resolution {
            Resolution::Keep => {}
            Resolution::Enter(state) => {
                let completed = self.last_state_status != RunStatus::Running;
                if state != self.current_state || completed {
                    self.exit_state(&graph);
                    self.enter_state(&graph, state);
                }
            }
            Resolution::Finish(status) => {
                self.finish(&graph, status);
                return self.run_status;
            }
            Resolution::Unresolved => {
                debug!(graph = graph.name(), "no state could be selected");
                self.finish(&graph, RunStatus::Failed);
                return self.run_status;
            }
        }

        if !self.current_state.is_valid() {
            error!(graph = graph.name(), "no current state after resolution");
            self.run_status = RunStatus::Failed;
            return self.run_status;
        }

        let status = self.tick_state(&graph, dt);
        self.last_state_status = status;

        // A completed state whose default transition ends the run ends it now.
        // Anything else resolves next tick, after the evaluators have run.
        if status.is_terminal()
            && let Resolution::Finish(final_status) =
                self.trigger_default_transition(&graph, self.current_state, status)
        {
            self.finish(&graph, final_status);
        }
        self.run_status
    }

    /// Select `state`, or the first selectable state below it, in declared
    /// order. A state is selectable when its enter conditions pass and it owns
    /// tasks; stateless routers pass selection on to their children.
    pub fn select_state(&self, graph: &StateGraph, state: StateHandle) -> Option<StateHandle> {
        self.select_from(graph, vec![state])
    }

    /// First selectable child of `state`, in declared order.
    pub fn select_child_state(&self, graph: &StateGraph, state: StateHandle) -> Option<StateHandle> {
        let node = graph.state(state)?;
        self.select_from(graph, graph.children_of(node).rev().collect())
    }

    fn select_from(&self, graph: &StateGraph, mut stack: Vec<StateHandle>) -> Option<StateHandle> {
        while let Some(handle) = stack.pop() {
            let Some(node) = graph.state(handle) else {
                continue;
            };
            let conditions = graph.conditions_in(node.enter_conditions);
            if !all_pass(conditions, &self.variables, graph.constants()) {
                continue;
            }
            if self.has_tasks(graph, handle, node) {
                return Some(handle);
            }
            if node.children.is_empty() {
                debug!(state = %node.name, "router has no children to select");
            }
            stack.extend(graph.children_of(node).rev());
        }
        None
    }

    fn has_tasks(&self, graph: &StateGraph, handle: StateHandle, node: &StateNode) -> bool {
        if node.is_router() {
            return false;
        }
        if usize::from(node.tasks.end) > self.tasks.len() {
            warn!(
                state = graph.state_path(handle).as_deref().unwrap_or(&node.name),
                "state is missing its tasks, treating it as a router"
            );
            return false;
        }
        true
    }

    /// Walk from `state` up to the root, firing the first transition whose
    /// conditions pass. A fired `NotSet` rule stops the walk with no change.
    fn trigger_transitions(&self, graph: &StateGraph, state: StateHandle) -> Resolution {
        let mut cursor = state;
        while let Some(node) = graph.state(cursor) {
            for rule in graph.transitions_of(node) {
                let conditions = graph.conditions_in(rule.conditions);
                if !all_pass(conditions, &self.variables, graph.constants()) {
                    continue;
                }
                match rule.kind {
                    TransitionKind::GotoState | TransitionKind::NextState => {
                        if let Some(target) = self.select_state(graph, rule.target) {
                            return Resolution::Enter(target);
                        }
                    }
                    TransitionKind::SelectChildState => {
                        if let Some(target) = self.select_child_state(graph, cursor) {
                            return Resolution::Enter(target);
                        }
                    }
                    TransitionKind::NotSet => return Resolution::Keep,
                    TransitionKind::Succeeded => return Resolution::Finish(RunStatus::Succeeded),
                    TransitionKind::Failed => return Resolution::Finish(RunStatus::Failed),
                }
            }
            cursor = node.parent;
        }
        Resolution::Keep
    }

    /// On failure prefer the state's on-failure target, otherwise its
    /// on-success target.
    fn trigger_default_transition(
        &self,
        graph: &StateGraph,
        state: StateHandle,
        status: RunStatus,
    ) -> Resolution {
        let Some(node) = graph.state(state) else {
            return Resolution::Unresolved;
        };
        let target: TransitionTarget = if status == RunStatus::Failed && node.on_failure.is_set() {
            node.on_failure
        } else {
            node.on_success
        };
        let selected = match target.kind {
            TransitionKind::GotoState | TransitionKind::NextState => {
                self.select_state(graph, target.state)
            }
            TransitionKind::SelectChildState => self.select_child_state(graph, state),
            TransitionKind::Succeeded => return Resolution::Finish(RunStatus::Succeeded),
            TransitionKind::Failed => return Resolution::Finish(RunStatus::Failed),
            TransitionKind::NotSet => None,
        };
        selected.map_or(Resolution::Unresolved, Resolution::Enter)
    }

    /// Step the current state's tasks in order, one active at a time.
    fn tick_state(&mut self, graph: &StateGraph, dt: f32) -> RunStatus {
        let state = self.current_state;
        let Some(node) = graph.state(state) else {
            return RunStatus::Failed;
        };
        let range = node.tasks.as_usize();
        if range.is_empty() || range.end > self.tasks.len() {
            warn!(state = %node.name, "active state has no runnable tasks");
            return RunStatus::Failed;
        }

        if !self.activation_started {
            if let Some(stale) = self.current_task.take() {
                self.run_task(graph, state, stale, |task, ctx| task.deactivate(ctx));
            }
            self.next_task = Some(range.start);
            self.activation_started = true;
        }
        let next = self.next_task.unwrap_or(range.start);
        if self.current_task != Some(next) {
            if let Some(old) = self.current_task.take() {
                self.run_task(graph, state, old, |task, ctx| task.deactivate(ctx));
            }
            self.run_task(graph, state, next, |task, ctx| task.activate(ctx));
            self.current_task = Some(next);
        }

        let status = self
            .run_task(graph, state, next, |task, ctx| task.tick(ctx, dt))
            .unwrap_or(RunStatus::Failed);
        match status {
            RunStatus::Succeeded if next + 1 < range.end => {
                self.next_task = Some(next + 1);
                RunStatus::Running
            }
            RunStatus::Succeeded => {
                self.next_task = None;
                self.activation_started = false;
                RunStatus::Succeeded
            }
            other => other,
        }
    }

    fn enter_state(&mut self, graph: &StateGraph, state: StateHandle) {
        self.current_state = state;
        self.current_task = None;
        self.next_task = None;
        self.activation_started = false;
        self.last_state_status = RunStatus::Running;
        debug!(
            state = graph.state_path(state).as_deref().unwrap_or("?"),
            "entered state"
        );
    }

    fn exit_state(&mut self, graph: &StateGraph) {
        let state = self.current_state;
        if let Some(active) = self.current_task.take() {
            self.run_task(graph, state, active, |task, ctx| task.deactivate(ctx));
        }
        self.next_task = None;
        self.activation_started = false;
        if state.is_valid() {
            debug!(
                state = graph.state_path(state).as_deref().unwrap_or("?"),
                "exited state"
            );
        }
        self.current_state = StateHandle::INVALID;
    }

    fn finish(&mut self, graph: &StateGraph, status: RunStatus) {
        self.exit_state(graph);
        self.run_status = status;
        debug!(graph = graph.name(), %status, "run finished");
    }

    fn run_task<R>(
        &mut self,
        graph: &StateGraph,
        state: StateHandle,
        index: usize,
        f: impl FnOnce(&mut dyn Task, &mut ExecutionContext<'_>) -> R,
    ) -> Option<R> {
        let owner = self.owner.as_ref()?;
        let task = self.tasks.get_mut(index)?;
        let state_name = graph.state(state).map_or("", |node| node.name.as_str());
        let mut ctx = ExecutionContext::new(
            owner,
            state_name,
            graph.task_slot(index),
            &mut self.data,
            &mut self.variables,
            graph.constants(),
        );
        Some(f(task.as_mut(), &mut ctx))
    }

    fn run_evaluator<R>(
        &mut self,
        graph: &StateGraph,
        index: usize,
        f: impl FnOnce(&mut dyn Evaluator, &mut ExecutionContext<'_>) -> R,
    ) -> Option<R> {
        let owner = self.owner.as_ref()?;
        let evaluator = self.evaluators.get_mut(index)?;
        let mut ctx = ExecutionContext::new(
            owner,
            "",
            graph.evaluator_slot(index),
            &mut self.data,
            &mut self.variables,
            graph.constants(),
        );
        Some(f(evaluator.as_mut(), &mut ctx))
    }

    pub fn get_value<T: PoolValue>(&self, handle: VariableHandle, default: T) -> T {
        match &self.graph {
            Some(graph) => self.variables.get_value(graph.constants(), handle, default),
            None => default,
        }
    }

    pub fn set_value<T: PoolValue>(&mut self, handle: VariableHandle, value: T) -> bool {
        self.graph.is_some() && self.variables.set_value(handle, value)
    }

    pub fn run_status(&self) -> RunStatus {
        self.run_status
    }

    pub fn is_initialized(&self) -> bool {
        self.graph.is_some()
    }

    pub fn graph(&self) -> Option<&Arc<StateGraph>> {
        self.graph.as_ref()
    }

    pub fn instance_data(&self) -> &InstanceData {
        &self.data
    }

    pub fn variables(&self) -> &VariablePool {
        &self.variables
    }

    pub fn current_state(&self) -> StateHandle {
        self.current_state
    }

    pub fn current_state_path(&self) -> Option<String> {
        self.graph.as_ref()?.state_path(self.current_state)
    }

    /// Name of the active task, if any.
    pub fn current_task(&self) -> Option<&str> {
        self.current_task
            .and_then(|index| self.tasks.get(index))
            .map(|task| task.name())
    }

    pub fn debug_string(&self) -> String {
        let owner = self.owner.as_ref().map_or("<none>", |owner| owner.name.as_str());
        format!(
            "{owner}: {} state={} task={}",
            self.run_status,
            self.current_state_path().as_deref().unwrap_or("-"),
            self.current_task().unwrap_or("-")
        )
    }
}
