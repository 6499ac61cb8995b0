//! Test-only tasks and graph builders.

use std::sync::{Arc, Mutex};

use crate::core::compile::{StateGraphBuilder, TargetDraft};
use crate::core::graph::StateGraph;
use crate::core::task::{Evaluator, ExecutionContext, Task};
use crate::core::types::RunStatus;
use crate::core::variables::VariableTable;

/// Shared, ordered record of task lifecycle calls.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: impl Into<String>) {
        if let Ok(mut events) = self.0.lock() {
            events.push(event.into());
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().map(|events| events.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.0.lock() {
            events.clear();
        }
    }
}

/// Replays a fixed list of statuses, one per tick, restarting on activation.
/// The last status repeats once the script runs out.
#[derive(Debug, Clone)]
pub struct ScriptedTask {
    name: String,
    script: Vec<RunStatus>,
    cursor: usize,
    log: EventLog,
}

impl ScriptedTask {
    pub fn new(name: &str, script: impl IntoIterator<Item = RunStatus>, log: EventLog) -> Self {
        Self {
            name: name.to_string(),
            script: script.into_iter().collect(),
            cursor: 0,
            log,
        }
    }
}

impl Task for ScriptedTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn duplicate(&self) -> Box<dyn Task> {
        Box::new(Self {
            cursor: 0,
            ..self.clone()
        })
    }

    fn activate(&mut self, _ctx: &mut ExecutionContext<'_>) {
        self.cursor = 0;
        self.log.record(format!("activate {}", self.name));
    }

    fn deactivate(&mut self, _ctx: &mut ExecutionContext<'_>) {
        self.log.record(format!("deactivate {}", self.name));
    }

    fn tick(&mut self, _ctx: &mut ExecutionContext<'_>, _dt: f32) -> RunStatus {
        let status = self
            .script
            .get(self.cursor)
            .or(self.script.last())
            .copied()
            .unwrap_or(RunStatus::Succeeded);
        self.cursor += 1;
        self.log.record(format!("tick {} {}", self.name, status));
        status
    }
}

/// Succeeds on its first tick.
#[derive(Debug, Clone)]
pub struct AlwaysSucceed {
    name: String,
}

impl AlwaysSucceed {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Task for AlwaysSucceed {
    fn name(&self) -> &str {
        &self.name
    }

    fn duplicate(&self) -> Box<dyn Task> {
        Box::new(self.clone())
    }

    fn tick(&mut self, _ctx: &mut ExecutionContext<'_>, _dt: f32) -> RunStatus {
        RunStatus::Succeeded
    }
}

/// Records activate, tick and deactivate calls.
#[derive(Debug, Clone)]
pub struct LoggingEvaluator {
    name: String,
    log: EventLog,
}

impl LoggingEvaluator {
    pub fn new(name: &str, log: EventLog) -> Self {
        Self {
            name: name.to_string(),
            log,
        }
    }
}

impl Evaluator for LoggingEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn duplicate(&self) -> Box<dyn Evaluator> {
        Box::new(self.clone())
    }

    fn activate(&mut self, _ctx: &mut ExecutionContext<'_>) {
        self.log.record(format!("activate {}", self.name));
    }

    fn deactivate(&mut self, _ctx: &mut ExecutionContext<'_>) {
        self.log.record(format!("deactivate {}", self.name));
    }

    fn tick(&mut self, _ctx: &mut ExecutionContext<'_>, _dt: f32) {
        self.log.record(format!("tick {}", self.name));
    }
}

/// `Root(router) -> A -> B -> Succeeded`, each leaf with one succeeding task.
pub fn two_step_graph() -> Arc<StateGraph> {
    let mut builder = StateGraphBuilder::new("two_step", VariableTable::default());
    let root = builder.add_state(None, "Root");
    let a = builder.add_state(Some(root), "A");
    let b = builder.add_state(Some(root), "B");
    builder
        .add_task(a, Box::new(AlwaysSucceed::new("a")))
        .add_task(b, Box::new(AlwaysSucceed::new("b")))
        .on_success(a, TargetDraft::GotoState("B".to_string()))
        .on_success(b, TargetDraft::Succeeded);
    Arc::new(builder.build().expect("two_step graph builds"))
}
