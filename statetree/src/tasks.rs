//! Built-in tasks, evaluators and the transcript heap object.
//!
//! Per-activation working memory (timers, counters) lives in instance-data
//! records rather than in the task objects, so a snapshot of an instance's
//! data captures where every task is.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::core::arena::{InstanceObject, RecordValue};
use crate::core::task::{Evaluator, ExecutionContext, Task};
use crate::core::types::{Owner, RunStatus};
use crate::core::variables::{VariableHandle, VariableValue};

/// Object slot the transcript occupies in every graph built from JSON.
pub const TRANSCRIPT_SLOT: usize = 0;

/// Lines written by [`LogTask`], one list per instance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Transcript {
    owner: String,
    lines: Vec<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn push(&mut self, line: String) {
        self.lines.push(line);
    }
}

impl InstanceObject for Transcript {
    fn duplicate(&self, owner: &Owner) -> Box<dyn InstanceObject> {
        Box::new(Self {
            owner: owner.name.clone(),
            lines: self.lines.clone(),
        })
    }

    fn identical(&self, other: &dyn InstanceObject) -> bool {
        other
            .as_any()
            .downcast_ref::<Transcript>()
            .is_some_and(|other| other.lines == self.lines)
    }

    fn snapshot(&self) -> Value {
        json!({ "owner": self.owner, "lines": self.lines })
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// Ends immediately with a fixed status.
#[derive(Debug, Clone)]
pub struct FinishTask {
    name: String,
    status: RunStatus,
}

impl FinishTask {
    pub fn new(name: impl Into<String>, status: RunStatus) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }
}

impl Task for FinishTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn duplicate(&self) -> Box<dyn Task> {
        Box::new(self.clone())
    }

    fn tick(&mut self, _ctx: &mut ExecutionContext<'_>, _dt: f32) -> RunStatus {
        self.status
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaitState {
    pub elapsed: f32,
}

/// Runs until `seconds` of tick time have accumulated.
#[derive(Debug, Clone)]
pub struct WaitTask {
    name: String,
    seconds: f32,
}

impl WaitTask {
    pub fn new(name: impl Into<String>, seconds: f32) -> Self {
        Self {
            name: name.into(),
            seconds,
        }
    }
}

impl Task for WaitTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn instance_record(&self) -> RecordValue {
        RecordValue::new(WaitState::default())
    }

    fn duplicate(&self) -> Box<dyn Task> {
        Box::new(self.clone())
    }

    fn activate(&mut self, ctx: &mut ExecutionContext<'_>) {
        if let Some(state) = ctx.record::<WaitState>() {
            state.elapsed = 0.0;
        }
    }

    fn tick(&mut self, ctx: &mut ExecutionContext<'_>, dt: f32) -> RunStatus {
        let Some(state) = ctx.record::<WaitState>() else {
            return RunStatus::Failed;
        };
        state.elapsed += dt;
        if state.elapsed >= self.seconds {
            RunStatus::Succeeded
        } else {
            RunStatus::Running
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickCount {
    pub ticks: u32,
}

/// Reports `Running` for `ticks` ticks, then `then`.
#[derive(Debug, Clone)]
pub struct RunTicksTask {
    name: String,
    ticks: u32,
    then: RunStatus,
}

impl RunTicksTask {
    pub fn new(name: impl Into<String>, ticks: u32, then: RunStatus) -> Self {
        Self {
            name: name.into(),
            ticks,
            then,
        }
    }
}

impl Task for RunTicksTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn instance_record(&self) -> RecordValue {
        RecordValue::new(TickCount::default())
    }

    fn duplicate(&self) -> Box<dyn Task> {
        Box::new(self.clone())
    }

    fn activate(&mut self, ctx: &mut ExecutionContext<'_>) {
        if let Some(count) = ctx.record::<TickCount>() {
            count.ticks = 0;
        }
    }

    fn tick(&mut self, ctx: &mut ExecutionContext<'_>, _dt: f32) -> RunStatus {
        let Some(count) = ctx.record::<TickCount>() else {
            return RunStatus::Failed;
        };
        if count.ticks >= self.ticks {
            return self.then;
        }
        count.ticks += 1;
        RunStatus::Running
    }
}

/// Writes a value into the variable pool; fails on constant handles.
#[derive(Debug, Clone)]
pub struct SetVariableTask {
    name: String,
    handle: VariableHandle,
    value: VariableValue,
}

impl SetVariableTask {
    pub fn new(name: impl Into<String>, handle: VariableHandle, value: VariableValue) -> Self {
        Self {
            name: name.into(),
            handle,
            value,
        }
    }
}

impl Task for SetVariableTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn duplicate(&self) -> Box<dyn Task> {
        Box::new(self.clone())
    }

    fn tick(&mut self, ctx: &mut ExecutionContext<'_>, _dt: f32) -> RunStatus {
        let written = match self.value {
            VariableValue::Bool(v) => ctx.set_value(self.handle, v),
            VariableValue::Int(v) => ctx.set_value(self.handle, v),
            VariableValue::Float(v) => ctx.set_value(self.handle, v),
            VariableValue::Vector(v) => ctx.set_value(self.handle, v),
            VariableValue::Object(v) => ctx.set_value(self.handle, v),
        };
        if written {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        }
    }
}

/// Appends `[state] message` to the instance transcript.
#[derive(Debug, Clone)]
pub struct LogTask {
    name: String,
    message: String,
}

impl LogTask {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl Task for LogTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn duplicate(&self) -> Box<dyn Task> {
        Box::new(self.clone())
    }

    fn tick(&mut self, ctx: &mut ExecutionContext<'_>, _dt: f32) -> RunStatus {
        let line = format!("[{}] {}", ctx.state_name(), self.message);
        info!(owner = %ctx.owner().name, "{line}");
        match ctx.object::<Transcript>(TRANSCRIPT_SLOT) {
            Some(transcript) => {
                transcript.push(line);
                RunStatus::Succeeded
            }
            None => RunStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    pub value: i32,
}

/// Publishes the number of ticks since start into an int variable.
#[derive(Debug, Clone)]
pub struct TickCounter {
    name: String,
    handle: VariableHandle,
}

impl TickCounter {
    pub fn new(name: impl Into<String>, handle: VariableHandle) -> Self {
        Self {
            name: name.into(),
            handle,
        }
    }
}

impl Evaluator for TickCounter {
    fn name(&self) -> &str {
        &self.name
    }

    fn instance_record(&self) -> RecordValue {
        RecordValue::new(Counter::default())
    }

    fn duplicate(&self) -> Box<dyn Evaluator> {
        Box::new(self.clone())
    }

    fn activate(&mut self, ctx: &mut ExecutionContext<'_>) {
        if let Some(counter) = ctx.record::<Counter>() {
            counter.value = 0;
        }
        if !ctx.set_value(self.handle, 0i32) {
            warn!(
                evaluator = %self.name,
                handle = self.handle.0,
                "tick counter target is not writable"
            );
        }
    }

    fn tick(&mut self, ctx: &mut ExecutionContext<'_>, _dt: f32) {
        let Some(counter) = ctx.record::<Counter>() else {
            return;
        };
        counter.value = counter.value.saturating_add(1);
        let value = counter.value;
        ctx.set_value(self.handle, value);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Clock {
    pub seconds: f32,
}

/// Publishes accumulated tick time into a float variable.
#[derive(Debug, Clone)]
pub struct ElapsedTime {
    name: String,
    handle: VariableHandle,
}

impl ElapsedTime {
    pub fn new(name: impl Into<String>, handle: VariableHandle) -> Self {
        Self {
            name: name.into(),
            handle,
        }
    }
}

impl Evaluator for ElapsedTime {
    fn name(&self) -> &str {
        &self.name
    }

    fn instance_record(&self) -> RecordValue {
        RecordValue::new(Clock::default())
    }

    fn duplicate(&self) -> Box<dyn Evaluator> {
        Box::new(self.clone())
    }

    fn activate(&mut self, ctx: &mut ExecutionContext<'_>) {
        if let Some(clock) = ctx.record::<Clock>() {
            clock.seconds = 0.0;
        }
        if !ctx.set_value(self.handle, 0.0f32) {
            warn!(
                evaluator = %self.name,
                handle = self.handle.0,
                "elapsed time target is not writable"
            );
        }
    }

    fn tick(&mut self, ctx: &mut ExecutionContext<'_>, dt: f32) {
        let Some(clock) = ctx.record::<Clock>() else {
            return;
        };
        clock.seconds += dt;
        let seconds = clock.seconds;
        ctx.set_value(self.handle, seconds);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::compile::{ConditionDraft, StateGraphBuilder, TargetDraft};
    use crate::core::condition::Comparator;
    use crate::core::execution::RuntimeInstance;
    use crate::core::variables::VariableTable;

    #[test]
    fn wait_task_keeps_elapsed_time_in_instance_data() {
        let mut builder = StateGraphBuilder::new("g", VariableTable::default());
        let root = builder.add_state(None, "Wait");
        builder
            .add_task(root, Box::new(WaitTask::new("wait", 0.25)))
            .on_success(root, TargetDraft::Succeeded);
        let graph = Arc::new(builder.build().expect("build"));
        let slot = graph.task_slot(0);

        let mut instance = RuntimeInstance::new();
        assert!(instance.init(Owner::new("t"), graph));
        instance.start();
        assert_eq!(instance.tick(0.1), RunStatus::Running);
        let state = instance.instance_data().get::<WaitState>(slot).expect("record");
        assert!((state.elapsed - 0.1).abs() < 1e-6);
        assert_eq!(instance.tick(0.1), RunStatus::Running);
        assert_eq!(instance.tick(0.1), RunStatus::Succeeded);
    }

    #[test]
    fn evaluator_drives_transition_through_a_variable() {
        let table = VariableTable::builder()
            .variable("ticks", VariableValue::Int(0))
            .constant("three", VariableValue::Int(3))
            .finish()
            .expect("table");
        let ticks = table.handle("ticks").expect("ticks");
        let mut builder = StateGraphBuilder::new("g", table);
        let root = builder.add_state(None, "Idle");
        builder
            .add_evaluator(Box::new(TickCounter::new("counter", ticks)))
            .add_task(root, Box::new(RunTicksTask::new("idle", 100, RunStatus::Failed)))
            .add_transition(
                root,
                vec![ConditionDraft::new("ticks", Comparator::GreaterOrEqual, "three")],
                TargetDraft::Succeeded,
            );
        let graph = Arc::new(builder.build().expect("build"));
        assert_eq!(graph.evaluator_slot(0), 0);
        assert_eq!(graph.task_slot(0), 1);

        let mut instance = RuntimeInstance::new();
        assert!(instance.init(Owner::new("t"), graph));
        instance.start();
        assert_eq!(instance.tick(0.1), RunStatus::Running);
        assert_eq!(instance.tick(0.1), RunStatus::Running);
        assert_eq!(instance.tick(0.1), RunStatus::Succeeded);
        assert_eq!(instance.get_value(ticks, 0i32), 3);
    }

    #[test]
    fn log_task_writes_to_the_instance_transcript_only() {
        let mut builder = StateGraphBuilder::new("g", VariableTable::default());
        let root = builder.add_state(None, "Greet");
        builder
            .add_object(Box::new(Transcript::new()))
            .add_task(root, Box::new(LogTask::new("log", "hello")))
            .on_success(root, TargetDraft::Succeeded);
        let graph = Arc::new(builder.build().expect("build"));

        let mut instance = RuntimeInstance::new();
        assert!(instance.init(Owner::new("alice"), graph.clone()));
        instance.start();
        assert_eq!(instance.tick(0.0), RunStatus::Succeeded);

        let transcript = instance
            .instance_data()
            .object::<Transcript>(TRANSCRIPT_SLOT)
            .expect("transcript");
        assert_eq!(transcript.owner(), "alice");
        assert_eq!(transcript.lines(), ["[Greet] hello"]);
        let template = graph
            .default_instance()
            .object::<Transcript>(TRANSCRIPT_SLOT)
            .expect("template");
        assert!(template.lines().is_empty());
    }

    #[test]
    fn set_variable_fails_on_constants() {
        let table = VariableTable::builder()
            .variable("flag", VariableValue::Bool(false))
            .constant("fixed", VariableValue::Bool(true))
            .finish()
            .expect("table");
        let fixed = table.handle("fixed").expect("fixed");
        let mut builder = StateGraphBuilder::new("g", table);
        let root = builder.add_state(None, "Set");
        builder.add_task(
            root,
            Box::new(SetVariableTask::new("set", fixed, VariableValue::Bool(false))),
        );
        builder.on_failure(root, TargetDraft::Failed);
        let graph = Arc::new(builder.build().expect("build"));

        let mut instance = RuntimeInstance::new();
        assert!(instance.init(Owner::new("t"), graph));
        instance.start();
        assert_eq!(instance.tick(0.1), RunStatus::Failed);
        assert!(instance.get_value(fixed, false));
    }

    #[test]
    fn evaluator_on_a_constant_keeps_counting_without_writing() {
        let table = VariableTable::builder()
            .constant("fixed", VariableValue::Int(7))
            .finish()
            .expect("table");
        let fixed = table.handle("fixed").expect("fixed");
        let mut builder = StateGraphBuilder::new("g", table);
        let root = builder.add_state(None, "Idle");
        builder
            .add_evaluator(Box::new(TickCounter::new("counter", fixed)))
            .add_task(root, Box::new(RunTicksTask::new("idle", 100, RunStatus::Failed)));
        let graph = Arc::new(builder.build().expect("build"));
        let slot = graph.evaluator_slot(0);

        let mut instance = RuntimeInstance::new();
        assert!(instance.init(Owner::new("t"), graph));
        instance.start();
        assert_eq!(instance.tick(0.1), RunStatus::Running);
        assert_eq!(instance.tick(0.1), RunStatus::Running);
        assert_eq!(instance.get_value(fixed, 0i32), 7);
        let counter = instance.instance_data().get::<Counter>(slot).expect("record");
        assert_eq!(counter.value, 2);
    }
}
