//! JSON graph definitions and their compilation into a [`StateGraph`].
//!
//! Structural shape is enforced by the JSON schema; this module checks what a
//! schema cannot: identifier syntax, unique names, known variables, typed
//! values and comparisons. Every problem is reported, not just the first.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::compile::{ConditionDraft, DraftId, StateGraphBuilder, TargetDraft};
use crate::core::condition::Comparator;
use crate::core::graph::StateGraph;
use crate::core::task::{Evaluator, Task};
use crate::core::types::RunStatus;
use crate::core::variables::{
    ObjectRef, VariableHandle, VariableKind, VariableTable, VariableValue, Vec3,
};
use crate::tasks::{
    ElapsedTime, FinishTask, LogTask, RunTicksTask, SetVariableTask, TickCounter, Transcript,
    WaitTask,
};

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDef {
    pub name: String,
    #[serde(default)]
    pub variables: Vec<VariableDef>,
    #[serde(default)]
    pub constants: Vec<ConstantDef>,
    #[serde(default)]
    pub evaluators: Vec<EvaluatorDef>,
    pub root: StateDef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: VariableKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: VariableKind,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluatorDef {
    TickCounter { variable: String },
    ElapsedTime { variable: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enter_conditions: Vec<ConditionDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<TransitionDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<TargetDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<TargetDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<StateDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionDef {
    pub left: String,
    pub op: Comparator,
    pub right: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionDef {
    pub to: TargetDef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetDef {
    Keyword(TargetKeyword),
    Goto { goto: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKeyword {
    Succeeded,
    Failed,
    NextState,
    SelectChild,
    NotSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub action: TaskAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskAction {
    Succeed,
    Fail,
    Wait { seconds: f32 },
    RunTicks {
        ticks: u32,
        #[serde(default = "default_then")]
        then: RunStatus,
    },
    SetVariable { variable: String, value: Value },
    Log { message: String },
}

fn default_then() -> RunStatus {
    RunStatus::Succeeded
}

impl TaskAction {
    fn label(&self) -> &'static str {
        match self {
            TaskAction::Succeed => "succeed",
            TaskAction::Fail => "fail",
            TaskAction::Wait { .. } => "wait",
            TaskAction::RunTicks { .. } => "run_ticks",
            TaskAction::SetVariable { .. } => "set_variable",
            TaskAction::Log { .. } => "log",
        }
    }
}

impl TargetDef {
    fn to_draft(&self) -> TargetDraft {
        match self {
            TargetDef::Keyword(TargetKeyword::Succeeded) => TargetDraft::Succeeded,
            TargetDef::Keyword(TargetKeyword::Failed) => TargetDraft::Failed,
            TargetDef::Keyword(TargetKeyword::NextState) => TargetDraft::NextState,
            TargetDef::Keyword(TargetKeyword::SelectChild) => TargetDraft::SelectChildState,
            TargetDef::Keyword(TargetKeyword::NotSet) => TargetDraft::NotSet,
            TargetDef::Goto { goto } => TargetDraft::GotoState(goto.clone()),
        }
    }
}

/// Decode a JSON literal as a value of `kind`.
pub fn parse_value(kind: VariableKind, value: &Value) -> Result<VariableValue, String> {
    let parsed = match kind {
        VariableKind::Bool => value.as_bool().map(VariableValue::Bool),
        VariableKind::Int => value
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(VariableValue::Int),
        VariableKind::Float => value.as_f64().map(|v| VariableValue::Float(v as f32)),
        // `{x, y, z}` or `[x, y, z]`
        VariableKind::Vector => serde_json::from_value::<Vec3>(value.clone())
            .ok()
            .map(VariableValue::Vector),
        VariableKind::Object => value.as_u64().map(|id| VariableValue::Object(ObjectRef(id))),
    };
    parsed.ok_or_else(|| format!("{value} is not a valid {kind}"))
}

#[derive(Debug, Clone, Copy)]
struct Binding {
    kind: VariableKind,
    constant: bool,
}

impl GraphDef {
    /// Semantic checks beyond the schema.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut bindings: HashMap<&str, Binding> = HashMap::new();

        check_identifier("graph", &self.name, &mut errors);
        for variable in &self.variables {
            check_identifier("variable", &variable.name, &mut errors);
            if let Some(default) = &variable.default
                && let Err(err) = parse_value(variable.kind, default)
            {
                errors.push(format!("variable '{}': {err}", variable.name));
            }
            bind(&mut bindings, &variable.name, variable.kind, false, &mut errors);
        }
        for constant in &self.constants {
            check_identifier("constant", &constant.name, &mut errors);
            if let Err(err) = parse_value(constant.kind, &constant.value) {
                errors.push(format!("constant '{}': {err}", constant.name));
            }
            bind(&mut bindings, &constant.name, constant.kind, true, &mut errors);
        }
        for evaluator in &self.evaluators {
            let (label, variable, kind) = match evaluator {
                EvaluatorDef::TickCounter { variable } => {
                    ("tick_counter", variable, VariableKind::Int)
                }
                EvaluatorDef::ElapsedTime { variable } => {
                    ("elapsed_time", variable, VariableKind::Float)
                }
            };
            check_writable(label, variable, kind, &bindings, &mut errors);
        }

        let mut names = HashSet::new();
        let mut stack = vec![(&self.root, self.root.name.clone())];
        let mut all_states = Vec::new();
        while let Some((state, path)) = stack.pop() {
            check_identifier("state", &state.name, &mut errors);
            if !names.insert(state.name.as_str()) {
                errors.push(format!("duplicate state name '{}' at {path}", state.name));
            }
            all_states.push((state, path.clone()));
            for child in state.children.iter().rev() {
                stack.push((child, format!("{path}/{}", child.name)));
            }
        }

        for (state, path) in &all_states {
            let conditions = state
                .enter_conditions
                .iter()
                .chain(state.transitions.iter().flat_map(|t| t.conditions.iter()));
            for condition in conditions {
                check_condition(path, condition, &bindings, &mut errors);
            }
            let targets = state
                .transitions
                .iter()
                .map(|t| &t.to)
                .chain(state.on_success.iter())
                .chain(state.on_failure.iter());
            for target in targets {
                if let TargetDef::Goto { goto } = target
                    && !names.contains(goto.as_str())
                {
                    errors.push(format!("{path}: unknown target state '{goto}'"));
                }
            }
            for task in &state.tasks {
                check_task(path, task, &bindings, &mut errors);
            }
        }
        errors
    }

    pub fn variable_table(&self) -> Result<VariableTable, Vec<String>> {
        let mut builder = VariableTable::builder();
        let mut errors = Vec::new();
        for variable in &self.variables {
            let value = match &variable.default {
                Some(default) => parse_value(variable.kind, default),
                None => Ok(VariableValue::zero(variable.kind)),
            };
            match value {
                Ok(value) => {
                    builder.variable(variable.name.clone(), value);
                }
                Err(err) => errors.push(format!("variable '{}': {err}", variable.name)),
            }
        }
        for constant in &self.constants {
            match parse_value(constant.kind, &constant.value) {
                Ok(value) => {
                    builder.constant(constant.name.clone(), value);
                }
                Err(err) => errors.push(format!("constant '{}': {err}", constant.name)),
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }
        builder.finish().map_err(|err| vec![err])
    }

    /// Validate, then build and link the runnable graph.
    pub fn compile(&self) -> Result<StateGraph, Vec<String>> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(errors);
        }
        let variables = self.variable_table()?;
        let mut evaluators: Vec<Box<dyn Evaluator>> = Vec::new();
        for evaluator in &self.evaluators {
            let built: Box<dyn Evaluator> = match evaluator {
                EvaluatorDef::TickCounter { variable } => Box::new(TickCounter::new(
                    "tick_counter",
                    lookup(&variables, variable)?,
                )),
                EvaluatorDef::ElapsedTime { variable } => Box::new(ElapsedTime::new(
                    "elapsed_time",
                    lookup(&variables, variable)?,
                )),
            };
            evaluators.push(built);
        }

        let mut tasks_by_state = Vec::new();
        let mut stack = vec![&self.root];
        while let Some(state) = stack.pop() {
            let mut tasks: Vec<Box<dyn Task>> = Vec::new();
            for task in &state.tasks {
                tasks.push(build_task(task, &variables)?);
            }
            tasks_by_state.push((state, tasks));
            stack.extend(state.children.iter().rev());
        }

        let mut builder = StateGraphBuilder::new(self.name.clone(), variables);
        builder.add_object(Box::new(Transcript::new()));
        for evaluator in evaluators {
            builder.add_evaluator(evaluator);
        }
        // Depth-first, parents before children; ids follow the same order.
        let mut ids: HashMap<&str, DraftId> = HashMap::new();
        let parents = parent_names(&self.root);
        for (state, tasks) in tasks_by_state {
            let parent = parents
                .get(state.name.as_str())
                .and_then(|parent| ids.get(parent))
                .copied();
            let id = builder.add_state(parent, state.name.clone());
            ids.insert(state.name.as_str(), id);
            for task in tasks {
                builder.add_task(id, task);
            }
            for condition in &state.enter_conditions {
                builder.add_enter_condition(id, condition.to_draft());
            }
            for transition in &state.transitions {
                let conditions = transition
                    .conditions
                    .iter()
                    .map(ConditionDef::to_draft)
                    .collect();
                builder.add_transition(id, conditions, transition.to.to_draft());
            }
            if let Some(target) = &state.on_success {
                builder.on_success(id, target.to_draft());
            }
            if let Some(target) = &state.on_failure {
                builder.on_failure(id, target.to_draft());
            }
        }
        builder.build()
    }
}

impl ConditionDef {
    fn to_draft(&self) -> ConditionDraft {
        ConditionDraft::new(self.left.clone(), self.op, self.right.clone())
    }
}

fn parent_names(root: &StateDef) -> HashMap<&str, &str> {
    let mut parents = HashMap::new();
    let mut stack = vec![root];
    while let Some(state) = stack.pop() {
        for child in &state.children {
            parents.insert(child.name.as_str(), state.name.as_str());
            stack.push(child);
        }
    }
    parents
}

fn lookup(variables: &VariableTable, name: &str) -> Result<VariableHandle, Vec<String>> {
    variables
        .handle(name)
        .ok_or_else(|| vec![format!("unknown variable '{name}'")])
}

fn build_task(task: &TaskDef, variables: &VariableTable) -> Result<Box<dyn Task>, Vec<String>> {
    let name = task
        .name
        .clone()
        .unwrap_or_else(|| task.action.label().to_string());
    let task: Box<dyn Task> = match &task.action {
        TaskAction::Succeed => Box::new(FinishTask::new(name, RunStatus::Succeeded)),
        TaskAction::Fail => Box::new(FinishTask::new(name, RunStatus::Failed)),
        TaskAction::Wait { seconds } => Box::new(WaitTask::new(name, *seconds)),
        TaskAction::RunTicks { ticks, then } => Box::new(RunTicksTask::new(name, *ticks, *then)),
        TaskAction::SetVariable { variable, value } => {
            let target = lookup(variables, variable)?;
            let kind = variables
                .kind_of(target)
                .ok_or_else(|| vec![format!("unknown variable '{variable}'")])?;
            let value = parse_value(kind, value).map_err(|err| vec![err])?;
            Box::new(SetVariableTask::new(name, target, value))
        }
        TaskAction::Log { message } => Box::new(LogTask::new(name, message.clone())),
    };
    Ok(task)
}

fn check_identifier(what: &str, name: &str, errors: &mut Vec<String>) {
    if !IDENTIFIER.is_match(name) {
        errors.push(format!("{what} name '{name}' is not a valid identifier"));
    }
}

fn bind<'a>(
    bindings: &mut HashMap<&'a str, Binding>,
    name: &'a str,
    kind: VariableKind,
    constant: bool,
    errors: &mut Vec<String>,
) {
    if bindings.insert(name, Binding { kind, constant }).is_some() {
        errors.push(format!("duplicate variable name '{name}'"));
    }
}

fn check_writable(
    owner: &str,
    variable: &str,
    kind: VariableKind,
    bindings: &HashMap<&str, Binding>,
    errors: &mut Vec<String>,
) {
    match bindings.get(variable) {
        None => errors.push(format!("{owner}: unknown variable '{variable}'")),
        Some(binding) if binding.constant => {
            errors.push(format!("{owner}: '{variable}' is a constant"));
        }
        Some(binding) if binding.kind != kind => errors.push(format!(
            "{owner}: '{variable}' is {}, expected {kind}",
            binding.kind
        )),
        Some(_) => {}
    }
}

fn check_condition(
    path: &str,
    condition: &ConditionDef,
    bindings: &HashMap<&str, Binding>,
    errors: &mut Vec<String>,
) {
    let left = bindings.get(condition.left.as_str());
    let right = bindings.get(condition.right.as_str());
    for (name, binding) in [(&condition.left, left), (&condition.right, right)] {
        if binding.is_none() {
            errors.push(format!("{path}: unknown variable '{name}'"));
        }
    }
    let (Some(left), Some(right)) = (left, right) else {
        return;
    };
    if left.kind != right.kind {
        errors.push(format!(
            "{path}: cannot compare {} '{}' with {} '{}'",
            left.kind, condition.left, right.kind, condition.right
        ));
    } else if !condition.op.is_valid_for(left.kind) {
        errors.push(format!(
            "{path}: '{}' is not defined for {}",
            condition.op, left.kind
        ));
    }
}

fn check_task(
    path: &str,
    task: &TaskDef,
    bindings: &HashMap<&str, Binding>,
    errors: &mut Vec<String>,
) {
    match &task.action {
        TaskAction::Wait { seconds } if !seconds.is_finite() || *seconds < 0.0 => {
            errors.push(format!("{path}: wait seconds must be finite and >= 0"));
        }
        TaskAction::RunTicks { then, .. } if *then == RunStatus::Running => {
            errors.push(format!("{path}: run_ticks must end succeeded or failed"));
        }
        TaskAction::SetVariable { variable, value } => match bindings.get(variable.as_str()) {
            None => errors.push(format!("{path}: unknown variable '{variable}'")),
            Some(binding) if binding.constant => {
                errors.push(format!("{path}: cannot set constant '{variable}'"));
            }
            Some(binding) => {
                if let Err(err) = parse_value(binding.kind, value) {
                    errors.push(format!("{path}: set_variable '{variable}': {err}"));
                }
            }
        },
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "name": "patrol",
            "variables": [
                {"name": "ticks", "type": "int"},
                {"name": "alert", "type": "bool", "default": false}
            ],
            "constants": [
                {"name": "limit", "type": "int", "value": 3},
                {"name": "yes", "type": "bool", "value": true}
            ],
            "evaluators": [{"kind": "tick_counter", "variable": "ticks"}],
            "root": {
                "name": "Root",
                "transitions": [
                    {"to": "succeeded", "conditions": [{"left": "ticks", "op": "greater_or_equal", "right": "limit"}]}
                ],
                "children": [
                    {
                        "name": "Patrol",
                        "tasks": [{"kind": "log", "message": "walking"}, {"kind": "run_ticks", "ticks": 10}],
                        "on_success": {"goto": "Rest"}
                    },
                    {"name": "Rest", "tasks": [{"kind": "succeed", "name": "nap"}], "on_success": "not_set"}
                ]
            }
        })
    }

    #[test]
    fn sample_parses_and_compiles() {
        let def: GraphDef = serde_json::from_value(sample()).expect("parse");
        assert_eq!(def.root.children[1].tasks[0].name.as_deref(), Some("nap"));
        assert_eq!(
            def.root.children[0].on_success,
            Some(TargetDef::Goto {
                goto: "Rest".to_string()
            })
        );
        assert!(def.validate().is_empty());
        let graph = def.compile().expect("compile");
        assert_eq!(graph.states().len(), 3);
        assert_eq!(graph.tasks().len(), 3);
        assert_eq!(graph.evaluators().len(), 1);
        assert!(graph.is_ready_to_run());
    }

    #[test]
    fn semantic_errors_are_collected() {
        let mut value = sample();
        value["root"]["children"][1]["name"] = json!("Patrol");
        value["root"]["children"][0]["on_success"] = json!({"goto": "Nowhere"});
        value["root"]["transitions"][0]["conditions"][0]["right"] = json!("yes");
        value["evaluators"][0]["variable"] = json!("limit");
        value["variables"][1]["name"] = json!("9lives");
        let def: GraphDef = serde_json::from_value(value).expect("parse");

        let errors = def.validate();
        let has = |needle: &str| errors.iter().any(|err| err.contains(needle));
        assert!(has("duplicate state name 'Patrol'"), "{errors:?}");
        assert!(has("unknown target state 'Nowhere'"));
        assert!(has("cannot compare int 'ticks' with bool 'yes'"));
        assert!(has("tick_counter: 'limit' is a constant"));
        assert!(has("variable name '9lives' is not a valid identifier"));
        assert!(def.compile().is_err());
    }

    #[test]
    fn values_parse_per_kind() {
        assert_eq!(
            parse_value(VariableKind::Vector, &json!([1.0, 2.0, 3.0])),
            Ok(VariableValue::Vector(Vec3::new(1.0, 2.0, 3.0)))
        );
        assert_eq!(
            parse_value(VariableKind::Vector, &json!({"x": 1.0, "y": 0.0, "z": -1.0})),
            Ok(VariableValue::Vector(Vec3::new(1.0, 0.0, -1.0)))
        );
        assert_eq!(
            parse_value(VariableKind::Object, &json!(7)),
            Ok(VariableValue::Object(ObjectRef(7)))
        );
        assert!(parse_value(VariableKind::Int, &json!(5_000_000_000i64)).is_err());
        assert!(parse_value(VariableKind::Bool, &json!(1)).is_err());
    }

    #[test]
    fn target_keywords_round_trip_through_json() {
        let targets: Vec<TargetDef> =
            serde_json::from_value(json!(["next_state", "select_child", {"goto": "A"}]))
                .expect("parse");
        assert_eq!(targets[0].to_draft(), TargetDraft::NextState);
        assert_eq!(targets[1].to_draft(), TargetDraft::SelectChildState);
        assert_eq!(targets[2].to_draft(), TargetDraft::GotoState("A".to_string()));
    }
}
