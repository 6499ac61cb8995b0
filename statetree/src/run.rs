//! Tick loop for `statetree run`.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use serde::Serialize;
use tracing::info;

use crate::core::arena::InstanceSnapshot;
use crate::core::execution::RuntimeInstance;
use crate::core::graph::StateGraph;
use crate::core::types::{Owner, RunStatus};
use crate::core::variables::VariableValue;
use crate::io::config::RunConfig;

/// Why `run_graph` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStop {
    Succeeded,
    Failed,
    /// Still running after `max_ticks` ticks.
    TickBudgetExhausted { max_ticks: u32 },
}

/// One line of run progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u32,
    pub status: RunStatus,
    pub state: Option<String>,
    pub task: Option<String>,
}

/// Final instance state, written by `statetree run --snapshot`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSnapshot {
    pub graph: String,
    pub owner: String,
    pub status: RunStatus,
    pub ticks: u32,
    pub variables: BTreeMap<String, VariableValue>,
    pub instance: InstanceSnapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub ticks: u32,
    pub stop: RunStop,
    pub snapshot: RunSnapshot,
}

/// Init, start, and tick an instance of `graph` until it ends or the tick
/// budget runs out. A still-running instance is stopped before returning.
pub fn run_graph<F: FnMut(&TickReport)>(
    graph: Arc<StateGraph>,
    config: &RunConfig,
    mut on_tick: F,
) -> Result<RunOutcome> {
    config.validate()?;
    let mut instance = RuntimeInstance::new();
    if !instance.init(Owner::new(config.owner.clone()), graph.clone()) {
        return Err(anyhow!("graph '{}' is not ready to run", graph.name()));
    }
    instance.start();
    info!(graph = graph.name(), owner = %config.owner, "run started");

    let mut ticks = 0u32;
    let mut status = RunStatus::Running;
    while status == RunStatus::Running && ticks < config.max_ticks {
        status = instance.tick(config.tick_delta_secs);
        ticks += 1;
        on_tick(&TickReport {
            tick: ticks,
            status,
            state: instance.current_state_path(),
            task: instance.current_task().map(str::to_string),
        });
    }

    let stop = match status {
        RunStatus::Succeeded => RunStop::Succeeded,
        RunStatus::Failed => RunStop::Failed,
        RunStatus::Running => RunStop::TickBudgetExhausted {
            max_ticks: config.max_ticks,
        },
    };
    let snapshot = snapshot(&instance, &graph, config, status, ticks)?;
    if status == RunStatus::Running {
        instance.stop();
    }
    info!(graph = graph.name(), ticks, ?stop, "run finished");
    Ok(RunOutcome {
        ticks,
        stop,
        snapshot,
    })
}

fn snapshot(
    instance: &RuntimeInstance,
    graph: &StateGraph,
    config: &RunConfig,
    status: RunStatus,
    ticks: u32,
) -> Result<RunSnapshot> {
    let variables = graph
        .variables()
        .entries()
        .iter()
        .filter(|entry| !entry.constant)
        .filter_map(|entry| {
            VariableValue::read(entry.kind, instance.variables(), graph.constants(), entry.handle)
                .map(|value| (entry.name.clone(), value))
        })
        .collect();
    let data = instance
        .instance_data()
        .serialize()
        .map_err(|err| anyhow!("serialize instance data: {err}"))?;
    Ok(RunSnapshot {
        graph: graph.name().to_string(),
        owner: config.owner.clone(),
        status,
        ticks,
        variables,
        instance: data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::compile::StateGraphBuilder;
    use crate::core::variables::VariableTable;
    use crate::test_support::{EventLog, ScriptedTask, two_step_graph};

    #[test]
    fn reports_every_tick_until_success() {
        let mut reports = Vec::new();
        let outcome = run_graph(two_step_graph(), &RunConfig::default(), |report| {
            reports.push(report.clone());
        })
        .expect("run");
        assert_eq!(outcome.stop, RunStop::Succeeded);
        assert_eq!(outcome.ticks, 2);
        assert_eq!(reports[0].state.as_deref(), Some("Root/A"));
        assert_eq!(reports[1].status, RunStatus::Succeeded);
        assert_eq!(outcome.snapshot.status, RunStatus::Succeeded);
    }

    #[test]
    fn budget_exhaustion_stops_the_instance() {
        let log = EventLog::new();
        let mut builder = StateGraphBuilder::new("spin", VariableTable::default());
        let root = builder.add_state(None, "Spin");
        builder.add_task(
            root,
            Box::new(ScriptedTask::new("spin", [RunStatus::Running], log.clone())),
        );
        let graph = Arc::new(builder.build().expect("build"));
        let config = RunConfig {
            max_ticks: 3,
            ..RunConfig::default()
        };
        let outcome = run_graph(graph, &config, |_| {}).expect("run");
        assert_eq!(outcome.stop, RunStop::TickBudgetExhausted { max_ticks: 3 });
        assert_eq!(outcome.ticks, 3);
        assert_eq!(log.events().last().map(String::as_str), Some("deactivate spin"));
    }
}
