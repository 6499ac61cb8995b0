//! `statetree validate` and `statetree layout`.

use std::path::Path;

use anyhow::{Context, Result, anyhow};

use crate::core::graph::StateGraph;
use crate::io::graph_store::load_graph;

/// Summary of a graph that loaded, validated and linked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOutcome {
    pub name: String,
    pub states: usize,
    pub tasks: usize,
    pub evaluators: usize,
    pub records: usize,
    pub instance_bytes: usize,
}

/// One record slot of the graph's instance data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutRow {
    pub index: usize,
    /// Evaluator or task occupying the slot.
    pub node: String,
    pub offset: u32,
    pub size: usize,
    pub alignment: usize,
    pub type_name: Option<&'static str>,
}

pub fn validate_graph_file(path: &Path) -> Result<ValidateOutcome> {
    let graph = load_graph(path).with_context(|| format!("validate {}", path.display()))?;
    Ok(summarize(&graph))
}

pub fn summarize(graph: &StateGraph) -> ValidateOutcome {
    let data = graph.default_instance();
    ValidateOutcome {
        name: graph.name().to_string(),
        states: graph.states().len(),
        tasks: graph.tasks().len(),
        evaluators: graph.evaluators().len(),
        records: data.num_items(),
        instance_bytes: data.size(),
    }
}

/// Record slots in layout order: evaluators first, then tasks.
pub fn layout_rows(graph: &StateGraph) -> Result<Vec<LayoutRow>> {
    let layout = graph
        .default_instance()
        .layout()
        .ok_or_else(|| anyhow!("graph '{}' has no instance layout", graph.name()))?;
    let names = graph
        .evaluators()
        .iter()
        .map(|evaluator| format!("evaluator:{}", evaluator.name()))
        .chain(graph.tasks().iter().map(|task| format!("task:{}", task.name())));
    Ok(layout
        .items()
        .iter()
        .zip(names)
        .enumerate()
        .map(|(index, (item, node))| LayoutRow {
            index,
            node,
            offset: item.offset,
            size: item.size(),
            alignment: item.alignment(),
            type_name: item.descriptor.map(|d| d.type_name()),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::compile::StateGraphBuilder;
    use crate::core::types::RunStatus;
    use crate::core::variables::{VariableTable, VariableValue};
    use crate::tasks::{FinishTask, TickCounter, WaitTask};

    #[test]
    fn layout_rows_name_each_slot() {
        let table = VariableTable::builder()
            .variable("ticks", VariableValue::Int(0))
            .finish()
            .expect("table");
        let ticks = table.handle("ticks").expect("ticks");
        let mut builder = StateGraphBuilder::new("g", table);
        let root = builder.add_state(None, "Root");
        builder
            .add_evaluator(Box::new(TickCounter::new("counter", ticks)))
            .add_task(root, Box::new(FinishTask::new("done", RunStatus::Succeeded)))
            .add_task(root, Box::new(WaitTask::new("wait", 1.0)));
        let graph = builder.build().expect("build");

        let rows = layout_rows(&graph).expect("rows");
        let nodes: Vec<&str> = rows.iter().map(|r| r.node.as_str()).collect();
        assert_eq!(nodes, ["evaluator:counter", "task:done", "task:wait"]);
        assert_eq!(rows[1].size, 0);
        assert!(rows[1].type_name.is_none());
        assert_eq!(rows[2].offset % rows[2].alignment as u32, 0);

        let summary = summarize(&graph);
        assert_eq!(summary.records, 3);
        assert_eq!(summary.instance_bytes, 8);
    }
}
