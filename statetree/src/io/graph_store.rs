//! Graph loading with schema + semantic validation, and snapshot output.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::graph::StateGraph;
use crate::graph_def::GraphDef;
use crate::io::config::write_atomic;

/// JSON schema every graph file must satisfy.
pub const GRAPH_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/state_graph/v1.schema.json"
));

/// Read, schema-check and semantically validate a graph definition.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_graph_def(path: &Path) -> Result<GraphDef> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read graph {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse graph {}", path.display()))?;
    validate_schema(&value)?;
    let def: GraphDef = serde_json::from_value(value)
        .with_context(|| format!("deserialize graph {}", path.display()))?;
    let errors = def.validate();
    if !errors.is_empty() {
        return Err(anyhow!("graph validation failed: {}", errors.join("; ")));
    }
    debug!(graph = %def.name, "graph definition loaded");
    Ok(def)
}

/// Load a graph file and compile it into a linked, runnable graph.
pub fn load_graph(path: &Path) -> Result<StateGraph> {
    let def = load_graph_def(path)?;
    def.compile()
        .map_err(|errors| anyhow!("graph link failed: {}", errors.join("; ")))
        .with_context(|| format!("compile graph {}", path.display()))
}

/// Pretty JSON written atomically, newline terminated.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize json")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn validate_schema(graph: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(GRAPH_SCHEMA).context("parse graph schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(graph) {
        let messages = compiled
            .iter_errors(graph)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "graph schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(dir: &Path, value: &Value) -> std::path::PathBuf {
        let path = dir.join("graph.json");
        fs::write(&path, value.to_string()).expect("write graph");
        path
    }

    fn minimal() -> Value {
        json!({
            "name": "minimal",
            "root": {
                "name": "Root",
                "tasks": [{"kind": "succeed"}],
                "on_success": "succeeded"
            }
        })
    }

    #[test]
    fn loads_and_links_minimal_graph() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write(temp.path(), &minimal());
        let graph = load_graph(&path).expect("load");
        assert_eq!(graph.name(), "minimal");
        assert!(graph.is_ready_to_run());
    }

    /// Unknown fields are caught by the schema before deserialization.
    #[test]
    fn schema_rejects_unknown_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut value = minimal();
        value["root"]["colour"] = json!("red");
        let path = write(temp.path(), &value);
        let err = load_graph_def(&path).expect_err("should fail");
        assert!(format!("{err:#}").contains("graph schema validation failed"));
    }

    #[test]
    fn semantic_errors_surface_after_schema_passes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut value = minimal();
        value["root"]["on_success"] = json!({"goto": "Missing"});
        let path = write(temp.path(), &value);
        let err = load_graph_def(&path).expect_err("should fail");
        assert!(format!("{err:#}").contains("unknown target state 'Missing'"));
    }

    #[test]
    fn write_json_replaces_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("out.json");
        write_json(&path, &json!({"a": 1})).expect("first");
        write_json(&path, &json!({"a": 2})).expect("second");
        let text = fs::read_to_string(&path).expect("read");
        assert!(text.contains("\"a\": 2"));
        assert!(text.ends_with('\n'));
    }
}
