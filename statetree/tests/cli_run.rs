//! CLI tests for `statetree run` and `statetree validate`.
//!
//! Spawns the statetree binary and verifies exit codes match expected values
//! for succeeded, failed, budget-exhausted, and invalid graphs.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::{Value, json};
use statetree::exit_codes;

fn write_graph(dir: &Path, graph: &Value) -> PathBuf {
    let path = dir.join("graph.json");
    fs::write(&path, graph.to_string()).expect("write graph");
    path
}

fn single_task(kind: &str) -> Value {
    json!({
        "name": "single",
        "root": {
            "name": "Root",
            "tasks": [{"kind": kind}],
            "on_success": "succeeded",
            "on_failure": "failed"
        }
    })
}

fn statetree(dir: &Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_statetree"));
    command.current_dir(dir);
    command
}

#[test]
fn run_succeeded_exits_ok() {
    let temp = tempfile::tempdir().expect("tempdir");
    let graph = write_graph(temp.path(), &single_task("succeed"));

    let status = statetree(temp.path())
        .arg("run")
        .arg(&graph)
        .status()
        .expect("statetree run");

    assert_eq!(status.code(), Some(exit_codes::OK));
}

#[test]
fn run_failed_exits_with_failed_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let graph = write_graph(temp.path(), &single_task("fail"));

    let status = statetree(temp.path())
        .arg("run")
        .arg(&graph)
        .status()
        .expect("statetree run");

    assert_eq!(status.code(), Some(exit_codes::FAILED));
}

#[test]
fn run_out_of_ticks_exits_with_running_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let graph = write_graph(
        temp.path(),
        &json!({
            "name": "spin",
            "root": {
                "name": "Root",
                "tasks": [{"kind": "run_ticks", "ticks": 100}],
                "on_success": "succeeded"
            }
        }),
    );

    let output = statetree(temp.path())
        .args(["run", "--max-ticks", "3"])
        .arg(&graph)
        .output()
        .expect("statetree run");

    assert_eq!(output.status.code(), Some(exit_codes::RUNNING));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("tick 3: running state=Root"), "{stdout}");
    assert!(stdout.contains("still running after 3 ticks"));
}

#[test]
fn config_file_sets_the_tick_budget() {
    let temp = tempfile::tempdir().expect("tempdir");
    let graph = write_graph(
        temp.path(),
        &json!({
            "name": "spin",
            "root": {
                "name": "Root",
                "tasks": [{"kind": "run_ticks", "ticks": 100}],
                "on_success": "succeeded"
            }
        }),
    );
    fs::write(temp.path().join("statetree.toml"), "max_ticks = 2\n").expect("write config");

    let output = statetree(temp.path())
        .arg("run")
        .arg(&graph)
        .output()
        .expect("statetree run");

    assert_eq!(output.status.code(), Some(exit_codes::RUNNING));
    assert!(String::from_utf8_lossy(&output.stdout).contains("still running after 2 ticks"));
}

#[test]
fn validate_rejects_unknown_goto_target() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut graph = single_task("succeed");
    graph["root"]["on_success"] = json!({"goto": "Nowhere"});
    let graph = write_graph(temp.path(), &graph);

    let output = statetree(temp.path())
        .arg("validate")
        .arg(&graph)
        .output()
        .expect("statetree validate");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown target state 'Nowhere'"), "{stderr}");
}

#[test]
fn validate_accepts_a_well_formed_graph() {
    let temp = tempfile::tempdir().expect("tempdir");
    let graph = write_graph(temp.path(), &single_task("succeed"));

    let output = statetree(temp.path())
        .arg("validate")
        .arg(&graph)
        .output()
        .expect("statetree validate");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("ok: single (1 states"));
}

#[test]
fn run_writes_snapshot() {
    let temp = tempfile::tempdir().expect("tempdir");
    let graph = write_graph(
        temp.path(),
        &json!({
            "name": "patrol",
            "variables": [{"name": "ticks", "type": "int"}],
            "constants": [{"name": "limit", "type": "int", "value": 3}],
            "evaluators": [{"kind": "tick_counter", "variable": "ticks"}],
            "root": {
                "name": "Root",
                "transitions": [
                    {"to": "succeeded", "conditions": [{"left": "ticks", "op": "greater_or_equal", "right": "limit"}]}
                ],
                "children": [{
                    "name": "Patrol",
                    "tasks": [{"kind": "log", "message": "walking"}, {"kind": "run_ticks", "ticks": 10}]
                }]
            }
        }),
    );
    let snapshot_path = temp.path().join("out").join("snapshot.json");

    let status = statetree(temp.path())
        .arg("run")
        .arg(&graph)
        .arg("--snapshot")
        .arg(&snapshot_path)
        .status()
        .expect("statetree run");
    assert_eq!(status.code(), Some(exit_codes::OK));

    let snapshot: Value =
        serde_json::from_str(&fs::read_to_string(&snapshot_path).expect("read snapshot"))
            .expect("parse snapshot");
    assert_eq!(snapshot["status"], "succeeded");
    assert_eq!(snapshot["ticks"], 3);
    assert_eq!(snapshot["variables"]["ticks"], json!({"type": "int", "value": 3}));
    assert!(snapshot["variables"].get("limit").is_none());
    assert_eq!(snapshot["instance"]["objects"][0]["lines"][0], "[Patrol] walking");
}

#[test]
fn schema_prints_bundled_schema() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = statetree(temp.path())
        .arg("schema")
        .output()
        .expect("statetree schema");
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let schema: Value = serde_json::from_slice(&output.stdout).expect("schema json");
    assert!(schema.get("$defs").is_some());
}
