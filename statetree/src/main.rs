//! Hierarchical state-machine runner.
//!
//! Loads a JSON state graph, validates it against the bundled schema, and
//! ticks a runtime instance of it until the run ends or the tick budget is
//! spent.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use statetree::exit_codes;
use statetree::io::config::{DEFAULT_CONFIG_FILE, load_config};
use statetree::io::graph_store::{GRAPH_SCHEMA, load_graph, write_json};
use statetree::run::{RunStop, run_graph};
use statetree::validate::{layout_rows, validate_graph_file};

#[derive(Parser)]
#[command(
    name = "statetree",
    version,
    about = "Hierarchical state-machine execution engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the JSON schema graph files must follow.
    Schema,
    /// Check a graph against the schema, name rules and link invariants.
    Validate { graph: PathBuf },
    /// Print the instance-data record slots of a graph.
    Layout { graph: PathBuf },
    /// Run a graph until it succeeds, fails, or the tick budget runs out.
    Run {
        graph: PathBuf,
        /// Config file (default: ./statetree.toml if present).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override `max_ticks` from the config.
        #[arg(long)]
        max_ticks: Option<u32>,
        /// Write the final instance snapshot as JSON.
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
}

fn main() {
    statetree::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Schema => {
            print!("{GRAPH_SCHEMA}");
            Ok(exit_codes::OK)
        }
        Command::Validate { graph } => cmd_validate(graph),
        Command::Layout { graph } => cmd_layout(graph),
        Command::Run {
            graph,
            config,
            max_ticks,
            snapshot,
        } => cmd_run(graph, config, max_ticks, snapshot),
    }
}

fn cmd_validate(graph: PathBuf) -> Result<i32> {
    let outcome = validate_graph_file(&graph)?;
    println!(
        "ok: {} ({} states, {} tasks, {} evaluators, {} records, {} bytes)",
        outcome.name,
        outcome.states,
        outcome.tasks,
        outcome.evaluators,
        outcome.records,
        outcome.instance_bytes
    );
    Ok(exit_codes::OK)
}

fn cmd_layout(graph: PathBuf) -> Result<i32> {
    let graph = load_graph(&graph)?;
    println!("index\toffset\tsize\talign\tnode\ttype");
    for row in layout_rows(&graph)? {
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            row.index,
            row.offset,
            row.size,
            row.alignment,
            row.node,
            row.type_name.unwrap_or("-")
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_run(
    graph_path: PathBuf,
    config_path: Option<PathBuf>,
    max_ticks: Option<u32>,
    snapshot_path: Option<PathBuf>,
) -> Result<i32> {
    let config_path = config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut config = load_config(&config_path)?;
    if let Some(max_ticks) = max_ticks {
        config.max_ticks = max_ticks;
    }
    let graph = Arc::new(load_graph(&graph_path)?);

    let outcome = run_graph(graph, &config, |report| {
        println!(
            "tick {}: {} state={} task={}",
            report.tick,
            report.status,
            report.state.as_deref().unwrap_or("-"),
            report.task.as_deref().unwrap_or("-")
        );
    })?;

    if let Some(path) = snapshot_path {
        write_json(&path, &outcome.snapshot)
            .with_context(|| format!("write snapshot {}", path.display()))?;
    }

    Ok(match outcome.stop {
        RunStop::Succeeded => {
            println!("succeeded after {} ticks", outcome.ticks);
            exit_codes::OK
        }
        RunStop::Failed => {
            println!("failed after {} ticks", outcome.ticks);
            exit_codes::FAILED
        }
        RunStop::TickBudgetExhausted { max_ticks } => {
            println!("still running after {max_ticks} ticks");
            exit_codes::RUNNING
        }
    })
}
