//! Hierarchical state-machine execution engine.
//!
//! A state graph is compiled once into flat, read-only arrays and shared
//! between any number of runtime instances. Each instance keeps its task and
//! evaluator working memory in a single aligned instance-data block and its
//! scratch variables in a byte pool. The crate is split in two:
//!
//! - **[`core`]**: Pure, deterministic logic (layout, arena, graph, execution).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Config and graph files on disk.
//!
//! [`graph_def`] and [`tasks`] turn JSON graphs into runnable graphs;
//! [`run`] and [`validate`] back the CLI commands.

pub mod core;
pub mod exit_codes;
pub mod graph_def;
pub mod io;
pub mod logging;
pub mod run;
pub mod tasks;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
