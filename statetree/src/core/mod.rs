//! Deterministic execution core.
//!
//! Core modules are free of I/O. They lay out instance memory, compile and
//! link state graphs, and step runtime instances; errors come back as
//! `String`/`Vec<String>` and runtime failures as [`types::RunStatus`].
//!
//! Only [`descriptor`] and [`arena`] touch raw memory.

pub mod arena;
pub mod compile;
pub mod condition;
pub mod descriptor;
pub mod execution;
pub mod graph;
pub mod invariants;
pub mod layout;
pub mod task;
pub mod types;
pub mod variables;
