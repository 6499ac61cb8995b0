//! I/O helpers for statetree commands.

pub mod config;
pub mod graph_store;
