//! Stable exit codes for statetree CLI commands.

/// Command succeeded, or the run ended `Succeeded`.
pub const OK: i32 = 0;
/// Invalid graph, config or arguments, or any other error.
pub const INVALID: i32 = 1;
/// The run ended `Failed`.
pub const FAILED: i32 = 2;
/// The run was still `Running` when the tick budget ran out.
pub const RUNNING: i32 = 3;
