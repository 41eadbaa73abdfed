//! Stable exit codes for converge CLI commands.

/// Command succeeded; for `apply`, every reached step was skipped or applied.
pub const OK: i32 = 0;
/// Invalid invocation, config or step catalog, or any other error before a run.
pub const INVALID: i32 = 1;
/// `converge apply` halted on a failed step.
pub const FAILED: i32 = 2;
/// `converge apply` found the run lock held by another live process.
pub const LOCKED: i32 = 3;
