//! Stable exit codes for gamesmith CLI commands.

/// Command succeeded or the task completed.
pub const OK: i32 = 0;
/// Command failed due to invalid config, arguments or setup.
pub const INVALID: i32 = 1;
/// The task ended `FAILED` (step ceiling, cancellation, nothing to run).
pub const FAILED: i32 = 2;
/// The task ended `ERROR` (supervisor failure or internal error).
pub const ERROR: i32 = 3;
