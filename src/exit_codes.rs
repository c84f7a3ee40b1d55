//! Stable exit codes for autopr CLI commands.

/// Pipeline finished with the PR ready for review, or the planner produced no
/// plan (a diagnostic is printed and nothing is pushed in that case).
pub const OK: i32 = 0;
/// Missing/invalid configuration, VCS failure, step failure, or test repairs
/// exhausted.
pub const ABORT: i32 = 1;
