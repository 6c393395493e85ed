//! Stable exit codes for storyloop CLI commands.

/// Command succeeded, or `select` found an eligible story.
pub const OK: i32 = 0;
/// Invalid feature id, missing specs, missing or corrupt PRD, bad config, or any
/// other fatal error.
pub const INVALID: i32 = 1;
/// `storyloop select` found no eligible story.
pub const COMPLETE: i32 = 2;
/// `storyloop run` finished with at least one story in `fail`.
pub const STORIES_FAILED: i32 = 3;
