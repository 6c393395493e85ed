//! Specification-driven story loop.
//!
//! Compiles a feature's markdown specifications into a PRD work queue
//! (`specs/<feature-id>/prd.json`) and drives a plan → edit → test → review
//! pipeline over its stories until the feature is complete or attempts run out.
//!
//! - **[`core`]**: Pure, deterministic logic (spec parsing, merge, selection,
//!   state transitions). No I/O.
//! - **[`io`]**: Side-effecting adapters (filesystem, git, child processes).
//! - **[`agents`]**: Planner, coder and reviewer capabilities.
//!
//! Orchestration modules ([`generate`], [`step`], [`looping`], [`select`],
//! [`reset`]) coordinate core logic with I/O to implement CLI commands.

pub mod agents;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod generate;
pub mod io;
pub mod logging;
pub mod looping;
pub mod pipeline;
pub mod prd;
pub mod reset;
pub mod select;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
