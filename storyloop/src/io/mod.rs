//! I/O adapters for storyloop commands.

pub mod config;
pub mod git;
pub mod iteration_log;
pub mod paths;
pub mod prd_store;
pub mod process;
pub mod prompt;
pub mod spec_store;
pub mod test_runner;
