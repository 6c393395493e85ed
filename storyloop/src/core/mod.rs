//! Deterministic, pure logic shared by the loop and the generator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod context;
pub mod feature;
pub mod invariants;
pub mod merge;
pub mod selector;
pub mod spec_parse;
pub mod state_update;
