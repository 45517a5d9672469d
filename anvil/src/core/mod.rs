//! Deterministic, pure logic shared by the build loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod completion;
pub mod policy;
pub mod prompt;
pub mod signals;
pub mod types;
