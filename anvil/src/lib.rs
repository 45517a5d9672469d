//! Autonomous build-loop orchestrator.
//!
//! Anvil drives a generative coding agent through a bounded build loop (the
//! inner loop) and wraps it in an unbounded supervisor (the outer loop) that
//! learns from failures, switches models and rebuilds the environment.
//!
//! - **[`core`]**: Pure, deterministic logic (completion scanning, prompt
//!   composition, switch policy, error-signal extraction). No I/O.
//! - **[`io`]**: Side-effecting operations (filesystem, git, child processes,
//!   model backend HTTP). Isolated behind traits to enable doubles in tests.
//!
//! Orchestration modules ([`inner`], [`outer`], [`registry`], [`analyzer`])
//! coordinate core logic with I/O to implement CLI commands.

pub mod analyzer;
pub mod core;
pub mod exit_codes;
pub mod inner;
pub mod io;
pub mod logging;
pub mod outer;
pub mod registry;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
