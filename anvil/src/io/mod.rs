//! I/O helpers for anvil commands.

pub mod backend;
pub mod config;
pub mod executor;
pub mod fsutil;
pub mod git;
pub mod init;
pub mod manifest;
pub mod model_config;
pub mod process;
pub mod prompt;
pub mod state;
pub mod transcript;
