//! Stable exit codes for anvil CLI commands.

/// Command succeeded, or the watched completion token was detected.
pub const OK: i32 = 0;
/// The inner loop ran `max_iterations` without detecting completion.
pub const EXHAUSTED: i32 = 1;
/// Invalid configuration, missing inputs or other setup errors.
pub const INVALID: i32 = 2;
