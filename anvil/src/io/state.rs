//! Supervisor bookkeeping stored under `.anvil/state.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::Phase;
use crate::io::fsutil::write_atomic;

/// Persisted supervisor state, so a restarted supervisor resumes where it left off.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct SupervisorState {
    /// Phase the next inner run watches for. `None` means use the config.
    pub target_phase: Option<Phase>,
    /// Completed outer cycles.
    pub cycles: u64,
    /// Manifest hash observed at the last rebuild check.
    pub manifest_hash: Option<String>,
}

/// Load state, defaulting when the file is missing.
pub fn load_state(path: &Path) -> Result<SupervisorState> {
    if !path.exists() {
        return Ok(SupervisorState::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let state: SupervisorState =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    debug!(cycles = state.cycles, "supervisor state loaded");
    Ok(state)
}

/// Atomically write state to disk.
pub fn write_state(path: &Path, state: &SupervisorState) -> Result<()> {
    let mut buf = toml::to_string_pretty(state).context("serialize supervisor state")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.toml");
        assert_eq!(load_state(&path).expect("load"), SupervisorState::default());

        let state = SupervisorState {
            target_phase: Some(Phase::Three),
            cycles: 4,
            manifest_hash: Some("abc123".to_string()),
        };
        write_state(&path, &state).expect("write");
        assert_eq!(load_state(&path).expect("load"), state);
    }
}
