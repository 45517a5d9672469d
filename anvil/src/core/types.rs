//! Shared deterministic types for the build loop.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Milestone the inner loop watches for.
///
/// `Complete` is the unphased sentinel: the whole build is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Phase {
    One,
    Two,
    Three,
    Complete,
}

impl Phase {
    /// Numeric phase, or `None` for the unphased sentinel.
    pub fn number(self) -> Option<u8> {
        match self {
            Phase::One => Some(1),
            Phase::Two => Some(2),
            Phase::Three => Some(3),
            Phase::Complete => None,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Phase::One),
            2 => Some(Phase::Two),
            3 => Some(Phase::Three),
            _ => None,
        }
    }

    /// Phase to watch once this one has completed.
    pub fn next(self) -> Self {
        match self {
            Phase::One => Phase::Two,
            Phase::Two => Phase::Three,
            Phase::Three | Phase::Complete => Phase::Complete,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::One => "1",
            Phase::Two => "2",
            Phase::Three => "3",
            Phase::Complete => "complete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "1" => Ok(Phase::One),
            "2" => Ok(Phase::Two),
            "3" => Ok(Phase::Three),
            "complete" => Ok(Phase::Complete),
            other => Err(anyhow!(
                "invalid target phase '{other}' (expected 1, 2, 3 or complete)"
            )),
        }
    }
}

impl TryFrom<String> for Phase {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Phase> for String {
    fn from(value: Phase) -> Self {
        value.as_str().to_string()
    }
}

/// Completion state parsed from a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// No watched token has been emitted yet.
    Pending,
    /// The watched phase token was emitted.
    PhaseComplete(u8),
    /// The overall completion token was emitted.
    Complete,
}

impl CompletionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CompletionStatus::Pending)
    }
}

/// Outcome of snapshotting the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SnapshotResult {
    /// True if the snapshot captured new changes.
    pub changed: bool,
    /// Number of paths touched since the previous snapshot.
    pub files_touched: usize,
    /// Human-readable diff listing since the previous snapshot.
    pub summary: String,
}

/// One pass of the inner loop, as appended to the progress log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationRecord {
    /// 1-based index within the inner run.
    pub index: u32,
    /// Wall-clock start time (RFC 3339).
    pub started_at: String,
    pub duration: Duration,
    pub files_touched: usize,
    pub diff_summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_parses_numbers_and_sentinel() {
        assert_eq!("1".parse::<Phase>().expect("parse"), Phase::One);
        assert_eq!(" 3 ".parse::<Phase>().expect("parse"), Phase::Three);
        assert_eq!("complete".parse::<Phase>().expect("parse"), Phase::Complete);
        assert!("4".parse::<Phase>().is_err());
        assert!("Complete".parse::<Phase>().is_err());
    }

    #[test]
    fn phase_advances_to_complete() {
        assert_eq!(Phase::One.next(), Phase::Two);
        assert_eq!(Phase::Two.next(), Phase::Three);
        assert_eq!(Phase::Three.next(), Phase::Complete);
        assert_eq!(Phase::Complete.next(), Phase::Complete);
    }

    #[test]
    fn phase_serializes_as_string() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            phase: Phase,
        }
        let raw = toml::to_string(&Wrapper { phase: Phase::Two }).expect("serialize");
        assert_eq!(raw.trim(), "phase = \"2\"");
        let back: Wrapper = toml::from_str("phase = \"complete\"").expect("parse");
        assert_eq!(back.phase, Phase::Complete);
    }
}
