//! Transcript and progress-log files under `.anvil/`.
//!
//! - `transcript.log`: raw agent output for the current inner run, started
//!   fresh on every run and scanned cumulatively for completion tokens.
//! - `session.log`: the same chunks, appended across runs with headers.
//! - `progress.md`: one human-readable section per iteration.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::types::IterationRecord;
use crate::io::fsutil;

/// Diff listings longer than this are cut in the progress log.
pub const MAX_DIFF_LINES: usize = 20;

/// Append-only transcript for one inner run.
///
/// The cumulative content is kept in memory so completion detection does not
/// depend on re-reading the file.
#[derive(Debug)]
pub struct Transcript {
    path: PathBuf,
    session_log_path: PathBuf,
    content: String,
}

impl Transcript {
    /// An empty in-memory transcript; nothing touches disk until [`reset`].
    ///
    /// [`reset`]: Transcript::reset
    pub fn new(path: impl Into<PathBuf>, session_log_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            session_log_path: session_log_path.into(),
            content: String::new(),
        }
    }

    /// Truncate the transcript file for a new run.
    pub fn reset(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&self.path, "")
            .with_context(|| format!("reset transcript {}", self.path.display()))
    }

    /// Append one iteration's output.
    ///
    /// The in-memory transcript always grows; file errors are returned after
    /// both files were attempted.
    pub fn append(&mut self, iteration: u32, started_at: &str, chunk: &str) -> Result<()> {
        let mut chunk = chunk.to_string();
        // Keep chunks on separate lines so tokens cannot straddle iterations.
        if !chunk.is_empty() && !chunk.ends_with('\n') {
            chunk.push('\n');
        }
        self.content.push_str(&chunk);

        let transcript_result = fsutil::append(&self.path, &chunk);
        let header = format!("\n=== iteration {iteration} ({started_at}) ===\n");
        let session_result = fsutil::append(&self.session_log_path, &(header + &chunk));
        debug!(iteration, bytes = chunk.len(), "transcript appended");
        transcript_result?;
        session_result
    }

    /// Everything appended during this run.
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Append-only progress log.
#[derive(Debug, Clone)]
pub struct ProgressLog {
    path: PathBuf,
}

impl ProgressLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Mark the start of an inner run.
    pub fn append_run_header(&self, started_at: &str, target: &str, max_iterations: u32) -> Result<()> {
        fsutil::append(
            &self.path,
            &format!(
                "\n# Run started {started_at} (target phase {target}, max {max_iterations} iterations)\n"
            ),
        )
    }

    pub fn append_record(&self, record: &IterationRecord) -> Result<()> {
        fsutil::append(&self.path, &render_record(record))
    }

    /// Full log contents (empty if missing).
    pub fn read(&self) -> Result<String> {
        Ok(fsutil::read_optional(&self.path)?.unwrap_or_default())
    }
}

/// Render one progress section.
pub fn render_record(record: &IterationRecord) -> String {
    let mut out = format!(
        "\n## Iteration {}\n\n- started: {}\n- duration: {:.1}s\n- files touched: {}\n",
        record.index,
        record.started_at,
        record.duration.as_secs_f64(),
        record.files_touched
    );
    let diff = truncate_lines(record.diff_summary.trim_end(), MAX_DIFF_LINES);
    if !diff.is_empty() {
        out.push_str("\n```text\n");
        out.push_str(&diff);
        out.push_str("\n```\n");
    }
    out
}

fn truncate_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= max_lines {
        return text.to_string();
    }
    let mut out = lines[..max_lines].join("\n");
    out.push_str(&format!("\n... ({} more)", lines.len() - max_lines));
    out
}
