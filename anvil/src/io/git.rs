//! Git-backed snapshot store.
//!
//! Each inner iteration commits whatever the previous iteration produced before
//! the agent runs again, so a crash mid-generation loses at most the current
//! iteration.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};

use crate::core::types::SnapshotResult;

/// Identity keys git needs to commit, with the values used when unset.
const FALLBACK_IDENTITY: [(&str, &str); 2] = [
    ("user.name", "user.name=anvil"),
    ("user.email", "user.email=anvil@localhost"),
];

/// Durable workspace snapshots.
pub trait SnapshotStore {
    /// Persist the current workspace state under `label`.
    ///
    /// Nothing to capture is a successful no-op (`changed == false`).
    fn snapshot(&self, label: &str) -> Result<SnapshotResult>;

    /// Changes since the last snapshot, without persisting them.
    fn pending(&self) -> Result<SnapshotResult>;
}

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Initialize a repository in the workdir if it is not inside one.
    #[instrument(skip_all)]
    pub fn ensure_repo(&self) -> Result<()> {
        let inside = self.run(&["rev-parse", "--is-inside-work-tree"])?;
        if inside.status.success() {
            return Ok(());
        }
        info!(workdir = %self.workdir.display(), "initializing git repository");
        self.run_checked(&["init"])?;
        Ok(())
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// `--stat` listing of staged changes.
    pub fn staged_stat(&self) -> Result<String> {
        self.run_capture(&["diff", "--cached", "--stat"])
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        let mut args = self.fallback_identity()?;
        args.extend(["commit", "--no-verify", "-m", message]);
        debug!("committing staged changes");
        self.run_checked(&args)?;
        Ok(true)
    }

    /// `-c key=value` pairs for every identity key the repo does not set.
    fn fallback_identity(&self) -> Result<Vec<&'static str>> {
        let mut args = Vec::new();
        for (key, fallback) in FALLBACK_IDENTITY {
            if !self.run(&["config", key])?.status.success() {
                args.extend(["-c", fallback]);
            }
        }
        Ok(args)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

/// [`SnapshotStore`] that commits the workspace to git.
#[derive(Debug, Clone)]
pub struct GitSnapshotStore {
    git: Git,
}

impl GitSnapshotStore {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            git: Git::new(workdir),
        }
    }
}

impl SnapshotStore for GitSnapshotStore {
    #[instrument(skip_all, fields(label))]
    fn snapshot(&self, label: &str) -> Result<SnapshotResult> {
        self.git.ensure_repo()?;
        let files_touched = self.git.status_porcelain()?.len();
        self.git.add_all()?;
        if !self.git.has_staged_changes()? {
            return Ok(SnapshotResult::default());
        }
        let summary = self.git.staged_stat()?;
        self.git.commit_staged(&format!("anvil: {label}"))?;
        debug!(files_touched, "snapshot committed");
        Ok(SnapshotResult {
            changed: true,
            files_touched,
            summary: summary.trim_end().to_string(),
        })
    }

    fn pending(&self) -> Result<SnapshotResult> {
        self.git.ensure_repo()?;
        let entries = self.git.status_porcelain()?;
        let summary = entries
            .iter()
            .map(|entry| format!("{} {}", entry.code, entry.path))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(SnapshotResult {
            changed: !entries.is_empty(),
            files_touched: entries.len(),
            summary,
        })
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
