//! Initialization helpers for `.anvil/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

use super::config::{AnvilConfig, write_config};

/// All canonical paths within `.anvil/` for a workspace root.
#[derive(Debug, Clone)]
pub struct AnvilPaths {
    pub root: PathBuf,
    pub anvil_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub model_config_path: PathBuf,
    pub state_path: PathBuf,
    pub learnings_path: PathBuf,
    pub additions_path: PathBuf,
    pub progress_path: PathBuf,
    pub transcript_path: PathBuf,
    pub session_log_path: PathBuf,
    pub agent_log_path: PathBuf,
}

impl AnvilPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let anvil_dir = root.join(".anvil");
        Self {
            root: root.clone(),
            anvil_dir: anvil_dir.clone(),
            gitignore_path: anvil_dir.join(".gitignore"),
            config_path: anvil_dir.join("config.toml"),
            model_config_path: anvil_dir.join("model.toml"),
            state_path: anvil_dir.join("state.toml"),
            learnings_path: anvil_dir.join("learnings.md"),
            additions_path: anvil_dir.join("prompt_additions.md"),
            progress_path: anvil_dir.join("progress.md"),
            transcript_path: anvil_dir.join("transcript.log"),
            session_log_path: anvil_dir.join("session.log"),
            agent_log_path: anvil_dir.join("agent.log"),
        }
    }

    /// Resolve a workspace-relative path (absolute paths pass through).
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Options for `init_workspace`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing anvil-owned files.
    pub force: bool,
}

/// Create `.anvil/` scaffolding in `root`.
///
/// Fails if `.anvil/` already exists unless `options.force` is set. An existing
/// base prompt is never overwritten.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<AnvilPaths> {
    let paths = AnvilPaths::new(root);
    if paths.anvil_dir.exists() && !options.force {
        return Err(anyhow!(
            "anvil init: .anvil already exists (use --force to overwrite)"
        ));
    }
    if paths.anvil_dir.exists() && !paths.anvil_dir.is_dir() {
        return Err(anyhow!("anvil init: .anvil exists but is not a directory"));
    }

    fs::create_dir_all(&paths.anvil_dir)
        .with_context(|| format!("create directory {}", paths.anvil_dir.display()))?;

    let config = AnvilConfig::default();
    write_file(&paths.gitignore_path, ANVIL_GITIGNORE)?;
    write_config(&paths.config_path, &config)?;
    write_file(&paths.learnings_path, LEARNINGS_PLACEHOLDER)?;
    write_file(&paths.additions_path, "")?;

    let prompt_path = paths.resolve(&config.prompt_path);
    if prompt_path.exists() {
        debug!(path = %prompt_path.display(), "keeping existing base prompt");
    } else {
        write_file(&prompt_path, PROMPT_PLACEHOLDER)?;
    }

    info!(root = %root.display(), "initialized .anvil");
    Ok(paths)
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const ANVIL_GITIGNORE: &str = "transcript.log\nsession.log\nagent.log\n*.tmp\n";
const LEARNINGS_PLACEHOLDER: &str = "";
const PROMPT_PLACEHOLDER: &str = "# Task\n\nDescribe what the agent should build. Print \
ANVIL_PHASE_1_COMPLETE when phase 1 is done, and ANVIL_COMPLETE when everything is done.\n";
