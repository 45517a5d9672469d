//! Environment manifest hashing and rebuilds.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use crate::io::process::run_command_with_timeout;

const REBUILD_OUTPUT_LIMIT_BYTES: usize = 200_000;

/// Hex SHA-256 of the manifest contents, or `None` if the file is missing.
pub fn hash_manifest(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path).with_context(|| format!("read manifest {}", path.display()))?;
    Ok(Some(hex::encode(Sha256::digest(&bytes))))
}

/// Rebuilds the execution environment.
pub trait Rebuilder {
    fn rebuild(&self, manifest: &Path) -> Result<()>;
}

/// [`Rebuilder`] that runs a configured command in the workspace root.
#[derive(Debug, Clone)]
pub struct CommandRebuilder {
    command: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
}

impl CommandRebuilder {
    pub fn new(command: Vec<String>, workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            command,
            workdir: workdir.into(),
            timeout,
        }
    }
}

impl Rebuilder for CommandRebuilder {
    #[instrument(skip_all, fields(manifest = %manifest.display()))]
    fn rebuild(&self, manifest: &Path) -> Result<()> {
        let Some((program, args)) = self.command.split_first() else {
            info!("no rebuild command configured, skipping rebuild");
            return Ok(());
        };
        info!(program = %program, "rebuilding environment");
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        let output = run_command_with_timeout(cmd, None, self.timeout, REBUILD_OUTPUT_LIMIT_BYTES)
            .context("run rebuild command")?;
        if output.timed_out {
            return Err(anyhow!("rebuild timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            let stderr = output.stderr_lossy();
            warn!(exit_code = ?output.status.code(), "rebuild failed");
            return Err(anyhow!(
                "rebuild failed with status {:?}: {}",
                output.status.code(),
                stderr.trim()
            ));
        }
        Ok(())
    }
}
