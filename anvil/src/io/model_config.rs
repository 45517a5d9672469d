//! Active model selection stored under `.anvil/model.toml`.
//!
//! Exactly one configuration is active at a time. It is replaced wholesale,
//! never patched, and every replacement goes through temp file + rename so a
//! reader sees either the previous or the new record.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::fsutil::write_atomic;

/// The backend model agents run against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    pub backend_url: String,
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.provider.trim().is_empty() {
            return Err(anyhow!("model config: provider must not be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(anyhow!("model config: model must not be empty"));
        }
        if self.backend_url.trim().is_empty() {
            return Err(anyhow!("model config: backend_url must not be empty"));
        }
        Ok(())
    }
}

/// Single canonical location for the active [`ModelConfig`].
#[derive(Debug, Clone)]
pub struct ModelConfigStore {
    path: PathBuf,
}

impl ModelConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the active config, or `None` if no model has been selected yet.
    pub fn load(&self) -> Result<Option<ModelConfig>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read {}", self.path.display()))?;
        let cfg: ModelConfig = toml::from_str(&contents)
            .with_context(|| format!("parse {}", self.path.display()))?;
        cfg.validate()?;
        Ok(Some(cfg))
    }

    /// Atomically replace the active config.
    pub fn replace(&self, cfg: &ModelConfig) -> Result<()> {
        cfg.validate()?;
        debug!(model = %cfg.model, path = %self.path.display(), "replacing model config");
        let mut buf = toml::to_string_pretty(cfg).context("serialize model config")?;
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }
}
