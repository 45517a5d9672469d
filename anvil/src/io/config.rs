//! Anvil configuration stored under `.anvil/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::policy::SwitchPolicy;
use crate::core::types::Phase;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:11434";

/// Anvil configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to the values
/// below; environment overrides are layered on top via [`Overrides`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AnvilConfig {
    /// Upper bound for one inner run.
    pub max_iterations: u32,

    /// Phase whose completion token the inner loop watches for.
    pub target_phase: Phase,

    /// Fixed delay between inner iterations, in seconds.
    pub iteration_delay_secs: u64,

    /// Base task prompt, relative to the workspace root.
    pub prompt_path: PathBuf,

    pub agent: AgentConfig,
    pub analysis: AnalysisConfig,
    pub backend: BackendConfig,
    pub supervisor: SupervisorConfig,
    pub environment: EnvironmentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Command that reads the prompt on stdin and writes its transcript to
    /// stdout. `{model}` in any argument is replaced with the active model.
    pub command: Vec<String>,

    /// Per-invocation wall-clock limit in seconds.
    pub timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Command used for failure analysis; falls back to `agent.command`.
    pub command: Option<Vec<String>>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    /// Provider identifier recorded in the model config.
    pub provider: String,
    pub request_timeout_secs: u64,
    pub pull_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SupervisorConfig {
    pub switch_min_iterations: u32,
    pub switch_min_error_lines: usize,
    /// Transcript lines scanned for recent errors.
    pub error_window_lines: usize,
    /// Progress log bytes handed to the analyzer.
    pub progress_window_bytes: usize,
    /// Regenerated prompt additions must exceed this many bytes to be kept.
    pub min_additions_bytes: usize,
    /// Ordered model candidates for switching.
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// File whose content hash triggers a rebuild when it changes.
    pub manifest: PathBuf,
    /// Command that rebuilds the environment. Empty disables rebuilds.
    pub rebuild_command: Vec<String>,
    pub rebuild_timeout_secs: u64,
}

impl Default for AnvilConfig {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            target_phase: Phase::One,
            iteration_delay_secs: 5,
            prompt_path: PathBuf::from("PROMPT.md"),
            agent: AgentConfig::default(),
            analysis: AnalysisConfig::default(),
            backend: BackendConfig::default(),
            supervisor: SupervisorConfig::default(),
            environment: EnvironmentConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "claude".to_string(),
                "-p".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ],
            timeout_secs: 60 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: 10 * 60,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_BACKEND_URL.to_string(),
            provider: "ollama".to_string(),
            request_timeout_secs: 30,
            pull_timeout_secs: 60 * 60,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        let policy = SwitchPolicy::default();
        Self {
            switch_min_iterations: policy.min_iterations,
            switch_min_error_lines: policy.min_error_lines,
            error_window_lines: 2_000,
            progress_window_bytes: 8_000,
            min_additions_bytes: 200,
            candidates: vec![
                "qwen2.5-coder:32b".to_string(),
                "deepseek-coder-v2:16b".to_string(),
                "codellama:34b".to_string(),
            ],
        }
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from("Dockerfile"),
            rebuild_command: vec![
                "docker".to_string(),
                "build".to_string(),
                "-t".to_string(),
                "anvil-env".to_string(),
                ".".to_string(),
            ],
            rebuild_timeout_secs: 60 * 60,
        }
    }
}

impl AnvilConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if !is_command(&self.agent.command) {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if let Some(command) = &self.analysis.command
            && !is_command(command)
        {
            return Err(anyhow!("analysis.command must be a non-empty array"));
        }
        if self.analysis.timeout_secs == 0 {
            return Err(anyhow!("analysis.timeout_secs must be > 0"));
        }
        if self.backend.url.trim().is_empty() {
            return Err(anyhow!("backend.url must not be empty"));
        }
        if self.backend.request_timeout_secs == 0 || self.backend.pull_timeout_secs == 0 {
            return Err(anyhow!("backend timeouts must be > 0"));
        }
        if !self.environment.rebuild_command.is_empty()
            && !is_command(&self.environment.rebuild_command)
        {
            return Err(anyhow!("environment.rebuild_command must not start with a blank program"));
        }
        Ok(())
    }

    pub fn switch_policy(&self) -> SwitchPolicy {
        SwitchPolicy {
            min_iterations: self.supervisor.switch_min_iterations,
            min_error_lines: self.supervisor.switch_min_error_lines,
        }
    }

    pub fn iteration_delay(&self) -> Duration {
        Duration::from_secs(self.iteration_delay_secs)
    }

    /// Command used for analysis invocations.
    pub fn analysis_command(&self) -> &[String] {
        self.analysis
            .command
            .as_deref()
            .unwrap_or(&self.agent.command)
    }
}

fn is_command(command: &[String]) -> bool {
    command.first().is_some_and(|program| !program.trim().is_empty())
}

/// Environment-style overrides applied on top of the file config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub max_iterations: Option<u32>,
    pub target_phase: Option<Phase>,
    pub backend_url: Option<String>,
    pub iteration_delay_secs: Option<u64>,
}

impl Overrides {
    pub fn apply(&self, mut base: AnvilConfig) -> Result<AnvilConfig> {
        if let Some(max_iterations) = self.max_iterations {
            base.max_iterations = max_iterations;
        }
        if let Some(phase) = self.target_phase {
            base.target_phase = phase;
        }
        if let Some(url) = &self.backend_url {
            base.backend.url = url.clone();
        }
        if let Some(delay) = self.iteration_delay_secs {
            base.iteration_delay_secs = delay;
        }
        base.validate()?;
        Ok(base)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AnvilConfig::default()`.
pub fn load_config(path: &Path) -> Result<AnvilConfig> {
    if !path.exists() {
        let cfg = AnvilConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AnvilConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AnvilConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::fsutil::write_atomic(path, &buf)
}
