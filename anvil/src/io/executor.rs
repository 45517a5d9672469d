//! Executor abstraction for agent invocation.
//!
//! The [`Agent`] trait decouples the schedulers from the actual generative
//! backend. [`CommandAgent`] feeds the prompt to an external command on stdin
//! and returns whatever it printed. Tests use scripted agents that return
//! predetermined transcripts without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::fsutil;
use crate::io::model_config::ModelConfig;
use crate::io::process::run_command_with_timeout;

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    /// Prompt text fed on stdin.
    pub prompt: String,
    /// Active model, if one has been selected.
    pub model: Option<ModelConfig>,
    /// Maximum time to wait for the agent.
    pub timeout: Duration,
    /// Truncate captured output beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Where to append the agent's stderr, if anywhere.
    pub log_path: Option<PathBuf>,
}

/// What the agent produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentResponse {
    /// Raw stdout, appended verbatim to the transcript.
    pub transcript: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl AgentResponse {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Abstraction over agent execution backends.
pub trait Agent {
    /// Run the agent once.
    ///
    /// A process that ran but failed or timed out still yields `Ok` so its
    /// partial transcript is kept. `Err` means nothing could be captured.
    fn invoke(&self, request: &AgentRequest) -> Result<AgentResponse>;
}

/// Agent that spawns a configured command.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    command: Vec<String>,
}

impl CommandAgent {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(anyhow!("agent command must be a non-empty array"));
        }
        Ok(Self { command })
    }

    fn build_command(&self, request: &AgentRequest) -> Command {
        let model_name = request.model.as_ref().map(|m| m.model.as_str());
        let args: Vec<String> = self
            .command
            .iter()
            .map(|arg| substitute_model(arg, model_name))
            .collect();
        let mut cmd = Command::new(&args[0]);
        cmd.args(&args[1..]).current_dir(&request.workdir);
        if let Some(model) = &request.model {
            cmd.env("ANVIL_MODEL", &model.model)
                .env("ANVIL_PROVIDER", &model.provider)
                .env("ANVIL_BACKEND_URL", &model.backend_url);
        }
        cmd
    }
}

impl Agent for CommandAgent {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs(), program = %self.command[0]))]
    fn invoke(&self, request: &AgentRequest) -> Result<AgentResponse> {
        info!(
            model = request.model.as_ref().map(|m| m.model.as_str()).unwrap_or("default"),
            prompt_bytes = request.prompt.len(),
            "invoking agent"
        );
        let output = run_command_with_timeout(
            self.build_command(request),
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
        )
        .with_context(|| format!("run agent {}", self.command[0]))?;

        if let Some(log_path) = &request.log_path {
            let mut entry = output.stderr_lossy();
            entry.push_str(&output.truncated_notice("agent"));
            if output.timed_out {
                entry.push_str("\n[agent timed out]\n");
            }
            if !entry.trim().is_empty()
                && let Err(err) = fsutil::append(log_path, &entry)
            {
                warn!(err = %err, "failed to write agent log");
            }
        }

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "agent timed out");
        } else if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent exited with failure");
        } else {
            debug!("agent completed successfully");
        }

        Ok(AgentResponse {
            transcript: output.stdout_lossy(),
            exit_code: output.status.code(),
            timed_out: output.timed_out,
        })
    }
}

fn substitute_model(arg: &str, model: Option<&str>) -> String {
    match model {
        Some(model) => arg.replace("{model}", model),
        None => arg.to_string(),
    }
}
