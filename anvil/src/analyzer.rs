//! Failure analysis via a secondary agent invocation.
//!
//! The analyzer runs the same kind of generative agent as the build loop, but
//! with an analysis prompt. Its output is advisory free text with no schema.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument};

use crate::io::executor::{Agent, AgentRequest};
use crate::io::model_config::ModelConfig;
use crate::io::prompt::PromptEngine;

/// Settings shared by every analysis invocation.
#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub log_path: Option<PathBuf>,
}

pub struct FailureAnalyzer<'a, A> {
    agent: &'a A,
    engine: PromptEngine,
    settings: AnalyzerSettings,
}

impl<'a, A: Agent> FailureAnalyzer<'a, A> {
    pub fn new(agent: &'a A, settings: AnalyzerSettings) -> Result<Self> {
        Ok(Self {
            agent,
            engine: PromptEngine::new()?,
            settings,
        })
    }

    /// Summarize recent progress and error lines into learnings.
    #[instrument(skip_all, fields(error_lines = recent_errors.len()))]
    pub fn analyze(
        &self,
        recent_progress: &str,
        recent_errors: &[&str],
        learnings: Option<&str>,
        model: Option<&ModelConfig>,
    ) -> Result<String> {
        let prompt = self
            .engine
            .render_analysis(recent_progress, recent_errors, learnings)?;
        self.invoke(prompt, model)
    }

    /// Rewrite the prompt additions from the current learnings.
    #[instrument(skip_all)]
    pub fn regenerate_additions(
        &self,
        learnings: &str,
        current: Option<&str>,
        model: Option<&ModelConfig>,
    ) -> Result<String> {
        let prompt = self.engine.render_additions(learnings, current)?;
        self.invoke(prompt, model)
    }

    fn invoke(&self, prompt: String, model: Option<&ModelConfig>) -> Result<String> {
        let response = self.agent.invoke(&AgentRequest {
            workdir: self.settings.workdir.clone(),
            prompt,
            model: model.cloned(),
            timeout: self.settings.timeout,
            output_limit_bytes: self.settings.output_limit_bytes,
            log_path: self.settings.log_path.clone(),
        })?;
        if response.timed_out {
            return Err(anyhow!("analysis timed out after {:?}", self.settings.timeout));
        }
        if !response.succeeded() {
            return Err(anyhow!(
                "analysis agent failed with status {:?}",
                response.exit_code
            ));
        }
        let text = response.transcript.trim();
        if text.is_empty() {
            return Err(anyhow!("analysis agent produced no output"));
        }
        debug!(bytes = text.len(), "analysis produced output");
        Ok(text.to_string())
    }
}
