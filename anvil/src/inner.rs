//! Bounded build loop: snapshot, compose, invoke, record, detect.
//!
//! One inner run ends either when the watched completion token shows up in
//! the run's cumulative transcript or after `max_iterations` passes. Failures
//! inside an iteration (snapshot, prompt composition, agent invocation, log
//! writes) are logged and the loop carries on to the next iteration.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use chrono::Local;
use tracing::{debug, info, instrument, warn};

use crate::core::completion::scan;
use crate::core::types::{CompletionStatus, IterationRecord, Phase, SnapshotResult};
use crate::io::config::AnvilConfig;
use crate::io::executor::{Agent, AgentRequest};
use crate::io::git::SnapshotStore;
use crate::io::init::AnvilPaths;
use crate::io::model_config::ModelConfig;
use crate::io::prompt::PromptSources;
use crate::io::transcript::{ProgressLog, Transcript};

/// Settings for one inner run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerConfig {
    pub max_iterations: u32,
    /// Phase whose token ends the run (the overall token always does).
    pub target: Phase,
    pub delay: Duration,
    pub agent_timeout: Duration,
    pub output_limit_bytes: usize,
}

impl InnerConfig {
    pub fn from_config(config: &AnvilConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            target: config.target_phase,
            delay: config.iteration_delay(),
            agent_timeout: Duration::from_secs(config.agent.timeout_secs),
            output_limit_bytes: config.agent.output_limit_bytes,
        }
    }
}

/// Terminal state of an inner run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InnerOutcome {
    /// A completion token was detected after `iteration`.
    Complete {
        iteration: u32,
        status: CompletionStatus,
    },
    /// `max_iterations` passed without a completion token.
    Exhausted { iterations: u32 },
}

/// Summary handed back to the caller.
#[derive(Debug, Clone)]
pub struct InnerReport {
    pub outcome: InnerOutcome,
    /// Cumulative agent output of this run.
    pub transcript: String,
}

impl InnerReport {
    pub fn iterations(&self) -> u32 {
        match self.outcome {
            InnerOutcome::Complete { iteration, .. } => iteration,
            InnerOutcome::Exhausted { iterations } => iterations,
        }
    }

    pub fn status(&self) -> CompletionStatus {
        match self.outcome {
            InnerOutcome::Complete { status, .. } => status,
            InnerOutcome::Exhausted { .. } => CompletionStatus::Pending,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.outcome, InnerOutcome::Complete { .. })
    }
}

/// Run the inner loop to completion or exhaustion.
///
/// Returns `Err` only when the run cannot start at all (zero iterations or a
/// missing base prompt). Log-file failures are warnings; the transcript used
/// for detection lives in memory either way.
#[instrument(skip_all, fields(target = %config.target, max_iterations = config.max_iterations))]
pub fn run_inner<S: SnapshotStore, A: Agent, F: FnMut(&IterationRecord)>(
    paths: &AnvilPaths,
    sources: &PromptSources,
    snapshots: &S,
    agent: &A,
    config: &InnerConfig,
    model: Option<&ModelConfig>,
    mut on_record: F,
) -> Result<InnerReport> {
    if config.max_iterations == 0 {
        return Err(anyhow!("max_iterations must be > 0"));
    }
    if !sources.base_path.is_file() {
        return Err(anyhow!(
            "base prompt {} not found",
            sources.base_path.display()
        ));
    }

    let progress = ProgressLog::new(&paths.progress_path);
    if let Err(err) = progress.append_run_header(
        &Local::now().to_rfc3339(),
        config.target.as_str(),
        config.max_iterations,
    ) {
        warn!(err = %format!("{err:#}"), "failed to append run header");
    }
    let mut transcript = Transcript::new(&paths.transcript_path, &paths.session_log_path);
    if let Err(err) = transcript.reset() {
        warn!(err = %format!("{err:#}"), "failed to reset transcript file");
    }

    info!(
        model = model.map(|m| m.model.as_str()).unwrap_or("default"),
        "inner run started"
    );

    for index in 1..=config.max_iterations {
        let started = Instant::now();
        let started_at = Local::now().to_rfc3339();

        // Capture the previous iteration's output before generating more.
        match snapshots.snapshot(&format!("before iteration {index}")) {
            Ok(snapshot) => debug!(iteration = index, changed = snapshot.changed, "snapshot taken"),
            Err(err) => warn!(iteration = index, err = %format!("{err:#}"), "snapshot failed"),
        }

        let output = invoke_agent(index, sources, agent, paths, config, model);
        if let Err(err) = transcript.append(index, &started_at, &output) {
            warn!(iteration = index, err = %format!("{err:#}"), "failed to append transcript");
        }

        let pending = snapshots.pending().unwrap_or_else(|err| {
            warn!(iteration = index, err = %format!("{err:#}"), "failed to read workspace changes");
            SnapshotResult::default()
        });
        let record = IterationRecord {
            index,
            started_at,
            duration: started.elapsed(),
            files_touched: pending.files_touched,
            diff_summary: pending.summary,
        };
        if let Err(err) = progress.append_record(&record) {
            warn!(iteration = index, err = %format!("{err:#}"), "failed to append progress");
        }
        on_record(&record);

        let status = scan(transcript.content(), config.target);
        if status.is_terminal() {
            info!(iteration = index, ?status, "completion detected");
            final_snapshot(snapshots);
            return Ok(InnerReport {
                outcome: InnerOutcome::Complete {
                    iteration: index,
                    status,
                },
                transcript: transcript.content().to_string(),
            });
        }

        if index < config.max_iterations && !config.delay.is_zero() {
            thread::sleep(config.delay);
        }
    }

    warn!(iterations = config.max_iterations, "inner run exhausted");
    final_snapshot(snapshots);
    Ok(InnerReport {
        outcome: InnerOutcome::Exhausted {
            iterations: config.max_iterations,
        },
        transcript: transcript.content().to_string(),
    })
}

/// Compose the prompt and run the agent, returning whatever it printed.
fn invoke_agent<A: Agent>(
    index: u32,
    sources: &PromptSources,
    agent: &A,
    paths: &AnvilPaths,
    config: &InnerConfig,
    model: Option<&ModelConfig>,
) -> String {
    let prompt = match sources.compose() {
        Ok(prompt) => prompt,
        Err(err) => {
            warn!(iteration = index, err = %format!("{err:#}"), "failed to compose prompt");
            return String::new();
        }
    };
    let request = AgentRequest {
        workdir: paths.root.clone(),
        prompt,
        model: model.cloned(),
        timeout: config.agent_timeout,
        output_limit_bytes: config.output_limit_bytes,
        log_path: Some(paths.agent_log_path.clone()),
    };
    match agent.invoke(&request) {
        Ok(response) => {
            if !response.succeeded() {
                warn!(
                    iteration = index,
                    exit_code = ?response.exit_code,
                    timed_out = response.timed_out,
                    "agent iteration failed"
                );
            }
            response.transcript
        }
        Err(err) => {
            warn!(iteration = index, err = %format!("{err:#}"), "agent invocation failed");
            String::new()
        }
    }
}

fn final_snapshot<S: SnapshotStore>(snapshots: &S) {
    if let Err(err) = snapshots.snapshot("run end") {
        warn!(err = %format!("{err:#}"), "final snapshot failed");
    }
}
