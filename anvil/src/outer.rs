//! Unbounded supervisory loop around the inner build loop.
//!
//! Each cycle runs the inner loop to a terminal state, then analyzes the run,
//! possibly switches models, regenerates prompt additions and rebuilds the
//! environment if its manifest changed. The loop ends only when the overall
//! completion token is seen. No single failure inside a cycle stops it.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{debug, info, instrument, warn};

use crate::analyzer::{AnalyzerSettings, FailureAnalyzer};
use crate::core::policy::{is_substantial, next_candidate};
use crate::core::signals::{error_lines, tail_bytes, tail_lines};
use crate::core::types::{CompletionStatus, Phase};
use crate::inner::{InnerConfig, InnerReport, run_inner};
use crate::io::backend::ModelBackend;
use crate::io::config::AnvilConfig;
use crate::io::executor::Agent;
use crate::io::git::SnapshotStore;
use crate::io::init::AnvilPaths;
use crate::io::manifest::{Rebuilder, hash_manifest};
use crate::io::model_config::ModelConfig;
use crate::io::prompt::PromptSources;
use crate::io::state::{SupervisorState, load_state, write_state};
use crate::io::transcript::ProgressLog;
use crate::registry::ModelRegistry;

/// Error lines handed to the analyzer are capped to the most recent ones.
const MAX_ERRORS_IN_PROMPT: usize = 100;

/// Supervisor states, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Supervising,
    Analyzing,
    EvaluatingModel,
    Switching,
    UpdatingAdditions,
    CheckingRebuild,
    Done,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Supervising => "supervising",
            Stage::Analyzing => "analyzing",
            Stage::EvaluatingModel => "evaluating_model",
            Stage::Switching => "switching",
            Stage::UpdatingAdditions => "updating_additions",
            Stage::CheckingRebuild => "checking_rebuild",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened during one supervisor cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// 1-based cycle number, counted across restarts.
    pub cycle: u64,
    pub target: Phase,
    pub iterations: u32,
    pub status: CompletionStatus,
    pub error_lines: usize,
    pub analysis_recorded: bool,
    pub switched_to: Option<String>,
    pub additions_updated: bool,
    pub rebuilt: bool,
}

/// Terminal result of [`Supervisor::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorOutcome {
    /// Cycles run by this invocation.
    pub cycles: u64,
}

/// Borrowed collaborators of the supervisor.
pub struct Supervisor<'a, S, A, N, B, R> {
    paths: &'a AnvilPaths,
    config: &'a AnvilConfig,
    snapshots: &'a S,
    agent: &'a A,
    analyzer: FailureAnalyzer<'a, N>,
    registry: &'a ModelRegistry<B>,
    rebuilder: &'a R,
    target_override: Option<Phase>,
}

impl<'a, S, A, N, B, R> Supervisor<'a, S, A, N, B, R>
where
    S: SnapshotStore,
    A: Agent,
    N: Agent,
    B: ModelBackend,
    R: Rebuilder,
{
    pub fn new(
        paths: &'a AnvilPaths,
        config: &'a AnvilConfig,
        snapshots: &'a S,
        agent: &'a A,
        analysis_agent: &'a N,
        registry: &'a ModelRegistry<B>,
        rebuilder: &'a R,
    ) -> Result<Self> {
        let analyzer = FailureAnalyzer::new(
            analysis_agent,
            AnalyzerSettings {
                workdir: paths.root.clone(),
                timeout: Duration::from_secs(config.analysis.timeout_secs),
                output_limit_bytes: config.agent.output_limit_bytes,
                log_path: Some(paths.agent_log_path.clone()),
            },
        )?;
        Ok(Self {
            paths,
            config,
            snapshots,
            agent,
            analyzer,
            registry,
            rebuilder,
            target_override: None,
        })
    }

    /// Watch `phase` from the next cycle on, replacing any persisted target.
    ///
    /// Used when the phase was given explicitly on the command line or in the
    /// environment.
    pub fn with_target_override(mut self, phase: Option<Phase>) -> Self {
        self.target_override = phase;
        self
    }

    /// Run cycles until an inner run reports overall completion.
    pub fn run<F: FnMut(&CycleReport)>(&self, mut on_cycle: F) -> Result<SupervisorOutcome> {
        let mut state = load_state(&self.paths.state_path)
            .with_context(|| format!("load {}", self.paths.state_path.display()))?;
        if let Some(phase) = self.target_override {
            if state.target_phase.is_some_and(|persisted| persisted != phase) {
                info!(persisted = ?state.target_phase, %phase, "target phase overridden");
            }
            state.target_phase = Some(phase);
        }
        let mut cycles = 0u64;
        loop {
            let report = self.run_cycle(&mut state)?;
            cycles += 1;
            on_cycle(&report);
            if report.status == CompletionStatus::Complete {
                info!(stage = %Stage::Done, cycles, "overall completion reached");
                return Ok(SupervisorOutcome { cycles });
            }
        }
    }

    /// Run one full cycle and persist the updated state.
    ///
    /// Only setup failures of the inner run are returned as errors.
    #[instrument(skip_all, fields(cycle = state.cycles + 1))]
    pub fn run_cycle(&self, state: &mut SupervisorState) -> Result<CycleReport> {
        let cycle = state.cycles + 1;
        let target = state.target_phase.unwrap_or(self.config.target_phase);
        let model = self.current_model();

        info!(stage = %Stage::Supervising, %target, "starting inner run");
        let inner = self.supervise(target, model.as_ref())?;
        let status = inner.status();

        let window = tail_lines(&inner.transcript, self.config.supervisor.error_window_lines);
        let errors = error_lines(window);
        let mut report = CycleReport {
            cycle,
            target,
            iterations: inner.iterations(),
            status,
            error_lines: errors.len(),
            analysis_recorded: false,
            switched_to: None,
            additions_updated: false,
            rebuilt: false,
        };

        report.analysis_recorded = self.analyze(cycle, &errors, model.as_ref());

        let mut model = model;
        if self.should_switch(&report)
            && let Some(switched) = self.switch(model.as_ref())
        {
            report.switched_to = Some(switched.model.clone());
            model = Some(switched);
        }

        report.additions_updated = self.update_additions(model.as_ref());
        report.rebuilt = self.check_rebuild(state);

        if let CompletionStatus::PhaseComplete(number) = status
            && let Some(phase) = Phase::from_number(number)
        {
            let next = phase.next();
            info!(completed = %phase, next = %next, "advancing target phase");
            state.target_phase = Some(next);
        }

        state.cycles = cycle;
        if let Err(err) = write_state(&self.paths.state_path, state) {
            warn!(err = %format!("{err:#}"), "failed to persist supervisor state");
        }
        info!(
            iterations = report.iterations,
            error_lines = report.error_lines,
            switched = report.switched_to.is_some(),
            rebuilt = report.rebuilt,
            "cycle finished"
        );
        Ok(report)
    }

    fn current_model(&self) -> Option<ModelConfig> {
        match self.registry.current() {
            Ok(model) => model,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to read model config, using agent default");
                None
            }
        }
    }

    fn supervise(&self, target: Phase, model: Option<&ModelConfig>) -> Result<InnerReport> {
        let sources = self.sources();
        let config = InnerConfig {
            target,
            ..InnerConfig::from_config(self.config)
        };
        run_inner(
            self.paths,
            &sources,
            self.snapshots,
            self.agent,
            &config,
            model,
            |_| {},
        )
    }

    /// Append an analysis of the last run to the learnings document.
    fn analyze(&self, cycle: u64, errors: &[&str], model: Option<&ModelConfig>) -> bool {
        info!(stage = %Stage::Analyzing, error_lines = errors.len(), "analyzing run");
        let learnings = self.sources().learnings;
        let previous = match learnings.read() {
            Ok(previous) => previous,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to read learnings");
                return false;
            }
        };
        let progress = match ProgressLog::new(&self.paths.progress_path).read() {
            Ok(progress) => progress,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to read progress log");
                String::new()
            }
        };
        let recent_progress = tail_bytes(&progress, self.config.supervisor.progress_window_bytes);
        let recent_errors = &errors[errors.len().saturating_sub(MAX_ERRORS_IN_PROMPT)..];

        let narrative = match self.analyzer.analyze(
            recent_progress,
            recent_errors,
            previous.as_deref(),
            model,
        ) {
            Ok(narrative) => narrative,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "analysis failed, keeping learnings");
                return false;
            }
        };

        let mut updated = previous.map(|p| p.trim_end().to_string()).unwrap_or_default();
        if !updated.is_empty() {
            updated.push_str("\n\n");
        }
        updated.push_str(&format!(
            "## Analysis after cycle {cycle} ({})\n\n{narrative}",
            Local::now().to_rfc3339()
        ));
        match learnings.replace(&updated) {
            Ok(()) => true,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to write learnings");
                false
            }
        }
    }

    fn should_switch(&self, report: &CycleReport) -> bool {
        let switch = self
            .config
            .switch_policy()
            .should_switch(report.iterations, report.error_lines);
        info!(
            stage = %Stage::EvaluatingModel,
            iterations = report.iterations,
            error_lines = report.error_lines,
            switch,
            "evaluated model"
        );
        switch
    }

    fn switch(&self, current: Option<&ModelConfig>) -> Option<ModelConfig> {
        let current_name = current.map(|m| m.model.as_str()).unwrap_or_default();
        let Some(next) = next_candidate(&self.config.supervisor.candidates, current_name) else {
            warn!(stage = %Stage::Switching, "no alternative model candidate");
            return None;
        };
        info!(stage = %Stage::Switching, from = current_name, to = next, "switching model");
        match self.registry.switch_model(next) {
            Ok(cfg) => Some(cfg),
            Err(err) => {
                warn!(err = %format!("{err:#}"), model = next, "model switch failed, keeping current model");
                None
            }
        }
    }

    /// Regenerate prompt additions from learnings, keeping the old ones if
    /// the new text is too small.
    fn update_additions(&self, model: Option<&ModelConfig>) -> bool {
        let sources = self.sources();
        let learnings = match sources.learnings.read() {
            Ok(Some(learnings)) => learnings,
            Ok(None) => {
                debug!(stage = %Stage::UpdatingAdditions, "no learnings yet, skipping");
                return false;
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to read learnings");
                return false;
            }
        };
        let current = sources.additions.read().unwrap_or_else(|err| {
            warn!(err = %format!("{err:#}"), "failed to read prompt additions");
            None
        });

        info!(stage = %Stage::UpdatingAdditions, "regenerating prompt additions");
        let regenerated =
            match self
                .analyzer
                .regenerate_additions(&learnings, current.as_deref(), model)
            {
                Ok(text) => text,
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "additions regeneration failed");
                    return false;
                }
            };
        if !is_substantial(&regenerated, self.config.supervisor.min_additions_bytes) {
            info!(
                bytes = regenerated.trim().len(),
                min_bytes = self.config.supervisor.min_additions_bytes,
                "regenerated additions too small, keeping previous"
            );
            return false;
        }
        match sources.additions.replace(&regenerated) {
            Ok(()) => true,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to write prompt additions");
                false
            }
        }
    }

    /// Rebuild when the manifest hash differs from the last successful rebuild.
    fn check_rebuild(&self, state: &mut SupervisorState) -> bool {
        let manifest = self.paths.resolve(&self.config.environment.manifest);
        let hash = match hash_manifest(&manifest) {
            Ok(Some(hash)) => hash,
            Ok(None) => {
                debug!(stage = %Stage::CheckingRebuild, manifest = %manifest.display(), "no manifest, skipping");
                return false;
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to hash manifest");
                return false;
            }
        };
        if state.manifest_hash.as_deref() == Some(hash.as_str()) {
            debug!(stage = %Stage::CheckingRebuild, "manifest unchanged");
            return false;
        }
        info!(stage = %Stage::CheckingRebuild, hash = %hash, "manifest changed, rebuilding");
        match self.rebuilder.rebuild(&manifest) {
            Ok(()) => {
                state.manifest_hash = Some(hash);
                true
            }
            Err(err) => {
                // Hash stays stale so the next cycle retries.
                warn!(err = %format!("{err:#}"), "rebuild failed");
                false
            }
        }
    }

    fn sources(&self) -> PromptSources {
        PromptSources::new(
            self.paths.resolve(&self.config.prompt_path),
            &self.paths.additions_path,
            &self.paths.learnings_path,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::io::model_config::ModelConfigStore;
    use crate::test_support::{
        FakeBackend, RecordingRebuilder, ScriptedAgent, ScriptedReply, ScriptedSnapshots,
        TestWorkspace,
    };

    struct Harness {
        workspace: TestWorkspace,
        snapshots: ScriptedSnapshots,
        registry: ModelRegistry<FakeBackend>,
        rebuilder: RecordingRebuilder,
    }

    impl Harness {
        fn new(max_iterations: u32) -> Self {
            let mut workspace = TestWorkspace::new().expect("workspace");
            let config = AnvilConfig {
                max_iterations,
                ..workspace.config().clone()
            };
            workspace.set_config(config).expect("config");
            let registry = ModelRegistry::new(
                FakeBackend::with_models(&["qwen2.5-coder:32b"]),
                ModelConfigStore::new(&workspace.paths().model_config_path),
                "ollama",
                "http://localhost:11434",
            );
            Self {
                workspace,
                snapshots: ScriptedSnapshots::new(),
                registry,
                rebuilder: RecordingRebuilder::new(),
            }
        }

        fn cycle(
            &self,
            agent: &ScriptedAgent,
            analysis: &ScriptedAgent,
            state: &mut SupervisorState,
        ) -> CycleReport {
            let supervisor = Supervisor::new(
                self.workspace.paths(),
                self.workspace.config(),
                &self.snapshots,
                agent,
                analysis,
                &self.registry,
                &self.rebuilder,
            )
            .expect("supervisor");
            supervisor.run_cycle(state).expect("cycle")
        }
    }

    fn noisy_output() -> ScriptedReply {
        ScriptedReply::exit(
            1,
            "error: undefined reference to `main`\ntest lexer ... FAILED\nerror: build failed\n",
        )
    }

    #[test]
    fn switches_model_only_above_both_thresholds() {
        let harness = Harness::new(21);
        let agent = ScriptedAgent::always(noisy_output());
        let analysis = ScriptedAgent::new(Vec::new());
        let mut state = SupervisorState::default();

        let report = harness.cycle(&agent, &analysis, &mut state);

        assert_eq!(report.iterations, 21);
        assert_eq!(report.error_lines, 63);
        assert_eq!(report.switched_to.as_deref(), Some("qwen2.5-coder:32b"));
        let active = harness.registry.current().expect("current").expect("model");
        assert_eq!(active.model, "qwen2.5-coder:32b");

        // The next cycle runs with the switched model and cycles onward.
        let report = harness.cycle(&agent, &analysis, &mut state);
        assert_eq!(report.switched_to.as_deref(), Some("deepseek-coder-v2:16b"));
        assert!(
            agent
                .requests()
                .last()
                .and_then(|r| r.model.clone())
                .is_some_and(|m| m.model == "qwen2.5-coder:32b")
        );
    }

    #[test]
    fn keeps_model_at_iteration_threshold() {
        let harness = Harness::new(20);
        let agent = ScriptedAgent::always(noisy_output());
        let analysis = ScriptedAgent::new(Vec::new());
        let mut state = SupervisorState::default();

        let report = harness.cycle(&agent, &analysis, &mut state);

        assert_eq!(report.iterations, 20);
        assert!(report.error_lines > 50);
        assert_eq!(report.switched_to, None);
        assert_eq!(harness.registry.current().expect("current"), None);
    }

    #[test]
    fn keeps_model_with_few_errors() {
        let harness = Harness::new(25);
        let agent = ScriptedAgent::always(ScriptedReply::output("error: one thing\n"));
        let analysis = ScriptedAgent::new(Vec::new());
        let mut state = SupervisorState::default();

        let report = harness.cycle(&agent, &analysis, &mut state);

        assert_eq!(report.error_lines, 25);
        assert_eq!(report.switched_to, None);
    }

    #[test]
    fn rebuilds_once_per_manifest_change() {
        let harness = Harness::new(1);
        let agent = ScriptedAgent::always(ScriptedReply::output("work"));
        let analysis = ScriptedAgent::new(Vec::new());
        let mut state = SupervisorState::default();
        harness
            .workspace
            .write("Dockerfile", "FROM debian:bookworm\n")
            .expect("manifest");

        assert!(harness.cycle(&agent, &analysis, &mut state).rebuilt);
        assert!(!harness.cycle(&agent, &analysis, &mut state).rebuilt);
        assert_eq!(harness.rebuilder.calls(), 1);

        harness
            .workspace
            .write("Dockerfile", "FROM debian:bookworm\nRUN apt-get install -y gcc\n")
            .expect("manifest");
        assert!(harness.cycle(&agent, &analysis, &mut state).rebuilt);
        assert_eq!(harness.rebuilder.calls(), 2);

        let manifest = harness.workspace.paths().resolve(Path::new("Dockerfile"));
        let expected = hash_manifest(&manifest).expect("hash");
        assert_eq!(state.manifest_hash, expected);
        let persisted = load_state(&harness.workspace.paths().state_path).expect("state");
        assert_eq!(persisted.manifest_hash, expected);
        assert_eq!(persisted.cycles, 3);
    }

    #[test]
    fn failed_rebuild_is_retried_next_cycle() {
        let mut harness = Harness::new(1);
        harness.rebuilder = RecordingRebuilder::failing();
        let agent = ScriptedAgent::always(ScriptedReply::output("work"));
        let analysis = ScriptedAgent::new(Vec::new());
        let mut state = SupervisorState::default();
        harness
            .workspace
            .write("Dockerfile", "FROM alpine\n")
            .expect("manifest");

        assert!(!harness.cycle(&agent, &analysis, &mut state).rebuilt);
        assert!(!harness.cycle(&agent, &analysis, &mut state).rebuilt);
        assert_eq!(harness.rebuilder.calls(), 2);
        assert_eq!(state.manifest_hash, None);
    }

    #[test]
    fn missing_manifest_skips_rebuild() {
        let harness = Harness::new(1);
        let agent = ScriptedAgent::always(ScriptedReply::output("work"));
        let analysis = ScriptedAgent::new(Vec::new());
        let mut state = SupervisorState::default();

        assert!(!harness.cycle(&agent, &analysis, &mut state).rebuilt);
        assert_eq!(harness.rebuilder.calls(), 0);
    }

    #[test]
    fn analysis_is_appended_to_learnings() {
        let harness = Harness::new(1);
        let agent = ScriptedAgent::always(ScriptedReply::output("error: x"));
        let analysis = ScriptedAgent::new(vec![
            ScriptedReply::output("### Rules\n- first"),
            ScriptedReply::output("short"),
            ScriptedReply::output("### Rules\n- second"),
            ScriptedReply::output("short"),
        ]);
        let mut state = SupervisorState::default();

        assert!(harness.cycle(&agent, &analysis, &mut state).analysis_recorded);
        assert!(harness.cycle(&agent, &analysis, &mut state).analysis_recorded);

        let learnings = harness
            .workspace
            .read(&harness.workspace.paths().learnings_path)
            .expect("learnings");
        let first = learnings.find("## Analysis after cycle 1").expect("cycle 1");
        let second = learnings.find("## Analysis after cycle 2").expect("cycle 2");
        assert!(first < second);
        assert!(learnings.contains("- first"));
        assert!(learnings.contains("- second"));
        assert!(analysis.prompts()[0].contains("error: x"));
    }

    #[test]
    fn trivial_additions_are_discarded() {
        let harness = Harness::new(1);
        let agent = ScriptedAgent::always(ScriptedReply::output("work"));
        let long_additions = format!("- {}", "always run the full test suite before finishing. ".repeat(8));
        let analysis = ScriptedAgent::new(vec![
            ScriptedReply::output("### Rules\n- keep going"),
            ScriptedReply::output("- too short"),
            ScriptedReply::output("### Rules\n- keep going"),
            ScriptedReply::output(&long_additions),
        ]);
        let mut state = SupervisorState::default();
        let additions = harness.workspace.sources().additions;
        additions.replace("- previous additions").expect("seed");

        let report = harness.cycle(&agent, &analysis, &mut state);
        assert!(!report.additions_updated);
        assert_eq!(
            additions.read().expect("read").as_deref(),
            Some("- previous additions\n")
        );

        let report = harness.cycle(&agent, &analysis, &mut state);
        assert!(report.additions_updated);
        assert_eq!(
            additions.read().expect("read").as_deref().map(str::trim_end),
            Some(long_additions.trim())
        );
    }

    #[test]
    fn failed_analysis_leaves_learnings_untouched() {
        let harness = Harness::new(1);
        let agent = ScriptedAgent::always(ScriptedReply::output("work"));
        let analysis = ScriptedAgent::new(vec![ScriptedReply::timeout()]);
        let mut state = SupervisorState::default();

        let report = harness.cycle(&agent, &analysis, &mut state);

        assert!(!report.analysis_recorded);
        assert!(!report.additions_updated);
        let learnings = harness.workspace.sources().learnings;
        assert_eq!(learnings.read().expect("read"), None);
    }

    #[test]
    fn phase_completion_advances_target() {
        let harness = Harness::new(3);
        let agent = ScriptedAgent::new(vec![
            ScriptedReply::output("ANVIL_PHASE_1_COMPLETE"),
            ScriptedReply::output("ANVIL_PHASE_2_COMPLETE"),
        ]);
        let analysis = ScriptedAgent::new(Vec::new());
        let mut state = SupervisorState::default();

        let first = harness.cycle(&agent, &analysis, &mut state);
        assert_eq!(first.target, Phase::One);
        assert_eq!(first.status, CompletionStatus::PhaseComplete(1));
        assert_eq!(state.target_phase, Some(Phase::Two));

        let second = harness.cycle(&agent, &analysis, &mut state);
        assert_eq!(second.target, Phase::Two);
        assert_eq!(second.iterations, 1);
        assert_eq!(state.target_phase, Some(Phase::Three));
    }

    #[test]
    fn run_stops_on_overall_completion() {
        let harness = Harness::new(2);
        let agent = ScriptedAgent::new(vec![
            ScriptedReply::output("ANVIL_PHASE_1_COMPLETE"),
            ScriptedReply::output("work"),
            ScriptedReply::output("all done: ANVIL_COMPLETE"),
        ]);
        let analysis = ScriptedAgent::new(Vec::new());
        let supervisor = Supervisor::new(
            harness.workspace.paths(),
            harness.workspace.config(),
            &harness.snapshots,
            &agent,
            &analysis,
            &harness.registry,
            &harness.rebuilder,
        )
        .expect("supervisor");

        let mut reports = Vec::new();
        let outcome = supervisor.run(|r| reports.push(r.clone())).expect("run");

        assert_eq!(outcome.cycles, 2);
        assert_eq!(reports[0].status, CompletionStatus::PhaseComplete(1));
        assert_eq!(reports[1].status, CompletionStatus::Complete);
        assert_eq!(reports[1].iterations, 2);
        // Every cycle still runs analysis, even the final one.
        assert_eq!(analysis.calls(), 2);
    }

    #[test]
    fn run_resumes_from_persisted_state() {
        let harness = Harness::new(1);
        write_state(
            &harness.workspace.paths().state_path,
            &SupervisorState {
                target_phase: Some(Phase::Three),
                cycles: 7,
                manifest_hash: None,
            },
        )
        .expect("state");
        let agent = ScriptedAgent::new(vec![
            ScriptedReply::output("ANVIL_PHASE_3_COMPLETE"),
            ScriptedReply::output("ANVIL_COMPLETE"),
        ]);
        let analysis = ScriptedAgent::new(Vec::new());
        let supervisor = Supervisor::new(
            harness.workspace.paths(),
            harness.workspace.config(),
            &harness.snapshots,
            &agent,
            &analysis,
            &harness.registry,
            &harness.rebuilder,
        )
        .expect("supervisor");

        let mut reports = Vec::new();
        supervisor.run(|r| reports.push(r.clone())).expect("run");

        assert_eq!(reports[0].cycle, 8);
        assert_eq!(reports[0].target, Phase::Three);
        assert_eq!(reports[1].target, Phase::Complete);
        let state = load_state(&harness.workspace.paths().state_path).expect("state");
        assert_eq!(state.cycles, 9);
        assert_eq!(state.target_phase, Some(Phase::Complete));
    }

    #[test]
    fn cycle_survives_unwritable_progress_log() {
        let harness = Harness::new(3);
        std::fs::create_dir_all(&harness.workspace.paths().progress_path).expect("progress dir");
        let agent = ScriptedAgent::new(vec![ScriptedReply::output("ANVIL_PHASE_1_COMPLETE")]);
        let analysis = ScriptedAgent::new(Vec::new());
        let mut state = SupervisorState::default();

        let report = harness.cycle(&agent, &analysis, &mut state);

        assert_eq!(agent.calls(), 1);
        assert_eq!(report.status, CompletionStatus::PhaseComplete(1));
        assert_eq!(state.target_phase, Some(Phase::Two));
    }

    #[test]
    fn explicit_target_phase_replaces_persisted_one() {
        let harness = Harness::new(1);
        write_state(
            &harness.workspace.paths().state_path,
            &SupervisorState {
                target_phase: Some(Phase::One),
                cycles: 3,
                manifest_hash: None,
            },
        )
        .expect("state");
        let agent = ScriptedAgent::new(vec![
            ScriptedReply::output("ANVIL_PHASE_2_COMPLETE"),
            ScriptedReply::output("ANVIL_COMPLETE"),
        ]);
        let analysis = ScriptedAgent::new(Vec::new());
        let supervisor = Supervisor::new(
            harness.workspace.paths(),
            harness.workspace.config(),
            &harness.snapshots,
            &agent,
            &analysis,
            &harness.registry,
            &harness.rebuilder,
        )
        .expect("supervisor")
        .with_target_override(Some(Phase::Two));

        let mut reports = Vec::new();
        supervisor.run(|r| reports.push(r.clone())).expect("run");

        assert_eq!(reports[0].target, Phase::Two);
        assert_eq!(reports[0].status, CompletionStatus::PhaseComplete(2));
        assert_eq!(reports[1].target, Phase::Three);
        assert_eq!(reports[1].status, CompletionStatus::Complete);
    }

    #[test]
    fn persisted_target_phase_wins_without_override() {
        let harness = Harness::new(1);
        write_state(
            &harness.workspace.paths().state_path,
            &SupervisorState {
                target_phase: Some(Phase::Two),
                cycles: 1,
                manifest_hash: None,
            },
        )
        .expect("state");
        let agent = ScriptedAgent::new(vec![ScriptedReply::output("ANVIL_COMPLETE")]);
        let analysis = ScriptedAgent::new(Vec::new());
        let supervisor = Supervisor::new(
            harness.workspace.paths(),
            harness.workspace.config(),
            &harness.snapshots,
            &agent,
            &analysis,
            &harness.registry,
            &harness.rebuilder,
        )
        .expect("supervisor")
        .with_target_override(None);

        let mut reports = Vec::new();
        supervisor.run(|r| reports.push(r.clone())).expect("run");

        assert_eq!(reports[0].target, Phase::Two);
    }
}
