//! Autonomous build-loop orchestrator.
//!
//! Runs a coding agent against `PROMPT.md` until it prints a completion token,
//! and supervises those runs with failure analysis, model switching and
//! environment rebuilds. State lives under `.anvil/`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

use anvil::core::types::{IterationRecord, Phase};
use anvil::exit_codes;
use anvil::inner::{InnerConfig, InnerOutcome, run_inner};
use anvil::io::backend::HttpModelBackend;
use anvil::io::config::{AnvilConfig, Overrides, load_config};
use anvil::io::executor::CommandAgent;
use anvil::io::git::GitSnapshotStore;
use anvil::io::init::{AnvilPaths, InitOptions, init_workspace};
use anvil::io::manifest::CommandRebuilder;
use anvil::io::model_config::ModelConfigStore;
use anvil::io::prompt::PromptSources;
use anvil::logging;
use anvil::outer::{CycleReport, Supervisor};
use anvil::registry::ModelRegistry;

#[derive(Parser)]
#[command(name = "anvil", version, about = "Autonomous build-loop orchestrator")]
struct Cli {
    /// Workspace root containing `.anvil/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Upper bound for one inner run.
    #[arg(long, global = true, env = "ANVIL_MAX_ITERATIONS")]
    max_iterations: Option<u32>,

    /// Phase to watch for: 1, 2, 3 or "complete".
    #[arg(long, global = true, env = "ANVIL_TARGET_PHASE")]
    target_phase: Option<Phase>,

    /// Base URL of the model-serving backend.
    #[arg(long, global = true, env = "ANVIL_BACKEND_URL")]
    backend_url: Option<String>,

    /// Delay between inner iterations, in seconds.
    #[arg(long, global = true, env = "ANVIL_ITERATION_DELAY_SECS")]
    iteration_delay_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.anvil/` scaffolding and a placeholder `PROMPT.md`.
    Init {
        /// Overwrite existing anvil files.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the inner build loop once (exit 0 on completion, 1 on exhaustion).
    Run,
    /// Supervise inner runs until the overall completion token appears.
    Supervise,
    /// Inspect and change the active model.
    Models {
        #[command(subcommand)]
        command: ModelsCommand,
    },
}

#[derive(Subcommand)]
enum ModelsCommand {
    /// List models installed on the backend.
    List,
    /// Pull a model onto the backend.
    Pull { id: String },
    /// Make a model active, pulling it first if needed.
    Switch { id: String },
    /// Print the active model.
    Current,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let overrides = Overrides {
        max_iterations: cli.max_iterations,
        target_phase: cli.target_phase,
        backend_url: cli.backend_url.clone(),
        iteration_delay_secs: cli.iteration_delay_secs,
    };
    match cli.command {
        Command::Init { force } => cmd_init(&cli.root, force),
        Command::Run => cmd_run(&open_workspace(&cli.root, &overrides)?),
        Command::Supervise => cmd_supervise(
            &open_workspace(&cli.root, &overrides)?,
            overrides.target_phase,
        ),
        Command::Models { command } => cmd_models(&open_workspace(&cli.root, &overrides)?, command),
    }
}

/// An initialized workspace with its effective config.
struct Workspace {
    paths: AnvilPaths,
    config: AnvilConfig,
}

impl Workspace {
    fn sources(&self) -> PromptSources {
        PromptSources::new(
            self.paths.resolve(&self.config.prompt_path),
            &self.paths.additions_path,
            &self.paths.learnings_path,
        )
    }

    fn registry(&self) -> Result<ModelRegistry<HttpModelBackend>> {
        let backend = HttpModelBackend::new(
            &self.config.backend.url,
            Duration::from_secs(self.config.backend.request_timeout_secs),
            Duration::from_secs(self.config.backend.pull_timeout_secs),
        )?;
        Ok(ModelRegistry::new(
            backend,
            ModelConfigStore::new(&self.paths.model_config_path),
            self.config.backend.provider.clone(),
            self.config.backend.url.clone(),
        ))
    }
}

fn open_workspace(root: &Path, overrides: &Overrides) -> Result<Workspace> {
    let paths = AnvilPaths::new(root);
    if !paths.anvil_dir.is_dir() {
        return Err(anyhow!(
            "{} is not initialized (run `anvil init` first)",
            root.display()
        ));
    }
    let config = load_config(&paths.config_path)
        .with_context(|| format!("load {}", paths.config_path.display()))?;
    let config = overrides.apply(config)?;
    Ok(Workspace { paths, config })
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_workspace(root, &InitOptions { force })?;
    println!("initialized {}", paths.anvil_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_run(ws: &Workspace) -> Result<i32> {
    let agent = CommandAgent::new(ws.config.agent.command.clone())?;
    let snapshots = GitSnapshotStore::new(&ws.paths.root);
    let model = ModelConfigStore::new(&ws.paths.model_config_path).load()?;

    let report = run_inner(
        &ws.paths,
        &ws.sources(),
        &snapshots,
        &agent,
        &InnerConfig::from_config(&ws.config),
        model.as_ref(),
        print_record,
    )?;
    match report.outcome {
        InnerOutcome::Complete { iteration, status } => {
            println!("complete after {iteration} iterations ({status:?})");
            Ok(exit_codes::OK)
        }
        InnerOutcome::Exhausted { iterations } => {
            println!("exhausted after {iterations} iterations without completion");
            Ok(exit_codes::EXHAUSTED)
        }
    }
}

fn cmd_supervise(ws: &Workspace, target_override: Option<Phase>) -> Result<i32> {
    let agent = CommandAgent::new(ws.config.agent.command.clone())?;
    let analysis_agent = CommandAgent::new(ws.config.analysis_command().to_vec())?;
    let snapshots = GitSnapshotStore::new(&ws.paths.root);
    let registry = ws.registry()?;
    let rebuilder = CommandRebuilder::new(
        ws.config.environment.rebuild_command.clone(),
        &ws.paths.root,
        Duration::from_secs(ws.config.environment.rebuild_timeout_secs),
    );

    let supervisor = Supervisor::new(
        &ws.paths,
        &ws.config,
        &snapshots,
        &agent,
        &analysis_agent,
        &registry,
        &rebuilder,
    )?
    .with_target_override(target_override);
    let outcome = supervisor.run(print_cycle)?;
    println!("done after {} cycles", outcome.cycles);
    Ok(exit_codes::OK)
}

fn cmd_models(ws: &Workspace, command: ModelsCommand) -> Result<i32> {
    let registry = ws.registry()?;
    match command {
        ModelsCommand::List => {
            for name in registry.list_models() {
                println!("{name}");
            }
        }
        ModelsCommand::Pull { id } => {
            registry.pull_model(&id)?;
            println!("pulled {id}");
        }
        ModelsCommand::Switch { id } => {
            let cfg = registry.switch_model(&id)?;
            println!("active model: {} ({})", cfg.model, cfg.provider);
        }
        ModelsCommand::Current => match registry.current()? {
            Some(cfg) => println!("{} ({}, {})", cfg.model, cfg.provider, cfg.backend_url),
            None => println!("no model selected"),
        },
    }
    Ok(exit_codes::OK)
}

fn print_record(record: &IterationRecord) {
    println!(
        "iteration {}: {} files touched in {:.1}s",
        record.index,
        record.files_touched,
        record.duration.as_secs_f64()
    );
}

fn print_cycle(report: &CycleReport) {
    println!(
        "cycle {}: phase {} -> {:?} after {} iterations, {} error lines{}{}",
        report.cycle,
        report.target,
        report.status,
        report.iterations,
        report.error_lines,
        report
            .switched_to
            .as_deref()
            .map(|m| format!(", switched to {m}"))
            .unwrap_or_default(),
        if report.rebuilt { ", rebuilt" } else { "" }
    );
}
