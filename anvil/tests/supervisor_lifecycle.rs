//! Lifecycle tests for the supervisor driving inner runs end to end.
//!
//! These tests run `Supervisor::run` over several cycles with scripted agents
//! and a real git snapshot store to verify phase advancement, learnings
//! feedback into the prompt, and termination on the overall token.

use std::fs;

use anvil::core::types::{CompletionStatus, Phase};
use anvil::io::git::GitSnapshotStore;
use anvil::io::model_config::ModelConfigStore;
use anvil::io::state::load_state;
use anvil::outer::Supervisor;
use anvil::registry::ModelRegistry;
use anvil::test_support::{
    FakeBackend, RecordingRebuilder, ScriptedAgent, ScriptedReply, TestWorkspace,
};

/// Phases 1 → 2 → 3 → complete, one cycle each.
///
/// Cycle sequence:
/// 1. Target 1: agent prints phase 1 token on iteration 1.
/// 2. Target 2: agent fails once, then prints phase 2 token.
/// 3. Target 3: agent prints phase 3 token.
/// 4. Target complete: agent prints the overall token, supervisor stops.
#[test]
fn supervisor_walks_all_phases_to_done() {
    let workspace = TestWorkspace::new().expect("workspace");
    workspace
        .write("Dockerfile", "FROM debian:bookworm\n")
        .expect("manifest");
    let snapshots = GitSnapshotStore::new(workspace.root());
    let agent = ScriptedAgent::new(vec![
        ScriptedReply::output("lexer written\nANVIL_PHASE_1_COMPLETE\n"),
        ScriptedReply::exit(1, "error: parser.c:10: expected ';'\n"),
        ScriptedReply::output("parser fixed\nANVIL_PHASE_2_COMPLETE\n"),
        ScriptedReply::output("codegen done\nANVIL_PHASE_3_COMPLETE\n"),
        ScriptedReply::output("all tests pass\nANVIL_COMPLETE\n"),
    ]);
    let analysis = ScriptedAgent::always(ScriptedReply::output(
        "### Rules\n- Run `make test` before printing a completion token.",
    ));
    let registry = ModelRegistry::new(
        FakeBackend::with_models(&[]),
        ModelConfigStore::new(&workspace.paths().model_config_path),
        "ollama",
        "http://localhost:11434",
    );
    let rebuilder = RecordingRebuilder::new();

    let supervisor = Supervisor::new(
        workspace.paths(),
        workspace.config(),
        &snapshots,
        &agent,
        &analysis,
        &registry,
        &rebuilder,
    )
    .expect("supervisor");
    let mut reports = Vec::new();
    let outcome = supervisor
        .run(|report| reports.push(report.clone()))
        .expect("run");

    assert_eq!(outcome.cycles, 4);
    let targets: Vec<Phase> = reports.iter().map(|r| r.target).collect();
    assert_eq!(
        targets,
        vec![Phase::One, Phase::Two, Phase::Three, Phase::Complete]
    );
    assert_eq!(reports[1].iterations, 2);
    assert_eq!(reports[1].error_lines, 1);
    assert_eq!(reports[3].status, CompletionStatus::Complete);
    assert!(reports.iter().all(|r| r.switched_to.is_none()));

    // Manifest seen once, never changed afterwards.
    assert_eq!(rebuilder.calls(), 1);
    assert!(reports[0].rebuilt);

    // Learnings from the first cycle reach the next cycle's prompt.
    let prompts = agent.prompts();
    assert!(!prompts[0].contains("## Learnings"));
    assert!(prompts[1].contains("## Learnings"));
    assert!(prompts[1].contains("Run `make test`"));

    let state = load_state(&workspace.paths().state_path).expect("state");
    assert_eq!(state.cycles, 4);
    assert_eq!(state.target_phase, Some(Phase::Complete));
    assert!(state.manifest_hash.is_some());

    let session = fs::read_to_string(&workspace.paths().session_log_path).expect("session log");
    assert!(session.contains("lexer written"));
    assert!(session.contains("all tests pass"));
}

/// Short regenerated additions never replace the existing ones.
#[test]
fn additions_below_threshold_are_kept_out_of_prompt() {
    let workspace = TestWorkspace::new().expect("workspace");
    let snapshots = GitSnapshotStore::new(workspace.root());
    let agent = ScriptedAgent::new(vec![
        ScriptedReply::output("ANVIL_PHASE_1_COMPLETE"),
        ScriptedReply::output("ANVIL_COMPLETE"),
    ]);
    let analysis = ScriptedAgent::always(ScriptedReply::output("- tiny"));
    let registry = ModelRegistry::new(
        FakeBackend::offline(),
        ModelConfigStore::new(&workspace.paths().model_config_path),
        "ollama",
        "http://localhost:11434",
    );
    let rebuilder = RecordingRebuilder::new();

    let supervisor = Supervisor::new(
        workspace.paths(),
        workspace.config(),
        &snapshots,
        &agent,
        &analysis,
        &registry,
        &rebuilder,
    )
    .expect("supervisor");
    supervisor.run(|_| {}).expect("run");

    let additions = workspace.sources().additions.read().expect("additions");
    assert_eq!(additions, None);
    assert!(!agent.prompts()[1].contains("## Prompt Additions"));
}
