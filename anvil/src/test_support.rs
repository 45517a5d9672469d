//! Scripted doubles and workspace fixtures shared by unit and integration tests.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::types::SnapshotResult;
use crate::io::backend::ModelBackend;
use crate::io::config::{AnvilConfig, write_config};
use crate::io::executor::{Agent, AgentRequest, AgentResponse};
use crate::io::git::SnapshotStore;
use crate::io::init::{AnvilPaths, InitOptions, init_workspace};
use crate::io::manifest::Rebuilder;
use crate::io::prompt::PromptSources;

/// One canned agent response.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// The agent exited with the given code after printing `transcript`.
    Exit { code: i32, transcript: String },
    /// The agent hit its timeout after printing `transcript`.
    Timeout { transcript: String },
    /// The agent could not be run at all.
    Error(String),
}

impl ScriptedReply {
    pub fn output(transcript: &str) -> Self {
        Self::exit(0, transcript)
    }

    pub fn exit(code: i32, transcript: &str) -> Self {
        Self::Exit {
            code,
            transcript: transcript.to_string(),
        }
    }

    pub fn timeout() -> Self {
        Self::Timeout {
            transcript: String::new(),
        }
    }

    pub fn error(message: &str) -> Self {
        Self::Error(message.to_string())
    }
}

/// [`Agent`] that replays a queue of replies and records every prompt.
///
/// Once the queue is drained it keeps returning the fallback reply, which
/// defaults to an empty successful transcript.
#[derive(Debug)]
pub struct ScriptedAgent {
    replies: RefCell<VecDeque<ScriptedReply>>,
    fallback: ScriptedReply,
    requests: RefCell<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            fallback: ScriptedReply::output(""),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Agent that gives the same reply forever.
    pub fn always(reply: ScriptedReply) -> Self {
        Self {
            fallback: reply,
            ..Self::new(Vec::new())
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .map(|request| request.prompt.clone())
            .collect()
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl Agent for ScriptedAgent {
    fn invoke(&self, request: &AgentRequest) -> Result<AgentResponse> {
        self.requests.borrow_mut().push(request.clone());
        let reply = self
            .replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match reply {
            ScriptedReply::Exit { code, transcript } => Ok(AgentResponse {
                transcript,
                exit_code: Some(code),
                timed_out: false,
            }),
            ScriptedReply::Timeout { transcript } => Ok(AgentResponse {
                transcript,
                exit_code: None,
                timed_out: true,
            }),
            ScriptedReply::Error(message) => Err(anyhow!(message)),
        }
    }
}

/// [`SnapshotStore`] that records labels instead of touching git.
#[derive(Debug, Default)]
pub struct ScriptedSnapshots {
    labels: RefCell<Vec<String>>,
    pending_calls: Cell<usize>,
    fail: bool,
}

impl ScriptedSnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose every call fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn labels(&self) -> Vec<String> {
        self.labels.borrow().clone()
    }

    pub fn pending_calls(&self) -> usize {
        self.pending_calls.get()
    }
}

impl SnapshotStore for ScriptedSnapshots {
    fn snapshot(&self, label: &str) -> Result<SnapshotResult> {
        self.labels.borrow_mut().push(label.to_string());
        if self.fail {
            return Err(anyhow!("scripted snapshot failure"));
        }
        Ok(SnapshotResult::default())
    }

    fn pending(&self) -> Result<SnapshotResult> {
        self.pending_calls.set(self.pending_calls.get() + 1);
        if self.fail {
            return Err(anyhow!("scripted status failure"));
        }
        Ok(SnapshotResult {
            changed: true,
            files_touched: 1,
            summary: "?? src/main.c".to_string(),
        })
    }
}

/// In-memory [`ModelBackend`].
#[derive(Debug, Default)]
pub struct FakeBackend {
    installed: RefCell<BTreeSet<String>>,
    offline: bool,
    fail_pulls: Cell<bool>,
    pulls: RefCell<Vec<String>>,
}

impl FakeBackend {
    pub fn with_models(models: &[&str]) -> Self {
        Self {
            installed: RefCell::new(models.iter().map(|m| m.to_string()).collect()),
            ..Self::default()
        }
    }

    /// Backend that cannot be reached.
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    /// Make subsequent pulls fail.
    pub fn fail_pulls(&self) {
        self.fail_pulls.set(true);
    }

    /// Names passed to `pull_model`, in call order.
    pub fn pulls(&self) -> Vec<String> {
        self.pulls.borrow().clone()
    }
}

impl ModelBackend for FakeBackend {
    fn list_models(&self) -> Result<Vec<String>> {
        if self.offline {
            return Err(anyhow!("connection refused"));
        }
        Ok(self.installed.borrow().iter().cloned().collect())
    }

    fn pull_model(&self, name: &str) -> Result<()> {
        self.pulls.borrow_mut().push(name.to_string());
        if self.offline {
            return Err(anyhow!("connection refused"));
        }
        if self.fail_pulls.get() {
            return Err(anyhow!("pull model {name}: manifest not found"));
        }
        self.installed.borrow_mut().insert(name.to_string());
        Ok(())
    }
}

/// [`Rebuilder`] that counts invocations.
#[derive(Debug, Default)]
pub struct RecordingRebuilder {
    calls: Cell<usize>,
    fail: bool,
}

impl RecordingRebuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl Rebuilder for RecordingRebuilder {
    fn rebuild(&self, _manifest: &Path) -> Result<()> {
        self.calls.set(self.calls.get() + 1);
        if self.fail {
            return Err(anyhow!("scripted rebuild failure"));
        }
        Ok(())
    }
}

/// Initialized workspace in a temp dir with a base prompt and no iteration delay.
pub struct TestWorkspace {
    _temp: TempDir,
    root: PathBuf,
    paths: AnvilPaths,
    config: AnvilConfig,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let root = temp.path().to_path_buf();
        let paths = init_workspace(&root, &InitOptions { force: false })?;
        let config = AnvilConfig {
            iteration_delay_secs: 0,
            ..AnvilConfig::default()
        };
        write_config(&paths.config_path, &config)?;
        let workspace = Self {
            _temp: temp,
            root,
            paths,
            config,
        };
        workspace.write_prompt("Build a small C compiler in this directory.\n")?;
        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn paths(&self) -> &AnvilPaths {
        &self.paths
    }

    pub fn config(&self) -> &AnvilConfig {
        &self.config
    }

    /// Replace the in-memory and on-disk config.
    pub fn set_config(&mut self, config: AnvilConfig) -> Result<()> {
        write_config(&self.paths.config_path, &config)?;
        self.config = config;
        Ok(())
    }

    pub fn sources(&self) -> PromptSources {
        PromptSources::new(
            self.paths.resolve(&self.config.prompt_path),
            &self.paths.additions_path,
            &self.paths.learnings_path,
        )
    }

    pub fn write_prompt(&self, contents: &str) -> Result<()> {
        self.write(&self.config.prompt_path, contents)
    }

    /// Write a workspace-relative file.
    pub fn write(&self, rel: impl AsRef<Path>, contents: &str) -> Result<()> {
        let path = self.paths.resolve(rel.as_ref());
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    /// Read a workspace-relative file.
    pub fn read(&self, rel: impl AsRef<Path>) -> Result<String> {
        let path = self.paths.resolve(rel.as_ref());
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }
}
