//! Prompt inputs on disk and analysis prompt templates.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::prompt::compose;
use crate::io::fsutil::{read_optional, write_atomic};

const ANALYSIS_TEMPLATE: &str = include_str!("prompts/analysis.md");
const ADDITIONS_TEMPLATE: &str = include_str!("prompts/additions.md");

/// A free-text document that is read whole and replaced whole.
#[derive(Debug, Clone)]
pub struct Document {
    path: PathBuf,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Contents, or `None` when the file is missing or blank.
    pub fn read(&self) -> Result<Option<String>> {
        Ok(read_optional(&self.path)?.filter(|s| !s.trim().is_empty()))
    }

    /// Replace the whole document.
    pub fn replace(&self, contents: &str) -> Result<()> {
        let mut buf = contents.trim_end().to_string();
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }
}

/// Files the effective prompt is assembled from.
#[derive(Debug, Clone)]
pub struct PromptSources {
    pub base_path: PathBuf,
    pub additions: Document,
    pub learnings: Document,
}

impl PromptSources {
    pub fn new(
        base_path: impl Into<PathBuf>,
        additions_path: impl Into<PathBuf>,
        learnings_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            additions: Document::new(additions_path),
            learnings: Document::new(learnings_path),
        }
    }

    /// Read all sources and compose the effective prompt.
    ///
    /// Called every iteration so edits between iterations take effect.
    pub fn compose(&self) -> Result<String> {
        let base = std::fs::read_to_string(&self.base_path)
            .with_context(|| format!("read base prompt {}", self.base_path.display()))?;
        let additions = self.additions.read()?;
        let learnings = self.learnings.read()?;
        debug!(
            base_bytes = base.len(),
            has_additions = additions.is_some(),
            has_learnings = learnings.is_some(),
            "composing prompt"
        );
        Ok(compose(&base, additions.as_deref(), learnings.as_deref()))
    }
}

/// Template engine wrapper around minijinja for analyzer prompts.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("analysis", ANALYSIS_TEMPLATE)
            .context("load analysis template")?;
        env.add_template("additions", ADDITIONS_TEMPLATE)
            .context("load additions template")?;
        Ok(Self { env })
    }

    pub fn render_analysis(
        &self,
        progress: &str,
        errors: &[&str],
        learnings: Option<&str>,
    ) -> Result<String> {
        let template = self.env.get_template("analysis")?;
        let rendered = template.render(context! {
            progress => progress.trim(),
            errors => errors,
            error_count => errors.len(),
            learnings => learnings.map(str::trim).filter(|s| !s.is_empty()),
        })?;
        Ok(rendered)
    }

    pub fn render_additions(&self, learnings: &str, current: Option<&str>) -> Result<String> {
        let template = self.env.get_template("additions")?;
        let rendered = template.render(context! {
            learnings => learnings.trim(),
            current => current.map(str::trim).filter(|s| !s.is_empty()),
        })?;
        Ok(rendered)
    }
}
