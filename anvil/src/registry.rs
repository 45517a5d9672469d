//! Model registry: backend inventory plus the active model selection.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::io::backend::ModelBackend;
use crate::io::model_config::{ModelConfig, ModelConfigStore};

/// Combines a [`ModelBackend`] with the canonical [`ModelConfigStore`].
#[derive(Debug)]
pub struct ModelRegistry<B> {
    backend: B,
    store: ModelConfigStore,
    provider: String,
    backend_url: String,
}

impl<B: ModelBackend> ModelRegistry<B> {
    pub fn new(
        backend: B,
        store: ModelConfigStore,
        provider: impl Into<String>,
        backend_url: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            store,
            provider: provider.into(),
            backend_url: backend_url.into(),
        }
    }

    /// Installed models. An unreachable backend yields an empty set.
    pub fn list_models(&self) -> BTreeSet<String> {
        match self.backend.list_models() {
            Ok(models) => models.into_iter().collect(),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "backend unavailable, treating model list as empty");
                BTreeSet::new()
            }
        }
    }

    /// Pull a model. Safe to call when it is already installed.
    pub fn pull_model(&self, id: &str) -> Result<()> {
        self.backend
            .pull_model(id)
            .with_context(|| format!("pull model {id}"))
    }

    /// Make `id` the active model, pulling it first if the backend lacks it.
    ///
    /// The previous config stays in place if the pull or the write fails.
    #[instrument(skip_all, fields(model = id))]
    pub fn switch_model(&self, id: &str) -> Result<ModelConfig> {
        let installed = self.list_models();
        if !contains_model(&installed, id) {
            info!(model = id, "model not installed, pulling before switch");
            self.pull_model(id)?;
        }
        let cfg = ModelConfig {
            provider: self.provider.clone(),
            model: id.to_string(),
            backend_url: self.backend_url.clone(),
        };
        self.store.replace(&cfg)?;
        info!(model = id, "switched active model");
        Ok(cfg)
    }

    /// The active model, if one has been selected.
    pub fn current(&self) -> Result<Option<ModelConfig>> {
        self.store.load()
    }
}

/// Match model names, treating an omitted tag as `:latest`.
fn contains_model(installed: &BTreeSet<String>, id: &str) -> bool {
    let wanted = with_default_tag(id);
    installed.iter().any(|name| with_default_tag(name) == wanted)
}

fn with_default_tag(name: &str) -> String {
    if name.contains(':') {
        name.to_string()
    } else {
        format!("{name}:latest")
    }
}
