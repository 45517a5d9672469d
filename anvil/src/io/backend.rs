//! HTTP client for the model-serving backend.
//!
//! Only two endpoints are used: `GET /api/tags` to list installed models and
//! `POST /api/pull` to fetch one. Pull progress arrives as newline-delimited
//! JSON `{status}` events.

use std::io::{BufRead, BufReader, Read};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::Client as HttpClient;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument};

/// Inventory operations the model registry needs from a backend.
pub trait ModelBackend {
    /// Names of installed models.
    fn list_models(&self) -> Result<Vec<String>>;
    /// Fetch a model; returns once the backend reports the final status.
    fn pull_model(&self, name: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PullEvent {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Backend speaking the Ollama-style HTTP API.
#[derive(Debug, Clone)]
pub struct HttpModelBackend {
    base_url: String,
    client: HttpClient,
    pull_client: HttpClient,
}

impl HttpModelBackend {
    pub fn new(base_url: &str, request_timeout: Duration, pull_timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(anyhow!("backend url must not be empty"));
        }
        let client = HttpClient::builder()
            .connect_timeout(request_timeout)
            .timeout(request_timeout)
            .build()
            .context("build http client")?;
        let pull_client = HttpClient::builder()
            .connect_timeout(request_timeout)
            .timeout(pull_timeout)
            .build()
            .context("build pull http client")?;
        Ok(Self {
            base_url,
            client,
            pull_client,
        })
    }

    fn url_for_path(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl ModelBackend for HttpModelBackend {
    #[instrument(skip_all, fields(base_url = %self.base_url))]
    fn list_models(&self) -> Result<Vec<String>> {
        let body = self
            .client
            .get(self.url_for_path("api/tags"))
            .send()
            .context("request model tags")?
            .error_for_status()
            .context("model tags status")?
            .text()
            .context("read model tags body")?;
        let models = parse_tags(&body)?;
        debug!(count = models.len(), "listed backend models");
        Ok(models)
    }

    #[instrument(skip_all, fields(base_url = %self.base_url, model = name))]
    fn pull_model(&self, name: &str) -> Result<()> {
        info!(model = name, "pulling model");
        let response = self
            .pull_client
            .post(self.url_for_path("api/pull"))
            .json(&json!({ "name": name, "stream": true }))
            .send()
            .with_context(|| format!("request pull of {name}"))?
            .error_for_status()
            .with_context(|| format!("pull {name} status"))?;
        let final_status = read_pull_stream(response)?;
        info!(model = name, status = %final_status, "pull finished");
        Ok(())
    }
}

fn parse_tags(body: &str) -> Result<Vec<String>> {
    let tags: TagsResponse = serde_json::from_str(body).context("parse model tags")?;
    Ok(tags.models.into_iter().map(|m| m.name).collect())
}

/// Consume pull progress events, returning the final status.
///
/// Fails on an `error` event or when the stream ends without `success`.
fn read_pull_stream<R: Read>(reader: R) -> Result<String> {
    let mut last_status: Option<String> = None;
    for line in BufReader::new(reader).lines() {
        let line = line.context("read pull stream")?;
        if line.trim().is_empty() {
            continue;
        }
        let event: PullEvent =
            serde_json::from_str(&line).with_context(|| format!("parse pull event '{line}'"))?;
        if let Some(error) = event.error {
            bail!("pull failed: {error}");
        }
        if let Some(status) = event.status {
            if last_status.as_deref() != Some(status.as_str()) {
                debug!(status = %status, "pull progress");
            }
            last_status = Some(status);
        }
    }
    match last_status {
        Some(status) if status == "success" => Ok(status),
        Some(status) => Err(anyhow!("pull ended without success (last status '{status}')")),
        None => Err(anyhow!("pull stream was empty")),
    }
}
