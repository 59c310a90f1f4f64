//! Render invocation for YT StoryMaker
//!
//! [`RenderBackend`] executes a composition graph and returns where the finished
//! container ended up. Both strategies share the [`ComposeError`] taxonomy and
//! the same time bound.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::composition::CompositionGraph;
use crate::config::{AppConfig, BackendKind, RemoteRenderConfig};
use crate::error::{ComposeError, ComposeResult};
use crate::ffmpeg::{build_args, EncodeSettings};
use crate::types::ArtifactRef;
use crate::video::run_command_with_timeout;

pub enum RenderBackend {
    Local(FfmpegRenderer),
    Remote(RemoteRenderer),
}

impl RenderBackend {
    pub fn from_config(config: &AppConfig, use_gpu: bool) -> Result<Self> {
        let timeout = Duration::from_secs(config.render.timeout_secs);
        match config.render.backend {
            BackendKind::Local => Ok(RenderBackend::Local(FfmpegRenderer::new(
                config.render.ffmpeg_path.clone(),
                EncodeSettings::from_config(&config.render, use_gpu),
                timeout,
            ))),
            BackendKind::Remote => {
                let remote = config
                    .render
                    .remote
                    .as_ref()
                    .ok_or_else(|| anyhow!("render.remote is not configured"))?;
                Ok(RenderBackend::Remote(RemoteRenderer::new(remote, timeout)))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RenderBackend::Local(_) => "local ffmpeg",
            RenderBackend::Remote(_) => "remote",
        }
    }

    /// Render `graph`. Returns once the artifact is complete or the backend gave up.
    pub async fn render(&self, graph: &CompositionGraph, output: &Path) -> ComposeResult<ArtifactRef> {
        match self {
            RenderBackend::Local(renderer) => renderer.render(graph, output).await,
            RenderBackend::Remote(renderer) => renderer.render(graph, output).await,
        }
    }
}

/// Runs ffmpeg on this machine
pub struct FfmpegRenderer {
    ffmpeg_path: String,
    settings: EncodeSettings,
    timeout: Duration,
}

impl FfmpegRenderer {
    pub fn new(ffmpeg_path: String, settings: EncodeSettings, timeout: Duration) -> Self {
        Self {
            ffmpeg_path,
            settings,
            timeout,
        }
    }

    pub async fn render(&self, graph: &CompositionGraph, output: &Path) -> ComposeResult<ArtifactRef> {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = build_args(graph, &self.settings, output);
        log::debug!("{} {}", self.ffmpeg_path, args.join(" "));

        let mut cmd = tokio::process::Command::new(&self.ffmpeg_path);
        cmd.args(&args);

        let result = run_command_with_timeout(&mut cmd, self.timeout).await;
        let output_status = match result {
            Ok(out) => out,
            Err(e) => {
                remove_partial(output).await;
                return Err(e);
            }
        };

        if !output_status.status.success() {
            remove_partial(output).await;
            let stderr = String::from_utf8_lossy(&output_status.stderr);
            let detail = if stderr.trim().is_empty() {
                format!("ffmpeg exited with {}", output_status.status)
            } else {
                stderr.to_string()
            };
            return Err(ComposeError::backend(&detail));
        }

        if !output.exists() {
            return Err(ComposeError::backend(&format!(
                "ffmpeg finished but {} was not written",
                output.display()
            )));
        }

        log::info!("Rendered {}", output.display());
        Ok(ArtifactRef::LocalPath(output.to_path_buf()))
    }
}

async fn remove_partial(output: &Path) {
    if output.exists() {
        if let Err(e) = tokio::fs::remove_file(output).await {
            log::warn!("Failed to remove partial output {}: {}", output.display(), e);
        }
    }
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    output_name: String,
    graph: &'a CompositionGraph,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RemoteState {
    Queued,
    Rendering,
    Done,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: RemoteState,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Submits the graph to a render service and polls until it finishes
pub struct RemoteRenderer {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    poll_initial: Duration,
    poll_max: Duration,
    timeout: Duration,
}

impl RemoteRenderer {
    pub fn new(config: &RemoteRenderConfig, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            poll_initial: Duration::from_millis(config.poll_initial_ms.max(1)),
            poll_max: Duration::from_millis(config.poll_max_ms.max(config.poll_initial_ms).max(1)),
            timeout,
        }
    }

    pub async fn render(&self, graph: &CompositionGraph, output: &Path) -> ComposeResult<ArtifactRef> {
        // The service cannot read our scratch directory
        if let Some(input) = graph.inputs.iter().find(|i| i.url.is_none()) {
            return Err(ComposeError::graph(
                "remote submission",
                format!(
                    "input {} has no remote URL; remote rendering needs every input reachable by URL",
                    input.path.display()
                ),
            ));
        }

        match tokio::time::timeout(self.timeout, self.submit_and_wait(graph, output)).await {
            Ok(result) => result,
            Err(_) => Err(ComposeError::RenderTimeout {
                after: self.timeout,
            }),
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn submit_and_wait(&self, graph: &CompositionGraph, output: &Path) -> ComposeResult<ArtifactRef> {
        let output_name = output
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "output.mp4".to_string());
        let body = SubmitRequest { output_name, graph };

        let response = self
            .request(self.client.post(format!("{}/renders", self.endpoint)))
            .json(&body)
            .send()
            .await
            .map_err(|e| ComposeError::backend(&format!("submit failed: {}", e)))?;
        let submitted: SubmitResponse = read_json(response, "submit").await?;
        log::info!("Remote render accepted as {}", submitted.id);

        let status_url = format!("{}/renders/{}", self.endpoint, submitted.id);
        let mut delay = self.poll_initial;

        loop {
            tokio::time::sleep(delay).await;

            let response = self
                .request(self.client.get(&status_url))
                .send()
                .await
                .map_err(|e| ComposeError::backend(&format!("status poll failed: {}", e)))?;
            let status: StatusResponse = read_json(response, "status").await?;

            match status.status {
                RemoteState::Done => {
                    let url = status.url.ok_or_else(|| {
                        ComposeError::backend("render reported done without an artifact URL")
                    })?;
                    log::info!("Remote render {} finished: {}", submitted.id, url);
                    return Ok(ArtifactRef::Url(url));
                }
                RemoteState::Failed => {
                    let detail = status
                        .error
                        .unwrap_or_else(|| "render failed without diagnostics".to_string());
                    return Err(ComposeError::backend(&detail));
                }
                state => log::debug!("Remote render {} is {:?}", submitted.id, state),
            }

            delay = (delay * 2).min(self.poll_max);
        }
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    what: &str,
) -> ComposeResult<T> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ComposeError::backend(&format!("{} response unreadable: {}", what, e)))?;
    if !status.is_success() {
        return Err(ComposeError::backend(&format!(
            "{} returned HTTP {}: {}",
            what, status, text
        )));
    }
    serde_json::from_str(&text)
        .map_err(|e| ComposeError::backend(&format!("{} response malformed: {} ({})", what, e, text)))
}

/// Default output location for a job
pub fn default_output_path(output_dir: &str, job_id: &str) -> PathBuf {
    Path::new(output_dir).join(format!("{}.mp4", job_id))
}
