//! Loopback HTTP client for both runtime flavors.
//!
//! The daemon flavor (ollama) gets a single-shot generate call; the
//! managed flavor (llama-server) gets a raw completion call. Daemon URLs
//! come from configuration and pass the local-only policy first; managed
//! URLs are self-constructed loopback addresses and skip it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::catalog::ModelSpec;
use crate::error::EngineError;

use super::prompt::strip_reasoning;

/// Daemon requests are quick single-shot generates.
const DAEMON_TIMEOUT: Duration = Duration::from_secs(30);
/// Managed models, reasoning-tuned ones especially, can take a while.
const MANAGED_TIMEOUT: Duration = Duration::from_secs(120);

const DEFAULT_DAEMON_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_MAX_TOKENS: u32 = 512;
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Stop markers shared by common instruction-tuned model families.
const DEFAULT_STOP: &[&str] = &["</s>", "<|im_end|>", "\n\nUser:", "\n\nQuestion:"];

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: u32,
    temperature: f32,
    stop: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    content: Option<String>,
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: String,
}

pub struct CompletionClient {
    http: reqwest::Client,
    allow_remote: bool,
}

impl CompletionClient {
    pub fn new(allow_remote: bool) -> Self {
        Self {
            http: reqwest::Client::builder().build().unwrap_or_default(),
            allow_remote,
        }
    }

    /// Reject non-loopback hosts unless remote runtimes were explicitly
    /// opted into. Unparseable URLs are treated as remote.
    pub fn assert_local(&self, url: &str) -> Result<(), EngineError> {
        if self.allow_remote {
            return Ok(());
        }
        let host = Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_owned));
        match host.as_deref() {
            Some("127.0.0.1") | Some("localhost") => Ok(()),
            _ => Err(EngineError::RemoteDisabled(url.to_string())),
        }
    }

    /// Single-shot generate against a pre-existing daemon.
    pub async fn daemon_generate(
        &self,
        spec: &ModelSpec,
        message: &str,
    ) -> Result<String, EngineError> {
        let base_url = spec.base_url.as_deref().unwrap_or(DEFAULT_DAEMON_URL);
        self.assert_local(base_url)?;

        let request = GenerateRequest {
            model: spec.artifact.as_deref().unwrap_or_default(),
            prompt: message,
            stream: false,
        };
        let timeout = spec
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DAEMON_TIMEOUT);

        let body: GenerateResponse = self
            .post_json(&format!("{}/api/generate", base_url), &request, timeout)
            .await?;
        Ok(body.response.trim().to_string())
    }

    /// Raw completion against a managed llama-server instance. Reasoning
    /// markup is stripped from the result before it is returned.
    pub async fn managed_completion(
        &self,
        base_url: &str,
        spec: &ModelSpec,
        prompt: &str,
    ) -> Result<String, EngineError> {
        let stop = spec.stop_sequences.clone().unwrap_or_else(|| {
            DEFAULT_STOP.iter().map(|marker| marker.to_string()).collect()
        });
        let request = CompletionRequest {
            prompt,
            n_predict: spec.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: spec.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            stop,
        };
        let timeout = spec
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(MANAGED_TIMEOUT);

        let body: CompletionResponse = self
            .post_json(&format!("{}/completion", base_url), &request, timeout)
            .await?;

        if let Some(content) = body.content {
            return Ok(strip_reasoning(&content));
        }
        Ok(body
            .choices
            .first()
            .map(|choice| strip_reasoning(&choice.text))
            .unwrap_or_default())
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        payload: &impl Serialize,
        timeout: Duration,
    ) -> Result<T, EngineError> {
        debug!("POST {} (timeout {:?})", url, timeout);
        let response = self
            .http
            .post(url)
            .timeout(timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| EngineError::Runtime(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Runtime(format!(
                "{} returned {}: {}",
                url, status, body
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| EngineError::Runtime(format!("invalid response from {}: {}", url, e)))
    }
}
