//! Text generation backends
//!
//! Stages and the LLM classifier only see [`TextGenerator`]; the Ollama
//! client is the production implementation and uses a long-lived
//! `reqwest::Client` for connection pooling.

use crate::config::OrchestratorConfig;
use crate::error::{OrchestrationError, Result};
use crate::monitoring::MetricsCollector;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Prompt in, completion out
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Reusable Ollama client (connection-pooled)
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    usage: Option<Arc<MetricsCollector>>,
}

impl OllamaClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()
            .map_err(|e| {
                OrchestrationError::Configuration(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature,
            usage: None,
        })
    }

    /// Report prompt and completion token counts to `metrics`
    pub fn with_usage_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.usage = Some(metrics);
        self
    }

    pub fn from_config(config: &OrchestratorConfig) -> Result<Self> {
        Self::new(
            config.ollama_base_url.clone(),
            config.ollama_model.clone(),
            config.model_temperature,
            config.call_timeout,
        )
    }
}

#[async_trait]
impl TextGenerator for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
            },
        };

        debug!(model = %self.model, "Calling Ollama API");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Ollama request failed: {}", e);
                if e.is_timeout() || e.is_connect() {
                    OrchestrationError::TransientService(format!("Ollama unreachable: {}", e))
                } else {
                    OrchestrationError::Stage(format!("Ollama request error: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, "Ollama error response: {}", body);
            return Err(status_error(status, &body));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| {
            OrchestrationError::Stage(format!("Ollama parse error: {}", e))
        })?;

        let tokens = parsed.prompt_eval_count.unwrap_or(0) + parsed.eval_count.unwrap_or(0);
        debug!(model = %self.model, tokens, "Ollama call finished");
        if let Some(metrics) = &self.usage {
            metrics.record_llm_usage(&self.model, tokens);
        }

        if parsed.response.trim().is_empty() {
            return Err(OrchestrationError::Stage(
                "Empty response from Ollama".to_string(),
            ));
        }

        Ok(parsed.response)
    }
}

fn status_error(status: StatusCode, body: &str) -> OrchestrationError {
    let msg = format!("Ollama returned {}: {}", status, body);
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        OrchestrationError::TransientService(msg)
    } else {
        OrchestrationError::Stage(msg)
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

/// Deterministic generator for development and tests.
/// Keeps the pipeline functional without a model server.
pub struct CannedGenerator {
    rules: Vec<(String, String)>,
    default_reply: String,
}

impl CannedGenerator {
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            default_reply: default_reply.into(),
        }
    }

    /// Reply with `reply` whenever the prompt contains `needle`.
    /// Rules are checked in insertion order.
    pub fn with_rule(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((needle.into(), reply.into()));
        self
    }
}

#[async_trait]
impl TextGenerator for CannedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply.as_str())
            .unwrap_or(&self.default_reply);
        Ok(reply.to_string())
    }
}
