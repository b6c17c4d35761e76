//! Ollama Client
//!
//! Generation client for an Ollama server.
//!
//! # Ollama API
//!
//! - `/api/tags` - List available models (used for init and health)
//! - `/api/generate` - Generate completions (streaming or batch)
//!
//! Streaming responses are newline-delimited JSON objects carrying a
//! `response` fragment and a final `done: true` marker.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::lines::LineBuffer;
use super::traits::{BackendError, GenerateOptions, GenerationClient, GenerationResult, TextStream};

/// Default Ollama address
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

const DEFAULT_MAX_TOKENS: u32 = 2000;
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Ollama generation client
#[derive(Clone, Debug)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    http_client: reqwest::Client,
}

impl OllamaClient {
    /// Create a client for `model` served at `base_url`
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| BackendError::Other(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            http_client,
        })
    }

    /// Model served by this client
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }

    fn build_prompt(prompt: &str, options: &GenerateOptions) -> String {
        match options.system_prompt {
            Some(ref system) => format!("{system}\n\n{prompt}"),
            None => prompt.to_string(),
        }
    }

    fn request_body(&self, prompt: &str, options: &GenerateOptions, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "prompt": Self::build_prompt(prompt, options),
            "stream": stream,
            "options": {
                "temperature": options.temperature.unwrap_or(DEFAULT_TEMPERATURE),
                "num_predict": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            },
        })
    }

    async fn post_generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
        stream: bool,
    ) -> Result<reqwest::Response, BackendError> {
        let response = self
            .http_client
            .post(self.generate_url())
            .json(&self.request_body(prompt, options, stream))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                backend: self.name().to_string(),
                status,
                body,
            });
        }

        Ok(response)
    }
}

/// Parsed NDJSON line: optional text fragment and the `done` flag
fn parse_line(line: &str) -> Result<(Option<String>, bool), BackendError> {
    let data: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| BackendError::InvalidResponse(format!("bad stream line: {e}")))?;

    if let Some(error) = data.get("error").and_then(|e| e.as_str()) {
        return Err(BackendError::Stream(error.to_string()));
    }

    let token = data
        .get("response")
        .and_then(|r| r.as_str())
        .filter(|r| !r.is_empty())
        .map(String::from);
    let done = data
        .get("done")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);

    Ok((token, done))
}

/// Send one line's fragment downstream; `true` once streaming should stop
async fn forward_line(
    line: Result<String, BackendError>,
    tx: &mpsc::Sender<Result<String, BackendError>>,
) -> bool {
    match line.and_then(|line| parse_line(&line)) {
        Ok((token, done)) => {
            if let Some(token) = token {
                if tx.send(Ok(token)).await.is_err() {
                    // Receiver dropped
                    return true;
                }
            }
            done
        }
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            true
        }
    }
}

#[async_trait]
impl GenerationClient for OllamaClient {
    fn name(&self) -> &str {
        "Ollama"
    }

    async fn initialize(&self) -> Result<bool, BackendError> {
        let response = self
            .http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        if response.status().is_success() {
            let data: serde_json::Value = response.json().await?;
            let models: Vec<&str> = data
                .get("models")
                .and_then(|m| m.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
                        .collect()
                })
                .unwrap_or_default();

            if !models.contains(&self.model.as_str()) {
                tracing::warn!(model = %self.model, available = ?models, "Model not found on Ollama server");
            }
        }

        tracing::info!(model = %self.model, "Ollama client initialized");
        Ok(true)
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<GenerationResult, BackendError> {
        let start = Instant::now();
        let response = self.post_generate(prompt, options, false).await?;
        let data: serde_json::Value = response.json().await?;

        let content = data
            .get("response")
            .and_then(|r| r.as_str())
            .unwrap_or("")
            .to_string();
        let tokens_used = data
            .get("eval_count")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);

        Ok(GenerationResult {
            content,
            tokens_used,
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            model: self.model.clone(),
            finish_reason: "stop".to_string(),
        })
    }

    async fn stream_generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<TextStream, BackendError> {
        let response = self.post_generate(prompt, options, true).await?;
        let mut bytes = response.bytes_stream();
        let (tx, rx) = mpsc::channel(100);

        tokio::spawn(async move {
            let mut lines = LineBuffer::default();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(BackendError::Stream(e.to_string()))).await;
                        return;
                    }
                };
                lines.extend(&chunk);

                while let Some(line) = lines.next_line() {
                    if forward_line(line, &tx).await {
                        return;
                    }
                }
            }

            if let Some(line) = lines.finish() {
                if forward_line(line, &tx).await {
                    return;
                }
            }
            let _ = tx
                .send(Err(BackendError::Stream("stream ended before done".to_string())))
                .await;
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
