//! OpenAI-Compatible Client
//!
//! Generation client for the OpenAI chat completions API and servers that
//! speak it (vLLM, llama.cpp server, hosted proxies).
//!
//! - `/v1/models` - reachability and credential check
//! - `/v1/chat/completions` - batch or SSE-streamed completions

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::lines::LineBuffer;
use super::traits::{BackendError, GenerateOptions, GenerationClient, GenerationResult, TextStream};

/// Default OpenAI API address
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

const DEFAULT_MAX_TOKENS: u32 = 2000;
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_TOP_P: f32 = 1.0;

/// OpenAI-compatible generation client
#[derive(Clone, Debug)]
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    /// Create a client; an empty `api_key` fails at initialisation
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| BackendError::Other(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }

    /// Model served by this client
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn models_url(&self) -> String {
        format!("{}/v1/models", self.base_url)
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn request_body(&self, prompt: &str, options: &GenerateOptions, stream: bool) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(ref system) = options.system_prompt {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt}));

        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": options.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            "top_p": DEFAULT_TOP_P,
            "stream": stream,
        })
    }

    async fn post_completions(
        &self,
        prompt: &str,
        options: &GenerateOptions,
        stream: bool,
    ) -> Result<reqwest::Response, BackendError> {
        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
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

/// One SSE event from a streamed completion
#[derive(Debug, PartialEq)]
enum SseEvent {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseEvent, BackendError> {
    let Some(payload) = line.strip_prefix("data:").map(str::trim) else {
        return Ok(SseEvent::Skip);
    };
    if payload == "[DONE]" {
        return Ok(SseEvent::Done);
    }

    let data: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| BackendError::InvalidResponse(format!("bad stream event: {e}")))?;

    Ok(data
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map_or(SseEvent::Skip, |c| SseEvent::Delta(c.to_string())))
}

/// Send one event downstream; `true` once streaming should stop
async fn forward_event(
    line: Result<String, BackendError>,
    tx: &mpsc::Sender<Result<String, BackendError>>,
) -> bool {
    match line.and_then(|line| parse_sse_line(&line)) {
        Ok(SseEvent::Delta(text)) => tx.send(Ok(text)).await.is_err(),
        Ok(SseEvent::Done) => true,
        Ok(SseEvent::Skip) => false,
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            true
        }
    }
}

#[async_trait]
impl GenerationClient for OpenAiClient {
    fn name(&self) -> &str {
        "OpenAI"
    }

    async fn initialize(&self) -> Result<bool, BackendError> {
        if self.api_key.is_empty() {
            return Err(BackendError::MissingCredentials("no API key configured".to_string()));
        }

        tracing::info!(model = %self.model, base_url = %self.base_url, "OpenAI client initialized");
        Ok(true)
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<GenerationResult, BackendError> {
        let start = Instant::now();
        let response = self.post_completions(prompt, options, false).await?;
        let data: serde_json::Value = response.json().await?;

        let content = data
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| BackendError::InvalidResponse("missing choices[0].message".to_string()))?
            .to_string();
        let finish_reason = data
            .pointer("/choices/0/finish_reason")
            .and_then(|f| f.as_str())
            .unwrap_or("stop")
            .to_string();
        let tokens_used = data
            .pointer("/usage/total_tokens")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);

        Ok(GenerationResult {
            content,
            tokens_used,
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            model: self.model.clone(),
            finish_reason,
        })
    }

    async fn stream_generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<TextStream, BackendError> {
        let response = self.post_completions(prompt, options, true).await?;
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
                    if forward_event(line, &tx).await {
                        return;
                    }
                }
            }

            if let Some(line) = lines.finish() {
                if forward_event(line, &tx).await {
                    return;
                }
            }
            let _ = tx
                .send(Err(BackendError::Stream("stream ended before [DONE]".to_string())))
                .await;
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(self.models_url())
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
