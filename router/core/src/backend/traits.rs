//! Generation Client Traits
//!
//! The router treats every backend as an opaque [`GenerationClient`]. This
//! keeps selection, retry and health logic independent of provider
//! details (API formats, auth, streaming framing).
//!
//! # Design Philosophy
//!
//! The trait covers exactly what routing needs:
//! - One-shot initialisation (reachability, credentials)
//! - Batch and streaming generation
//! - A cheap liveness probe

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Finite stream of generated text chunks
pub type TextStream = BoxStream<'static, Result<String, BackendError>>;

/// Errors raised by generation clients
#[derive(Clone, Debug, Error, PartialEq)]
pub enum BackendError {
    /// Transport-level failure reaching the backend
    #[error("connection failed: {0}")]
    Connection(String),
    /// Backend answered with a non-success status
    #[error("{backend} returned {status}: {body}")]
    Status {
        /// Backend name
        backend: String,
        /// HTTP status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },
    /// Response could not be understood
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// Streaming response broke off
    #[error("stream error: {0}")]
    Stream(String),
    /// Required credentials are not configured
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Connection(err.to_string())
        }
    }
}

/// Per-request generation options
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerateOptions {
    /// System prompt prepended by the client
    pub system_prompt: Option<String>,
    /// Token ceiling (client default if unset)
    pub max_tokens: Option<u32>,
    /// Sampling temperature (client default if unset)
    pub temperature: Option<f32>,
}

impl GenerateOptions {
    /// Set system prompt
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }
}

/// Completed generation
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationResult {
    /// Generated text
    pub content: String,
    /// Tokens consumed, as reported by the backend
    pub tokens_used: u64,
    /// Backend-measured latency
    pub latency_ms: f64,
    /// Model that produced the text
    pub model: String,
    /// Why generation stopped
    pub finish_reason: String,
}

impl GenerationResult {
    /// Result with `finish_reason = "stop"`
    pub fn new(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tokens_used: 0,
            latency_ms: 0.0,
            model: model.into(),
            finish_reason: "stop".to_string(),
        }
    }
}

/// Generation client trait
///
/// Implement this trait to put a new backend behind the router.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Client name for logs (e.g., "Ollama", "OpenAI")
    fn name(&self) -> &str;

    /// Prepare the client; safe to call more than once
    ///
    /// `Ok(false)` and `Err(_)` both leave the endpoint unavailable.
    async fn initialize(&self) -> Result<bool, BackendError>;

    /// Generate a complete response
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<GenerationResult, BackendError>;

    /// Generate a response as a stream of text chunks
    async fn stream_generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<TextStream, BackendError>;

    /// Check if the backend is alive
    ///
    /// The default asks for a tiny completion and expects some text back.
    async fn health_check(&self) -> bool {
        let options = GenerateOptions::default().with_max_tokens(5);
        match self.generate("Hello", &options).await {
            Ok(result) => !result.content.is_empty(),
            Err(e) => {
                tracing::debug!(client = %self.name(), error = %e, "Health probe failed");
                false
            }
        }
    }
}
