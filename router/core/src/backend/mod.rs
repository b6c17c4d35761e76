//! Generation Backends
//!
//! The [`GenerationClient`] abstraction plus the concrete clients the
//! router can build from configuration.

mod lines;
pub mod ollama;
pub mod openai;
pub mod traits;

#[cfg(test)]
mod test_server;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use ollama::{OllamaClient, DEFAULT_OLLAMA_URL};
pub use openai::{OpenAiClient, DEFAULT_OPENAI_URL};
pub use traits::{BackendError, GenerateOptions, GenerationClient, GenerationResult, TextStream};

// ============================================================================
// Client Arguments
// ============================================================================

fn default_ollama_url() -> String {
    DEFAULT_OLLAMA_URL.to_string()
}

fn default_openai_url() -> String {
    DEFAULT_OPENAI_URL.to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

/// Connection arguments for building a client
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientArgs {
    /// Ollama server
    Ollama {
        /// Server address
        #[serde(default = "default_ollama_url")]
        base_url: String,
        /// Model name
        model: String,
    },
    /// OpenAI-compatible API
    OpenAi {
        /// API address
        #[serde(default = "default_openai_url")]
        base_url: String,
        /// Environment variable holding the API key
        #[serde(default = "default_api_key_env")]
        api_key_env: String,
        /// Model name
        model: String,
    },
}

impl ClientArgs {
    /// Ollama at the default address
    pub fn ollama(model: impl Into<String>) -> Self {
        Self::Ollama {
            base_url: default_ollama_url(),
            model: model.into(),
        }
    }

    /// OpenAI with the key read from `OPENAI_API_KEY`
    pub fn openai(model: impl Into<String>) -> Self {
        Self::OpenAi {
            base_url: default_openai_url(),
            api_key_env: default_api_key_env(),
            model: model.into(),
        }
    }

    /// Model name these arguments target
    #[must_use]
    pub fn model(&self) -> &str {
        match self {
            Self::Ollama { model, .. } | Self::OpenAi { model, .. } => model,
        }
    }
}

// ============================================================================
// Client Factory
// ============================================================================

/// Build a generation client from connection arguments
///
/// A missing API key is not an error here; the client reports it when
/// initialised so the endpoint just stays unavailable.
pub fn create_client(args: &ClientArgs) -> Result<Arc<dyn GenerationClient>, BackendError> {
    match args {
        ClientArgs::Ollama { base_url, model } => {
            Ok(Arc::new(OllamaClient::new(base_url.clone(), model.clone())?))
        }
        ClientArgs::OpenAi {
            base_url,
            api_key_env,
            model,
        } => {
            let api_key = std::env::var(api_key_env).unwrap_or_default();
            if api_key.is_empty() {
                tracing::warn!(env = %api_key_env, "API key environment variable is not set");
            }
            Ok(Arc::new(OpenAiClient::new(
                base_url.clone(),
                api_key,
                model.clone(),
            )?))
        }
    }
}
