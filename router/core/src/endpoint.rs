//! Endpoint Descriptors and Live Statistics
//!
//! An [`Endpoint`] describes one backend instance: who it is, what it can
//! serve and what it costs. Its runtime counters live in [`EndpointStats`],
//! which only the router mutates.

use serde::{Deserialize, Serialize};

// ============================================================================
// Task Classification
// ============================================================================

/// Task tags used for capability filtering
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Conversational turns
    Chat,
    /// Plain text completion
    Completion,
    /// Condensing long input
    Summarization,
    /// Language to language
    Translation,
    /// Pulling structured data out of text
    Extraction,
    /// Question answering
    Qa,
    /// Reasoning over supplied material
    Analysis,
    /// Stories, brainstorming, ideation
    Creative,
}

impl TaskType {
    /// Every task tag, in declaration order
    pub const ALL: [TaskType; 8] = [
        Self::Chat,
        Self::Completion,
        Self::Summarization,
        Self::Translation,
        Self::Extraction,
        Self::Qa,
        Self::Analysis,
        Self::Creative,
    ];

    /// Wire name of this tag
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Completion => "completion",
            Self::Summarization => "summarization",
            Self::Translation => "translation",
            Self::Extraction => "extraction",
            Self::Qa => "qa",
            Self::Analysis => "analysis",
            Self::Creative => "creative",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Backend Kind
// ============================================================================

/// Kind of backend serving an endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// OpenAI (or compatible) hosted API
    OpenAi,
    /// Generic local model server
    LocalLlm,
    /// Ollama server
    Ollama,
    /// vLLM server
    Vllm,
}

impl BackendKind {
    /// Whether this backend runs on local hardware
    #[must_use]
    pub fn is_local(&self) -> bool {
        !matches!(self, Self::OpenAi)
    }
}

// ============================================================================
// Endpoint Descriptor
// ============================================================================

fn default_weight() -> f64 {
    1.0
}

fn default_max_tokens() -> u32 {
    4096
}

/// Immutable description of one backend instance
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Unique, stable identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Backend kind
    pub backend_kind: BackendKind,
    /// Supported task tags (empty means any task)
    #[serde(default)]
    pub supported_tasks: Vec<TaskType>,
    /// Relative weight for weighted selection
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Cost per thousand tokens
    #[serde(default)]
    pub cost_per_1k_tokens: f64,
    /// Maximum tokens this endpoint accepts
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Endpoint {
    /// Create an endpoint with default policy (weight 1, free, 4096 tokens, any task)
    pub fn new(id: impl Into<String>, name: impl Into<String>, backend_kind: BackendKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            backend_kind,
            supported_tasks: Vec::new(),
            weight: default_weight(),
            cost_per_1k_tokens: 0.0,
            max_tokens: default_max_tokens(),
        }
    }

    /// Set selection weight
    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Set cost per thousand tokens
    #[must_use]
    pub fn with_cost(mut self, cost_per_1k_tokens: f64) -> Self {
        self.cost_per_1k_tokens = cost_per_1k_tokens;
        self
    }

    /// Restrict to the given task tags
    #[must_use]
    pub fn with_tasks(mut self, tasks: impl IntoIterator<Item = TaskType>) -> Self {
        self.supported_tasks = tasks.into_iter().collect();
        self
    }

    /// Set token ceiling
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Whether this endpoint may serve `task`
    ///
    /// No task, or no declared restriction, always matches.
    #[must_use]
    pub fn supports(&self, task: Option<TaskType>) -> bool {
        match task {
            None => true,
            Some(task) => self.supported_tasks.is_empty() || self.supported_tasks.contains(&task),
        }
    }
}

// ============================================================================
// Live Statistics
// ============================================================================

/// Weight given to the previous average when folding in a new latency sample
const LATENCY_DECAY: f64 = 0.9;

/// Mutable runtime state of an endpoint
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EndpointStats {
    /// Whether the endpoint passed its last init or health probe
    pub is_available: bool,
    /// Completed requests (success or failure)
    pub total_requests: u64,
    /// Tokens reported by successful requests
    pub total_tokens: u64,
    /// Failed requests
    pub total_errors: u64,
    /// Moving average latency of successful requests
    pub avg_latency_ms: f64,
    /// Externally supplied quality signal
    pub quality_score: f64,
}

impl Default for EndpointStats {
    fn default() -> Self {
        Self {
            is_available: true,
            total_requests: 0,
            total_tokens: 0,
            total_errors: 0,
            avg_latency_ms: 0.0,
            quality_score: 1.0,
        }
    }
}

impl EndpointStats {
    /// Account for a successful request
    pub fn record_success(&mut self, tokens_used: u64, latency_ms: f64) {
        self.total_requests += 1;
        self.total_tokens += tokens_used;
        self.avg_latency_ms = LATENCY_DECAY * self.avg_latency_ms + (1.0 - LATENCY_DECAY) * latency_ms;
    }

    /// Account for a failed request
    pub fn record_failure(&mut self) {
        self.total_requests += 1;
        self.total_errors += 1;
    }

    /// Fraction of completed requests that failed
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_errors as f64 / self.total_requests as f64
        }
    }
}
