//! Router Configuration
//!
//! Configuration types for the router, the circuit breaker and the endpoint
//! list, plus TOML loading.
//!
//! Durations are stored as `_ms` integers so files stay readable, with
//! [`Duration`] accessors for code. A loaded file is always validated;
//! validation collects every violation instead of stopping at the first.
//!
//! ```toml
//! [router]
//! strategy = "round_robin"
//! max_retries = 2
//!
//! [router.circuit_breaker]
//! failure_threshold = 3
//!
//! [[endpoints]]
//! id = "ollama-qwen"
//! name = "Qwen (local)"
//! backend_kind = "ollama"
//! weight = 1.5
//!
//! [endpoints.client]
//! type = "ollama"
//! model = "qwen2.5:7b"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::ClientArgs;
use crate::balancer::{AdaptiveWeights, RoutingStrategy};
use crate::endpoint::Endpoint;

/// Environment variable pointing at a config file
pub const CONFIG_PATH_ENV: &str = "ROUTER_CONFIG";

// ============================================================================
// Errors
// ============================================================================

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// The TOML is malformed
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// Semantic constraints violated
    #[error("invalid config: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Circuit Breaker Configuration
// ============================================================================

/// Circuit breaker thresholds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Cooldown before a probe is allowed (ms)
    pub recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
        }
    }
}

impl CircuitBreakerConfig {
    /// Cooldown as a Duration
    #[must_use]
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

// ============================================================================
// Router Configuration
// ============================================================================

/// Router behaviour, fixed after construction
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Selection strategy
    pub strategy: RoutingStrategy,
    /// Attempts per `route` call
    pub max_retries: u32,
    /// Base delay between attempts, scaled by attempt number (ms)
    pub retry_delay_ms: u64,
    /// Hard limit on a single attempt (ms)
    pub timeout_per_attempt_ms: u64,
    /// Whether retries may move to other endpoints
    pub fallback_enabled: bool,
    /// Health probe period (ms)
    pub health_check_interval_ms: u64,
    /// Adaptive latency coefficient
    pub latency_weight: f64,
    /// Adaptive cost coefficient
    pub cost_weight: f64,
    /// Adaptive quality coefficient
    pub quality_weight: f64,
    /// Circuit breaker thresholds
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        let weights = AdaptiveWeights::default();
        Self {
            strategy: RoutingStrategy::Adaptive,
            max_retries: 3,
            retry_delay_ms: 1_000,
            timeout_per_attempt_ms: 60_000,
            fallback_enabled: true,
            health_check_interval_ms: 60_000,
            latency_weight: weights.latency,
            cost_weight: weights.cost,
            quality_weight: weights.quality,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl RouterConfig {
    /// Base retry delay
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Per-attempt timeout
    #[must_use]
    pub fn timeout_per_attempt(&self) -> Duration {
        Duration::from_millis(self.timeout_per_attempt_ms)
    }

    /// Health probe period
    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Adaptive scoring coefficients
    #[must_use]
    pub fn adaptive_weights(&self) -> AdaptiveWeights {
        AdaptiveWeights {
            latency: self.latency_weight,
            cost: self.cost_weight,
            quality: self.quality_weight,
        }
    }

    /// Check semantic constraints, returning every violation
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_retries == 0 {
            errors.push("router.max_retries must be at least 1".to_string());
        }
        if self.timeout_per_attempt_ms == 0 {
            errors.push("router.timeout_per_attempt_ms must be greater than 0".to_string());
        }
        if self.health_check_interval_ms == 0 {
            errors.push("router.health_check_interval_ms must be greater than 0".to_string());
        }
        for (name, value) in [
            ("latency_weight", self.latency_weight),
            ("cost_weight", self.cost_weight),
            ("quality_weight", self.quality_weight),
        ] {
            if !value.is_finite() || value < 0.0 {
                errors.push(format!("router.{name} must be a non-negative number"));
            }
        }
        if self.circuit_breaker.failure_threshold == 0 {
            errors.push("router.circuit_breaker.failure_threshold must be at least 1".to_string());
        }

        errors
    }

    /// Apply `ROUTER_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup; unparsable values are ignored
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("ROUTER_STRATEGY") {
            match value.parse() {
                Ok(strategy) => self.strategy = strategy,
                Err(e) => tracing::warn!(error = %e, "Ignoring ROUTER_STRATEGY"),
            }
        }
        override_number(&lookup, "ROUTER_MAX_RETRIES", &mut self.max_retries);
        override_number(&lookup, "ROUTER_TIMEOUT_MS", &mut self.timeout_per_attempt_ms);
        override_number(
            &lookup,
            "ROUTER_HEALTH_INTERVAL_MS",
            &mut self.health_check_interval_ms,
        );
    }
}

fn override_number<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(value) = lookup(key) {
        match value.trim().parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(key, value = %value, "Ignoring unparsable override"),
        }
    }
}

// ============================================================================
// File Configuration
// ============================================================================

/// One configured endpoint with its connection arguments
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EndpointEntry {
    /// Endpoint descriptor
    #[serde(flatten)]
    pub endpoint: Endpoint,
    /// How to reach it
    pub client: ClientArgs,
}

/// Full router configuration file
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterFile {
    /// Router behaviour
    pub router: RouterConfig,
    /// Endpoints to register, in order
    pub endpoints: Vec<EndpointEntry>,
}

impl RouterFile {
    /// Check router and endpoint constraints, returning every violation
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = self.router.validate();
        let mut seen = HashSet::new();

        for entry in &self.endpoints {
            let endpoint = &entry.endpoint;
            if endpoint.id.trim().is_empty() {
                errors.push("endpoint id must not be empty".to_string());
            } else if !seen.insert(endpoint.id.as_str()) {
                errors.push(format!("duplicate endpoint id '{}'", endpoint.id));
            }
            if !endpoint.weight.is_finite() || endpoint.weight < 0.0 {
                errors.push(format!("endpoint '{}': weight must be non-negative", endpoint.id));
            }
            if !endpoint.cost_per_1k_tokens.is_finite() || endpoint.cost_per_1k_tokens < 0.0 {
                errors.push(format!(
                    "endpoint '{}': cost_per_1k_tokens must be non-negative",
                    endpoint.id
                ));
            }
            if entry.client.model().trim().is_empty() {
                errors.push(format!("endpoint '{}': client model must not be empty", endpoint.id));
            }
        }

        errors
    }

    /// Stock setup: GPT-4, GPT-3.5 and a local Qwen2 on Ollama
    #[must_use]
    pub fn with_default_endpoints() -> Self {
        use crate::endpoint::{BackendKind, TaskType};

        let endpoints = vec![
            EndpointEntry {
                endpoint: Endpoint::new("openai-gpt4", "GPT-4", BackendKind::OpenAi)
                    .with_cost(0.03)
                    .with_max_tokens(8192)
                    .with_tasks([
                        TaskType::Chat,
                        TaskType::Qa,
                        TaskType::Analysis,
                        TaskType::Creative,
                        TaskType::Summarization,
                    ]),
                client: ClientArgs::openai("gpt-4"),
            },
            EndpointEntry {
                endpoint: Endpoint::new("openai-gpt35", "GPT-3.5-Turbo", BackendKind::OpenAi)
                    .with_cost(0.002)
                    .with_weight(2.0)
                    .with_tasks([
                        TaskType::Chat,
                        TaskType::Qa,
                        TaskType::Completion,
                        TaskType::Translation,
                        TaskType::Extraction,
                    ]),
                client: ClientArgs::openai("gpt-3.5-turbo"),
            },
            EndpointEntry {
                endpoint: Endpoint::new("ollama-qwen", "Qwen2-7B (Local)", BackendKind::Ollama)
                    .with_weight(1.5)
                    .with_tasks([
                        TaskType::Chat,
                        TaskType::Qa,
                        TaskType::Completion,
                        TaskType::Summarization,
                    ]),
                client: ClientArgs::ollama("qwen2:7b"),
            },
        ];

        Self {
            router: RouterConfig::default(),
            endpoints,
        }
    }
}

/// Parse and validate a config from TOML text
pub fn load_config_from_str(content: &str) -> Result<RouterFile, ConfigError> {
    let file: RouterFile = toml::from_str(content)?;

    let errors = file.validate();
    if !errors.is_empty() {
        return Err(ConfigError::Validation(errors));
    }

    Ok(file)
}

/// Read, parse and validate a config file
pub fn load_config_from_path(path: &Path) -> Result<RouterFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    load_config_from_str(&content)
}

/// Default config location (`$XDG_CONFIG_HOME/router/router.toml`)
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("router").join("router.toml"))
}

/// Load from `ROUTER_CONFIG` or the default location, then apply env overrides
///
/// A missing file at the default location yields the default config.
pub fn load_config() -> Result<RouterFile, ConfigError> {
    let mut file = match std::env::var_os(CONFIG_PATH_ENV) {
        Some(path) => load_config_from_path(Path::new(&path))?,
        None => match default_config_path() {
            Some(path) if path.exists() => load_config_from_path(&path)?,
            _ => RouterFile::default(),
        },
    };

    file.router.apply_env_overrides();
    let errors = file.router.validate();
    if !errors.is_empty() {
        return Err(ConfigError::Validation(errors));
    }

    Ok(file)
}
