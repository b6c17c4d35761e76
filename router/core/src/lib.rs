//! Router Core - Resilient Multi-Backend Request Routing
//!
//! This crate sits in front of several interchangeable inference backends
//! (hosted APIs, local model servers) and decides, for every generation
//! request, which backend instance serves it. Individual backend failures
//! are absorbed by retries, failover and per-endpoint circuit breakers.
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |      Router      |  <-- Entry point: route / stream_route
//! +--------+---------+
//!          |
//!          v
//! +------------------+
//! |  CircuitBreaker  |  <-- Filters out failing endpoints
//! +--------+---------+
//!          |
//!          v
//! +------------------+
//! |   LoadBalancer   |  <-- Picks one endpoint per strategy
//! +--------+---------+
//!          |
//!    +-----+-----+
//!    |     |     |
//!    v     v     v
//! +------+ +------+ +-----+
//! |Ollama| |OpenAI| | ... |  <-- GenerationClient implementations
//! +------+ +------+ +-----+
//! ```
//!
//! The outcome of every call flows back into the endpoint's statistics and
//! circuit state. A background task probes endpoint health on a fixed
//! interval.
//!
//! # Quick Start
//!
//! ```ignore
//! use router_core::{ClientArgs, Endpoint, BackendKind, Router, RouterConfig, TaskType};
//!
//! #[tokio::main]
//! async fn main() {
//!     let router = Router::new(RouterConfig::default());
//!     router
//!         .register_endpoint(
//!             Endpoint::new("ollama-qwen", "Qwen", BackendKind::Ollama),
//!             &ClientArgs::ollama("qwen2:7b"),
//!         )
//!         .unwrap();
//!
//!     let result = router.route("Hello", Some(TaskType::Chat), None).await.unwrap();
//!     println!("{}", result.content);
//!
//!     router.shutdown().await;
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`endpoint`]: Endpoint descriptors, task tags and live statistics
//! - [`circuit_breaker`]: Per-endpoint failure tracking
//! - [`balancer`]: Selection strategies
//! - [`router`]: Registry, health loop and routing state machine
//! - [`backend`]: Generation client trait and concrete clients
//! - [`config`]: Configuration types and TOML loading
//! - [`error`]: Routing errors
//! - [`telemetry`]: Logging setup

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod balancer;
pub mod circuit_breaker;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod router;
pub mod telemetry;

// Re-exports for convenience
pub use backend::{
    create_client, BackendError, ClientArgs, GenerateOptions, GenerationClient, GenerationResult,
    OllamaClient, OpenAiClient, TextStream,
};
pub use balancer::{AdaptiveWeights, Candidate, LoadBalancer, RoutingStrategy};
pub use circuit_breaker::{CircuitBreaker, CircuitState, CircuitStatus};
pub use config::{
    default_config_path, load_config, load_config_from_path, load_config_from_str,
    CircuitBreakerConfig, ConfigError, EndpointEntry, RouterConfig, RouterFile,
};
pub use endpoint::{BackendKind, Endpoint, EndpointStats, TaskType};
pub use error::RouterError;
pub use router::{EndpointSnapshot, RouteRequest, Router, RouterStats};
pub use telemetry::init_tracing;
