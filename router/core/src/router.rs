//! Request Router
//!
//! Registry of endpoints plus the routing state machine.
//!
//! # Routing
//!
//! ```text
//! route(request)
//!     |
//!     v
//! eligible = available && circuit closed/half-open && supports task
//!     |                       (empty -> NoAvailableEndpoints)
//!     v
//! attempt 1..=max_retries:
//!     pool   = eligible - tried  (all tried -> eligible again)
//!     select = LoadBalancer(strategy, pool)
//!     call   = timeout(generate)  -> ok: record success, return
//!                                 -> err/timeout: record failure, back off
//!     |
//!     v
//! AllEndpointsFailed { attempts, last_error }
//! ```
//!
//! # Concurrency
//!
//! Each endpoint keeps its statistics and circuit entry behind one
//! `parking_lot::Mutex`, so request completions and health probes for the
//! same endpoint are applied one at a time and never half-way. Locks are
//! never held across an `.await`. The registry is a read-mostly `RwLock`
//! whose readers clone `Arc` handles and let go immediately.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;
use uuid::Uuid;

use crate::backend::{
    create_client, BackendError, ClientArgs, GenerateOptions, GenerationClient, GenerationResult,
    TextStream,
};
use crate::balancer::{Candidate, LoadBalancer};
use crate::circuit_breaker::{CircuitBreaker, CircuitState, CircuitStatus};
use crate::config::{RouterConfig, RouterFile};
use crate::endpoint::{BackendKind, Endpoint, EndpointStats, TaskType};
use crate::error::{Result, RouterError};

// ============================================================================
// Requests
// ============================================================================

/// A routing request with generation options
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RouteRequest {
    /// Prompt text
    pub prompt: String,
    /// Task tag for capability filtering
    pub task_type: Option<TaskType>,
    /// Endpoint to try first, if eligible
    pub preferred_endpoint: Option<String>,
    /// Options passed to the client
    pub options: GenerateOptions,
}

impl RouteRequest {
    /// Request for `prompt` with no task, preference or options
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Set task tag
    #[must_use]
    pub fn with_task(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    /// Set preferred endpoint
    #[must_use]
    pub fn with_preferred(mut self, endpoint_id: impl Into<String>) -> Self {
        self.preferred_endpoint = Some(endpoint_id.into());
        self
    }

    /// Set generation options
    #[must_use]
    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }
}

// ============================================================================
// Stats Snapshot
// ============================================================================

/// Point-in-time view of one endpoint
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EndpointSnapshot {
    /// Endpoint id
    pub id: String,
    /// Display name
    pub name: String,
    /// Backend kind
    pub backend_kind: BackendKind,
    /// Runs on local hardware rather than a hosted API
    pub is_local: bool,
    /// Passed its last init or health probe
    pub is_available: bool,
    /// Completed requests
    pub total_requests: u64,
    /// Tokens from successful requests
    pub total_tokens: u64,
    /// Failed requests
    pub total_errors: u64,
    /// Fraction of completed requests that failed
    pub error_rate: f64,
    /// Moving average latency, rounded to two decimals
    pub avg_latency_ms: f64,
    /// Quality signal
    pub quality_score: f64,
    /// Whether the circuit currently blocks traffic
    pub circuit_open: bool,
    /// Derived circuit status
    pub circuit_status: CircuitStatus,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Time since the most recent failure
    pub since_last_failure_ms: Option<u64>,
}

/// Point-in-time view of the router
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RouterStats {
    /// Registered endpoints
    pub total_endpoints: usize,
    /// Endpoints eligible for an untagged request right now
    pub available_endpoints: usize,
    /// Per-endpoint detail, in registration order
    pub endpoints: Vec<EndpointSnapshot>,
}

impl RouterStats {
    /// Snapshot of one endpoint
    #[must_use]
    pub fn endpoint(&self, id: &str) -> Option<&EndpointSnapshot> {
        self.endpoints.iter().find(|e| e.id == id)
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Default)]
struct SlotState {
    stats: EndpointStats,
    circuit: CircuitState,
}

struct EndpointSlot {
    endpoint: Endpoint,
    client: Arc<dyn GenerationClient>,
    state: Mutex<SlotState>,
}

impl EndpointSlot {
    fn id(&self) -> &str {
        &self.endpoint.id
    }
}

#[derive(Default)]
struct Registry {
    slots: Vec<Arc<EndpointSlot>>,
    by_task: HashMap<TaskType, Vec<String>>,
}

impl Registry {
    /// Insert or replace in place; returns whether an entry was replaced
    fn insert(&mut self, slot: Arc<EndpointSlot>) -> bool {
        let replaced = match self.slots.iter().position(|s| s.id() == slot.id()) {
            Some(index) => {
                self.slots[index] = slot;
                true
            }
            None => {
                self.slots.push(slot);
                false
            }
        };
        self.reindex();
        replaced
    }

    fn reindex(&mut self) {
        self.by_task.clear();
        for slot in &self.slots {
            for task in &slot.endpoint.supported_tasks {
                let ids = self.by_task.entry(*task).or_default();
                if !ids.iter().any(|id| id == slot.id()) {
                    ids.push(slot.id().to_string());
                }
            }
        }
    }

    fn get(&self, id: &str) -> Option<Arc<EndpointSlot>> {
        self.slots.iter().find(|s| s.id() == id).cloned()
    }
}

// ============================================================================
// Shared State
// ============================================================================

struct HealthTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    config: RouterConfig,
    breaker: CircuitBreaker,
    balancer: LoadBalancer,
    registry: RwLock<Registry>,
    initialized: AtomicBool,
    init_lock: tokio::sync::Mutex<()>,
    health: Mutex<Option<HealthTask>>,
}

impl Inner {
    fn slots(&self) -> Vec<Arc<EndpointSlot>> {
        self.registry.read().slots.clone()
    }

    fn eligible(&self, task_type: Option<TaskType>) -> Vec<Arc<EndpointSlot>> {
        let now = Instant::now();
        self.slots()
            .into_iter()
            .filter(|slot| {
                if !slot.endpoint.supports(task_type) {
                    return false;
                }
                let state = slot.state.lock();
                state.stats.is_available && !self.breaker.is_open(&state.circuit, now)
            })
            .collect()
    }

    fn select(&self, pool: &[Arc<EndpointSlot>]) -> Option<Arc<EndpointSlot>> {
        let candidates: Vec<Candidate> = pool
            .iter()
            .map(|slot| {
                let state = slot.state.lock();
                Candidate {
                    id: slot.endpoint.id.clone(),
                    weight: slot.endpoint.weight,
                    cost_per_1k_tokens: slot.endpoint.cost_per_1k_tokens,
                    avg_latency_ms: state.stats.avg_latency_ms,
                    quality_score: state.stats.quality_score,
                }
            })
            .collect();

        let index = self.balancer.select(self.config.strategy, &candidates)?;
        tracing::debug!(
            endpoint = %candidates[index].id,
            strategy = %self.config.strategy,
            pool = candidates.len(),
            "Selected endpoint"
        );
        pool.get(index).cloned()
    }

    fn record_success(&self, slot: &EndpointSlot, tokens_used: u64, latency_ms: f64) {
        let mut state = slot.state.lock();
        state.stats.record_success(tokens_used, latency_ms);
        self.breaker.record_success(slot.id(), &mut state.circuit);
    }

    fn record_failure(&self, slot: &EndpointSlot) {
        let mut state = slot.state.lock();
        state.stats.record_failure();
        self.breaker
            .record_failure(slot.id(), &mut state.circuit, Instant::now());
    }

    fn apply_health(&self, slot: &EndpointSlot, healthy: bool) {
        let mut state = slot.state.lock();
        if state.stats.is_available != healthy {
            tracing::info!(endpoint = %slot.id(), healthy, "Endpoint availability changed");
        }
        state.stats.is_available = healthy;
        if healthy {
            self.breaker.record_success(slot.id(), &mut state.circuit);
        } else {
            self.breaker
                .record_failure(slot.id(), &mut state.circuit, Instant::now());
        }
    }

    async fn attempt(&self, slot: &EndpointSlot, request: &RouteRequest) -> Result<GenerationResult> {
        let timeout = self.config.timeout_per_attempt();
        let started = Instant::now();

        match tokio::time::timeout(timeout, slot.client.generate(&request.prompt, &request.options))
            .await
        {
            Ok(Ok(result)) => {
                let latency_ms = if result.latency_ms > 0.0 {
                    result.latency_ms
                } else {
                    started.elapsed().as_secs_f64() * 1000.0
                };
                self.record_success(slot, result.tokens_used, latency_ms);
                tracing::debug!(
                    endpoint = %slot.id(),
                    tokens = result.tokens_used,
                    latency_ms,
                    "Attempt succeeded"
                );
                Ok(result)
            }
            Ok(Err(source)) => {
                self.record_failure(slot);
                Err(RouterError::AttemptFailed {
                    endpoint_id: slot.id().to_string(),
                    source,
                })
            }
            Err(_) => {
                self.record_failure(slot);
                Err(RouterError::AttemptTimeout {
                    endpoint_id: slot.id().to_string(),
                    timeout,
                })
            }
        }
    }

    async fn run_health_checks(&self) {
        let timeout = self.config.timeout_per_attempt();
        for slot in self.slots() {
            let healthy = matches!(
                tokio::time::timeout(timeout, slot.client.health_check()).await,
                Ok(true)
            );
            tracing::debug!(endpoint = %slot.id(), healthy, "Health probe");
            self.apply_health(&slot, healthy);
        }
    }
}

async fn health_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let period = inner.config.health_check_interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tokio::select! {
                    () = inner.run_health_checks() => {}
                    _ = shutdown.changed() => break,
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    tracing::debug!("Health loop stopped");
}

// ============================================================================
// Stream Outcome
// ============================================================================

/// Feeds a stream's outcome back into its endpoint once it ends
struct StreamOutcome {
    inner: Arc<Inner>,
    slot: Arc<EndpointSlot>,
    started: Instant,
}

impl StreamOutcome {
    fn record(self, success: bool) {
        if success {
            let latency_ms = self.started.elapsed().as_secs_f64() * 1000.0;
            self.inner.record_success(&self.slot, 0, latency_ms);
        } else {
            self.inner.record_failure(&self.slot);
        }
    }
}

struct TrackedStream {
    stream: TextStream,
    outcome: Option<StreamOutcome>,
    failed: bool,
}

fn track_stream(stream: TextStream, outcome: StreamOutcome) -> TextStream {
    let state = TrackedStream {
        stream,
        outcome: Some(outcome),
        failed: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        if state.failed {
            return None;
        }

        match state.stream.next().await {
            Some(Ok(chunk)) => Some((Ok(chunk), state)),
            Some(Err(e)) => {
                state.failed = true;
                if let Some(outcome) = state.outcome.take() {
                    tracing::warn!(endpoint = %outcome.slot.id(), error = %e, "Stream failed");
                    outcome.record(false);
                }
                Some((Err(e), state))
            }
            None => {
                if let Some(outcome) = state.outcome.take() {
                    outcome.record(true);
                }
                None
            }
        }
    })
    .boxed()
}

// ============================================================================
// Router
// ============================================================================

/// Resilient multi-backend router
///
/// Dropping the router aborts its health loop; call [`Router::shutdown`] to
/// stop it gracefully.
pub struct Router {
    inner: Arc<Inner>,
}

impl Router {
    /// Create an empty router
    #[must_use]
    pub fn new(config: RouterConfig) -> Self {
        for problem in config.validate() {
            tracing::warn!(%problem, "Invalid router setting");
        }

        let breaker = CircuitBreaker::new(config.circuit_breaker.clone());
        let balancer = LoadBalancer::new(config.adaptive_weights());

        Self {
            inner: Arc::new(Inner {
                config,
                breaker,
                balancer,
                registry: RwLock::new(Registry::default()),
                initialized: AtomicBool::new(false),
                init_lock: tokio::sync::Mutex::new(()),
                health: Mutex::new(None),
            }),
        }
    }

    /// Create a router and register every endpoint in `file`
    pub fn from_file(file: RouterFile) -> std::result::Result<Self, BackendError> {
        let router = Self::new(file.router);
        for entry in file.endpoints {
            router.register_endpoint(entry.endpoint, &entry.client)?;
        }
        Ok(router)
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    /// Register an endpoint, building its client from `args`
    pub fn register_endpoint(
        &self,
        endpoint: Endpoint,
        args: &ClientArgs,
    ) -> std::result::Result<(), BackendError> {
        let client = create_client(args)?;
        self.register_endpoint_with_client(endpoint, client);
        Ok(())
    }

    /// Register an endpoint with a ready-made client
    ///
    /// Re-registering an id replaces its descriptor, client and statistics
    /// but keeps its position.
    pub fn register_endpoint_with_client(
        &self,
        endpoint: Endpoint,
        client: Arc<dyn GenerationClient>,
    ) {
        let id = endpoint.id.clone();
        let client_name = client.name().to_string();
        let slot = Arc::new(EndpointSlot {
            endpoint,
            client,
            state: Mutex::new(SlotState::default()),
        });

        if self.inner.registry.write().insert(slot) {
            tracing::warn!(endpoint = %id, "Replaced existing endpoint");
        } else {
            tracing::info!(endpoint = %id, client = %client_name, "Registered endpoint");
        }
    }

    /// Ids of endpoints declaring support for `task_type`
    #[must_use]
    pub fn endpoints_for_task(&self, task_type: TaskType) -> Vec<String> {
        self.inner
            .registry
            .read()
            .by_task
            .get(&task_type)
            .cloned()
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Initialise every client concurrently and start health checks
    ///
    /// Endpoints whose client fails to initialise are marked unavailable.
    /// Returns whether at least one endpoint is usable.
    pub async fn initialize(&self) -> bool {
        let _guard = self.inner.init_lock.lock().await;
        self.initialize_locked().await
    }

    async fn ensure_initialized(&self) {
        if self.inner.initialized.load(Ordering::Acquire) {
            return;
        }
        let _guard = self.inner.init_lock.lock().await;
        if !self.inner.initialized.load(Ordering::Acquire) {
            self.initialize_locked().await;
        }
    }

    async fn initialize_locked(&self) -> bool {
        let slots = self.inner.slots();
        let results = join_all(slots.iter().map(|slot| async move {
            let usable = match slot.client.initialize().await {
                Ok(usable) => usable,
                Err(e) => {
                    tracing::warn!(endpoint = %slot.id(), error = %e, "Client initialisation failed");
                    false
                }
            };
            slot.state.lock().stats.is_available = usable;
            usable
        }))
        .await;

        let usable = results.iter().filter(|ok| **ok).count();
        tracing::info!(usable, total = slots.len(), "Router initialized");

        if usable > 0 {
            self.inner.initialized.store(true, Ordering::Release);
            self.start_health_loop();
        }
        usable > 0
    }

    fn start_health_loop(&self) {
        let mut health = self.inner.health.lock();
        if health.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            return;
        }
        if self.inner.config.health_check_interval().is_zero() {
            tracing::warn!("health_check_interval_ms is 0, health loop disabled");
            return;
        }

        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(health_loop(Arc::clone(&self.inner), rx));
        *health = Some(HealthTask { shutdown, handle });
        tracing::debug!(
            interval_ms = self.inner.config.health_check_interval_ms,
            "Health loop started"
        );
    }

    /// Whether the background health loop is running
    #[must_use]
    pub fn health_loop_running(&self) -> bool {
        self.inner
            .health
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Stop the health loop and wait for it to exit
    pub async fn shutdown(&self) {
        let task = self.inner.health.lock().take();
        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            if let Err(e) = task.handle.await {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "Health loop ended abnormally");
                }
            }
        }
        tracing::info!("Router shutdown");
    }

    // ------------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------------

    /// Route a prompt with retries and failover
    pub async fn route(
        &self,
        prompt: &str,
        task_type: Option<TaskType>,
        preferred_endpoint: Option<&str>,
    ) -> Result<GenerationResult> {
        let mut request = RouteRequest::new(prompt);
        request.task_type = task_type;
        request.preferred_endpoint = preferred_endpoint.map(String::from);
        self.route_with_options(&request).await
    }

    /// Route a full request with retries and failover
    pub async fn route_with_options(&self, request: &RouteRequest) -> Result<GenerationResult> {
        let span = tracing::info_span!(
            "route",
            request_id = %Uuid::new_v4(),
            task = ?request.task_type
        );
        self.route_inner(request).instrument(span).await
    }

    async fn route_inner(&self, request: &RouteRequest) -> Result<GenerationResult> {
        self.ensure_initialized().await;

        let inner = &self.inner;
        let eligible = inner.eligible(request.task_type);
        if eligible.is_empty() {
            tracing::warn!("No available endpoints");
            return Err(RouterError::NoAvailableEndpoints);
        }

        let preferred = request
            .preferred_endpoint
            .as_deref()
            .and_then(|id| eligible.iter().find(|slot| slot.id() == id).cloned());

        let max_retries = inner.config.max_retries;
        let mut tried: HashSet<String> = HashSet::new();
        let mut first: Option<Arc<EndpointSlot>> = None;
        let mut last_error: Option<RouterError> = None;
        let mut attempts = 0;

        for attempt in 0..max_retries {
            let target = match (&preferred, &first) {
                (Some(slot), _) if attempt == 0 => Some(Arc::clone(slot)),
                (_, Some(slot)) if !inner.config.fallback_enabled => Some(Arc::clone(slot)),
                _ => {
                    let remaining: Vec<Arc<EndpointSlot>> = eligible
                        .iter()
                        .filter(|slot| !tried.contains(slot.id()))
                        .cloned()
                        .collect();
                    if remaining.is_empty() {
                        inner.select(&eligible)
                    } else {
                        inner.select(&remaining)
                    }
                }
            };
            let Some(slot) = target else {
                break;
            };

            tried.insert(slot.id().to_string());
            if first.is_none() {
                first = Some(Arc::clone(&slot));
            }
            attempts += 1;

            match inner.attempt(&slot, request).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    tracing::warn!(
                        endpoint = %slot.id(),
                        attempt = attempt + 1,
                        error = %e,
                        "Attempt failed"
                    );
                    last_error = Some(e);
                }
            }

            if attempt + 1 < max_retries {
                tokio::time::sleep(inner.config.retry_delay() * (attempt + 1)).await;
            }
        }

        tracing::error!(attempts, "All endpoints failed");
        Err(RouterError::AllEndpointsFailed {
            attempts,
            last_error: last_error.map(Box::new),
        })
    }

    /// Route a prompt to one endpoint and stream its output
    ///
    /// No retry: a failure opening the stream or mid-stream goes straight to
    /// the caller. The outcome still counts toward the endpoint's statistics
    /// and circuit once the stream ends.
    pub async fn stream_route(
        &self,
        prompt: &str,
        task_type: Option<TaskType>,
        preferred_endpoint: Option<&str>,
    ) -> Result<TextStream> {
        let mut request = RouteRequest::new(prompt);
        request.task_type = task_type;
        request.preferred_endpoint = preferred_endpoint.map(String::from);
        self.stream_route_with_options(&request).await
    }

    /// Streaming variant of [`Router::route_with_options`]
    pub async fn stream_route_with_options(&self, request: &RouteRequest) -> Result<TextStream> {
        let span = tracing::info_span!(
            "stream_route",
            request_id = %Uuid::new_v4(),
            task = ?request.task_type
        );
        self.stream_route_inner(request).instrument(span).await
    }

    async fn stream_route_inner(&self, request: &RouteRequest) -> Result<TextStream> {
        self.ensure_initialized().await;

        let inner = &self.inner;
        let eligible = inner.eligible(request.task_type);
        if eligible.is_empty() {
            tracing::warn!("No available endpoints");
            return Err(RouterError::NoAvailableEndpoints);
        }

        let preferred = request
            .preferred_endpoint
            .as_deref()
            .and_then(|id| eligible.iter().find(|slot| slot.id() == id).cloned());
        let slot = match preferred {
            Some(slot) => slot,
            None => inner
                .select(&eligible)
                .ok_or(RouterError::NoAvailableEndpoints)?,
        };

        let timeout = inner.config.timeout_per_attempt();
        let started = Instant::now();
        let opened = tokio::time::timeout(
            timeout,
            slot.client.stream_generate(&request.prompt, &request.options),
        )
        .await;

        match opened {
            Ok(Ok(stream)) => {
                tracing::debug!(endpoint = %slot.id(), "Stream opened");
                let outcome = StreamOutcome {
                    inner: Arc::clone(inner),
                    slot,
                    started,
                };
                Ok(track_stream(stream, outcome))
            }
            Ok(Err(source)) => {
                inner.record_failure(&slot);
                tracing::warn!(endpoint = %slot.id(), error = %source, "Stream open failed");
                Err(RouterError::AttemptFailed {
                    endpoint_id: slot.id().to_string(),
                    source,
                })
            }
            Err(_) => {
                inner.record_failure(&slot);
                tracing::warn!(endpoint = %slot.id(), "Stream open timed out");
                Err(RouterError::AttemptTimeout {
                    endpoint_id: slot.id().to_string(),
                    timeout,
                })
            }
        }
    }

    // ------------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------------

    /// Snapshot of router and endpoint statistics
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        let now = Instant::now();
        let endpoints: Vec<EndpointSnapshot> = self
            .inner
            .slots()
            .iter()
            .map(|slot| self.snapshot(slot, now))
            .collect();

        RouterStats {
            total_endpoints: endpoints.len(),
            available_endpoints: self.inner.eligible(None).len(),
            endpoints,
        }
    }

    /// Snapshot of one endpoint
    pub fn endpoint_stats(&self, id: &str) -> Result<EndpointSnapshot> {
        let slot = self
            .inner
            .registry
            .read()
            .get(id)
            .ok_or_else(|| RouterError::UnknownEndpoint(id.to_string()))?;
        Ok(self.snapshot(&slot, Instant::now()))
    }

    fn snapshot(&self, slot: &EndpointSlot, now: Instant) -> EndpointSnapshot {
        let state = slot.state.lock();
        let status = self.inner.breaker.status(&state.circuit, now);

        EndpointSnapshot {
            id: slot.endpoint.id.clone(),
            name: slot.endpoint.name.clone(),
            backend_kind: slot.endpoint.backend_kind,
            is_local: slot.endpoint.backend_kind.is_local(),
            is_available: state.stats.is_available,
            total_requests: state.stats.total_requests,
            total_tokens: state.stats.total_tokens,
            total_errors: state.stats.total_errors,
            error_rate: state.stats.error_rate(),
            avg_latency_ms: (state.stats.avg_latency_ms * 100.0).round() / 100.0,
            quality_score: state.stats.quality_score,
            circuit_open: status == CircuitStatus::Open,
            circuit_status: status,
            consecutive_failures: state.circuit.consecutive_failures(),
            since_last_failure_ms: state.circuit.last_failure().map(|at| {
                u64::try_from(now.saturating_duration_since(at).as_millis()).unwrap_or(u64::MAX)
            }),
        }
    }

    /// Feed an external quality signal into adaptive scoring
    pub fn set_quality_score(&self, id: &str, score: f64) -> Result<()> {
        let slot = self
            .inner
            .registry
            .read()
            .get(id)
            .ok_or_else(|| RouterError::UnknownEndpoint(id.to_string()))?;

        slot.state.lock().stats.quality_score = if score.is_finite() { score.max(0.0) } else { 0.0 };
        Ok(())
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        if let Some(task) = self.inner.health.lock().take() {
            task.handle.abort();
        }
    }
}
