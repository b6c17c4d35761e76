//! Router integration tests
//!
//! Exercises routing, failover, circuit breaking and streaming end to end
//! against scripted mock clients. Timing-sensitive tests run on a paused
//! clock so timeouts and back-off resolve instantly and deterministically.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use pretty_assertions::assert_eq;

use router_core::{
    BackendError, BackendKind, Endpoint, GenerateOptions, GenerationClient, GenerationResult,
    RouteRequest, Router, RouterConfig, RouterError, RoutingStrategy, TaskType, TextStream,
};

// ============================================================================
// Mock Client
// ============================================================================

#[derive(Clone, Debug)]
enum Behavior {
    /// Answer after a delay
    Succeed { delay_ms: u64 },
    /// Fail immediately
    Fail,
    /// Never answer
    Hang,
    /// Stream these chunks, then fail if `then_fail`
    Stream { chunks: Vec<&'static str>, then_fail: bool },
}

struct MockClient {
    id: &'static str,
    init_ok: bool,
    behavior: Mutex<Behavior>,
    calls: AtomicUsize,
    stream_calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockClient {
    fn new(id: &'static str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            id,
            init_ok: true,
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn failing_init(id: &'static str) -> Arc<Self> {
        Arc::new(Self {
            id,
            init_ok: false,
            behavior: Mutex::new(Behavior::Succeed { delay_ms: 0 }),
            calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationClient for MockClient {
    fn name(&self) -> &str {
        self.id
    }

    async fn initialize(&self) -> Result<bool, BackendError> {
        Ok(self.init_ok)
    }

    async fn generate(
        &self,
        prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<GenerationResult, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let behavior = self.behavior.lock().unwrap().clone();

        match behavior {
            Behavior::Succeed { delay_ms } => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                let mut result = GenerationResult::new(format!("{} says hi", self.id), self.id);
                result.tokens_used = 7;
                result.latency_ms = delay_ms as f64;
                Ok(result)
            }
            Behavior::Fail | Behavior::Stream { .. } => {
                Err(BackendError::Connection(format!("{} is down", self.id)))
            }
            Behavior::Hang => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn stream_generate(
        &self,
        _prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<TextStream, BackendError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior.lock().unwrap().clone();

        match behavior {
            Behavior::Stream { chunks, then_fail } => {
                let mut items: Vec<Result<String, BackendError>> =
                    chunks.into_iter().map(|c| Ok(c.to_string())).collect();
                if then_fail {
                    items.push(Err(BackendError::Stream("connection reset".to_string())));
                    items.push(Ok("never delivered".to_string()));
                }
                Ok(futures::stream::iter(items).boxed())
            }
            Behavior::Hang => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
            _ => Err(BackendError::Connection(format!("{} is down", self.id))),
        }
    }

    async fn health_check(&self) -> bool {
        true
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn config(strategy: RoutingStrategy) -> RouterConfig {
    RouterConfig {
        strategy,
        retry_delay_ms: 10,
        timeout_per_attempt_ms: 50,
        health_check_interval_ms: 3_600_000,
        ..RouterConfig::default()
    }
}

fn router_with(config: RouterConfig, clients: &[Arc<MockClient>]) -> Router {
    let router = Router::new(config);
    for client in clients {
        router.register_endpoint_with_client(
            Endpoint::new(client.id, client.id.to_uppercase(), BackendKind::LocalLlm),
            client.clone(),
        );
    }
    router
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_reports_every_attempt() {
    let clients = [
        MockClient::new("a", Behavior::Fail),
        MockClient::new("b", Behavior::Fail),
        MockClient::new("c", Behavior::Fail),
    ];
    let router = router_with(config(RoutingStrategy::RoundRobin), &clients);

    let err = router.route("hello", None, None).await.unwrap_err();

    match &err {
        RouterError::AllEndpointsFailed {
            attempts,
            last_error,
        } => {
            assert_eq!(*attempts, 3);
            assert!(matches!(
                last_error.as_deref(),
                Some(RouterError::AttemptFailed { .. })
            ));
        }
        other => panic!("expected AllEndpointsFailed, got {other:?}"),
    }

    let stats = router.stats();
    for client in &clients {
        assert_eq!(client.calls(), 1, "endpoint {}", client.id);
        let snapshot = stats.endpoint(client.id).unwrap();
        assert_eq!(snapshot.total_errors, 1);
        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(snapshot.consecutive_failures, 1);
    }

    router.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_backoff_grows_with_attempt_number() {
    let client = MockClient::new("solo", Behavior::Fail);
    let router = router_with(
        RouterConfig {
            retry_delay_ms: 100,
            ..config(RoutingStrategy::RoundRobin)
        },
        &[client.clone()],
    );
    assert!(router.initialize().await);

    let started = tokio::time::Instant::now();
    let err = router.route("x", None, None).await.unwrap_err();

    // 100ms after the first attempt, 200ms after the second, none after the last
    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(300) && elapsed < Duration::from_millis(310),
        "elapsed {elapsed:?}"
    );
    assert!(matches!(err, RouterError::AllEndpointsFailed { attempts: 3, .. }));
    // The tried set resets once every endpoint has been attempted
    assert_eq!(client.calls(), 3);

    router.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_preferred_endpoint_gets_first_attempt() {
    let clients = [
        MockClient::new("a", Behavior::Succeed { delay_ms: 5 }),
        MockClient::new("b", Behavior::Succeed { delay_ms: 5 }),
        MockClient::new("c", Behavior::Succeed { delay_ms: 5 }),
    ];
    let router = router_with(config(RoutingStrategy::RoundRobin), &clients);

    let result = router.route("hi", None, Some("c")).await.unwrap();
    assert_eq!(result.content, "c says hi");
    assert_eq!(clients[0].calls(), 0);
    assert_eq!(clients[2].calls(), 1);

    // An unknown preference is ignored
    let result = router.route("hi", None, Some("nope")).await.unwrap();
    assert_eq!(result.content, "a says hi");

    router.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_preference_is_not_retried_while_others_remain() {
    let clients = [
        MockClient::new("a", Behavior::Succeed { delay_ms: 5 }),
        MockClient::new("b", Behavior::Succeed { delay_ms: 5 }),
        MockClient::new("c", Behavior::Fail),
    ];
    let router = router_with(config(RoutingStrategy::RoundRobin), &clients);

    let result = router.route("hi", None, Some("c")).await.unwrap();
    assert_eq!(result.content, "a says hi");
    assert_eq!(clients[2].calls(), 1);
    assert_eq!(router.stats().endpoint("c").unwrap().total_errors, 1);

    router.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_no_available_endpoints_short_circuits() {
    let down = MockClient::failing_init("down");
    let router = router_with(config(RoutingStrategy::Adaptive), &[down.clone()]);

    let err = router.route("hi", None, None).await.unwrap_err();
    assert!(matches!(err, RouterError::NoAvailableEndpoints));
    assert_eq!(down.calls(), 0);
    assert_eq!(router.stats().endpoint("down").unwrap().total_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_short_circuits_without_calls() {
    let client = MockClient::new("flaky", Behavior::Fail);
    let mut config = config(RoutingStrategy::RoundRobin);
    config.max_retries = 2;
    config.circuit_breaker.failure_threshold = 2;
    let router = router_with(config, &[client.clone()]);

    let err = router.route("hi", None, None).await.unwrap_err();
    assert!(matches!(err, RouterError::AllEndpointsFailed { attempts: 2, .. }));
    assert!(router.stats().endpoint("flaky").unwrap().circuit_open);

    let err = router.route("hi", None, None).await.unwrap_err();
    assert!(matches!(err, RouterError::NoAvailableEndpoints));
    assert_eq!(client.calls(), 2);
    assert_eq!(router.stats().available_endpoints, 0);

    router.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_circuit_half_opens_and_recovers() {
    let client = MockClient::new("flaky", Behavior::Fail);
    let mut config = config(RoutingStrategy::RoundRobin);
    config.max_retries = 2;
    config.circuit_breaker.failure_threshold = 2;
    config.circuit_breaker.recovery_timeout_ms = 1_000;
    let router = router_with(config, &[client.clone()]);

    tokio_test::assert_err!(router.route("hi", None, None).await);
    tokio_test::assert_err!(router.route("hi", None, None).await);

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    let snapshot = router.endpoint_stats("flaky").unwrap();
    assert!(!snapshot.circuit_open);
    assert_eq!(snapshot.circuit_status, router_core::CircuitStatus::HalfOpen);

    client.set_behavior(Behavior::Succeed { delay_ms: 1 });
    let result = tokio_test::assert_ok!(router.route("hi", None, None).await);
    assert_eq!(result.content, "flaky says hi");

    let snapshot = router.endpoint_stats("flaky").unwrap();
    assert_eq!(snapshot.circuit_status, router_core::CircuitStatus::Closed);
    assert_eq!(snapshot.consecutive_failures, 0);

    router.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fails_over_to_healthy_endpoint() {
    let a = MockClient::new("a", Behavior::Succeed { delay_ms: 10 });
    let b = MockClient::new("b", Behavior::Hang);
    let mut config = config(RoutingStrategy::RoundRobin);
    config.max_retries = 2;
    let router = router_with(config, &[a.clone(), b.clone()]);

    // Rotation over {a, b}: first a, then b which times out and fails over to a
    let first = router.route("one", None, None).await.unwrap();
    assert_eq!(first.content, "a says hi");

    let started = tokio::time::Instant::now();
    let second = router.route("two", None, None).await.unwrap();
    assert_eq!(second.content, "a says hi");
    // 50ms timeout on b, 10ms back-off, 10ms on a
    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(70) && elapsed < Duration::from_millis(80),
        "elapsed {elapsed:?}"
    );

    let stats = router.stats();
    let a_stats = stats.endpoint("a").unwrap();
    assert_eq!(a_stats.total_requests, 2);
    assert_eq!(a_stats.total_tokens, 14);
    assert_eq!(a_stats.total_errors, 0);
    assert_eq!(a_stats.avg_latency_ms, 1.9);

    let b_stats = stats.endpoint("b").unwrap();
    assert_eq!(b_stats.total_requests, 1);
    assert_eq!(b_stats.total_errors, 1);
    assert_eq!(b_stats.avg_latency_ms, 0.0);
    assert_eq!(b_stats.consecutive_failures, 1);
    assert_eq!(b_stats.error_rate, 1.0);
    assert!(b_stats.since_last_failure_ms.is_some());
    assert!(a_stats.since_last_failure_ms.is_none());
    assert_eq!(a_stats.consecutive_failures, 0);
    assert_eq!(b.calls(), 1);

    router.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_fallback_disabled_stays_on_first_endpoint() {
    let a = MockClient::new("a", Behavior::Fail);
    let b = MockClient::new("b", Behavior::Succeed { delay_ms: 1 });
    let config = RouterConfig {
        fallback_enabled: false,
        ..config(RoutingStrategy::RoundRobin)
    };
    let router = router_with(config, &[a.clone(), b.clone()]);

    let err = router.route("hi", None, None).await.unwrap_err();
    assert!(matches!(err, RouterError::AllEndpointsFailed { attempts: 3, .. }));
    assert_eq!(a.calls(), 3);
    assert_eq!(b.calls(), 0);

    router.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cost_based_routes_to_cheapest_capable_endpoint() {
    let router = Router::new(config(RoutingStrategy::CostBased));
    let gpt4 = MockClient::new("gpt4", Behavior::Succeed { delay_ms: 1 });
    let gpt35 = MockClient::new("gpt35", Behavior::Succeed { delay_ms: 1 });
    let local = MockClient::new("local", Behavior::Succeed { delay_ms: 1 });

    router.register_endpoint_with_client(
        Endpoint::new("gpt4", "GPT-4", BackendKind::OpenAi)
            .with_cost(0.03)
            .with_tasks([TaskType::Chat, TaskType::Creative]),
        gpt4.clone(),
    );
    router.register_endpoint_with_client(
        Endpoint::new("gpt35", "GPT-3.5", BackendKind::OpenAi)
            .with_cost(0.002)
            .with_tasks([TaskType::Chat, TaskType::Translation]),
        gpt35.clone(),
    );
    router.register_endpoint_with_client(
        Endpoint::new("local", "Local", BackendKind::Ollama).with_tasks([TaskType::Chat]),
        local.clone(),
    );

    let chat = router.route("hi", Some(TaskType::Chat), None).await.unwrap();
    assert_eq!(chat.content, "local says hi");

    let creative = router
        .route("a poem", Some(TaskType::Creative), None)
        .await
        .unwrap();
    assert_eq!(creative.content, "gpt4 says hi");

    let translation = router
        .route_with_options(
            &RouteRequest::new("bonjour")
                .with_task(TaskType::Translation)
                .with_options(GenerateOptions::default().with_max_tokens(32)),
        )
        .await
        .unwrap();
    assert_eq!(translation.content, "gpt35 says hi");
    assert_eq!(*gpt35.prompts.lock().unwrap(), vec!["bonjour".to_string()]);

    router.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_routes_keep_counts_consistent() {
    let clients = [
        MockClient::new("a", Behavior::Succeed { delay_ms: 1 }),
        MockClient::new("b", Behavior::Succeed { delay_ms: 1 }),
        MockClient::new("c", Behavior::Succeed { delay_ms: 1 }),
    ];
    let router = Arc::new(router_with(config(RoutingStrategy::Weighted), &clients));
    assert!(router.initialize().await);

    let handles: Vec<_> = (0..30)
        .map(|i| {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.route(&format!("req {i}"), None, None).await })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    let stats = router.stats();
    let total: u64 = stats.endpoints.iter().map(|e| e.total_requests).sum();
    let tokens: u64 = stats.endpoints.iter().map(|e| e.total_tokens).sum();
    assert_eq!(total, 30);
    assert_eq!(tokens, 30 * 7);

    router.shutdown().await;
}

// ============================================================================
// Streaming
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stream_route_forwards_chunks_and_records_success() {
    let client = MockClient::new(
        "s",
        Behavior::Stream {
            chunks: vec!["Hel", "lo", "!"],
            then_fail: false,
        },
    );
    let router = router_with(config(RoutingStrategy::RoundRobin), &[client.clone()]);

    let stream = router
        .stream_route("hi", Some(TaskType::Chat), None)
        .await
        .unwrap();
    let chunks: Vec<String> = stream.map(|c| c.unwrap()).collect().await;
    assert_eq!(chunks.concat(), "Hello!");

    let snapshot = router.endpoint_stats("s").unwrap();
    assert_eq!(snapshot.total_requests, 1);
    assert_eq!(snapshot.total_errors, 0);

    router.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stream_route_propagates_mid_stream_failure() {
    let client = MockClient::new(
        "s",
        Behavior::Stream {
            chunks: vec!["partial"],
            then_fail: true,
        },
    );
    let router = router_with(config(RoutingStrategy::RoundRobin), &[client.clone()]);

    let items: Vec<Result<String, BackendError>> = router
        .stream_route("hi", None, None)
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0], Ok("partial".to_string()));
    assert!(matches!(items[1], Err(BackendError::Stream(_))));

    let snapshot = router.endpoint_stats("s").unwrap();
    assert_eq!(snapshot.total_errors, 1);
    assert_eq!(snapshot.consecutive_failures, 1);

    router.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stream_route_does_not_retry() {
    let a = MockClient::new("a", Behavior::Fail);
    let b = MockClient::new(
        "b",
        Behavior::Stream {
            chunks: vec!["ok"],
            then_fail: false,
        },
    );
    let router = router_with(config(RoutingStrategy::RoundRobin), &[a.clone(), b.clone()]);

    let err = match router.stream_route("hi", None, None).await {
        Ok(_) => panic!("expected the stream to fail to open"),
        Err(e) => e,
    };
    assert!(matches!(err, RouterError::AttemptFailed { ref endpoint_id, .. } if endpoint_id == "a"));
    assert_eq!(a.stream_calls(), 1);
    assert_eq!(b.stream_calls(), 0);

    // Preference applies to streams too
    let stream = router.stream_route("hi", None, Some("b")).await.unwrap();
    let chunks: Vec<String> = stream.map(|c| c.unwrap()).collect().await;
    assert_eq!(chunks, vec!["ok".to_string()]);

    router.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stream_open_timeout() {
    let client = MockClient::new("slow", Behavior::Hang);
    let router = router_with(config(RoutingStrategy::RoundRobin), &[client.clone()]);

    let err = match router.stream_route("hi", None, None).await {
        Ok(_) => panic!("expected a timeout"),
        Err(e) => e,
    };
    assert!(matches!(err, RouterError::AttemptTimeout { .. }));
    assert_eq!(router.endpoint_stats("slow").unwrap().total_errors, 1);

    router.shutdown().await;
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test]
async fn test_router_from_config_file() {
    let file = router_core::load_config_from_str(
        r#"
[router]
strategy = "cost_based"

[[endpoints]]
id = "local-a"
name = "Local A"
backend_kind = "ollama"
supported_tasks = ["chat"]

[endpoints.client]
type = "ollama"
base_url = "http://127.0.0.1:9"
model = "tiny"

[[endpoints]]
id = "remote"
name = "Remote"
backend_kind = "open_ai"
cost_per_1k_tokens = 0.01

[endpoints.client]
type = "open_ai"
api_key_env = "ROUTER_CORE_TEST_NO_SUCH_KEY"
model = "gpt-4"
"#,
    )
    .unwrap();

    let router = Router::from_file(file).unwrap();
    assert_eq!(router.config().strategy, RoutingStrategy::CostBased);

    let stats = router.stats();
    let ids: Vec<&str> = stats.endpoints.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["local-a", "remote"]);
    assert_eq!(router.endpoints_for_task(TaskType::Chat), vec!["local-a"]);
}
