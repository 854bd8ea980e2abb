//! Control-plane integration tests.
//!
//! Covers every HTTP route, the bind-on-next-port behavior, and the
//! end-to-end scheduling properties of the probe loops.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tower::ServiceExt;

use periscope::scheduler::{ProbeCell, Scheduler};
use periscope::server::{bind, create_router};
use periscope::{Agent, Arguments, ErrorLog, Probe, ProbeError};

// =============================================================================
// Test helpers
// =============================================================================

fn test_agent() -> Arc<Agent> {
    let arguments =
        Arguments::parse("server=localhost,port=8125,probes=memory,memory-period=60s")
            .expect("arguments parse");
    Arc::new(Agent::new(arguments).expect("agent build"))
}

async fn started_agent() -> Arc<Agent> {
    let agent = test_agent();
    agent.start().await.expect("agent start");
    agent
}

async fn get(agent: &Arc<Agent>, uri: &str) -> (StatusCode, String) {
    let response = create_router(Arc::clone(agent))
        .oneshot(
            Request::builder()
                .uri(uri)
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    let status = response.status();
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

async fn post_json(agent: &Arc<Agent>, uri: &str, body: &str) -> (StatusCode, String) {
    let response = create_router(Arc::clone(agent))
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_owned()))
                .expect("request"),
        )
        .await
        .expect("response");

    let status = response.status();
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

// =============================================================================
// Route tests
// =============================================================================

#[tokio::test]
async fn test_profilers_lists_active_sorted() {
    let agent = started_agent().await;
    let (status, body) = get(&agent, "/profilers").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "memory");
}

#[tokio::test]
async fn test_status_reports_invocation_count() {
    let agent = started_agent().await;
    let (status, body) = get(&agent, "/status/memory").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("memory has recorded stats "));
    assert!(body.ends_with(" times\n"));
}

#[tokio::test]
async fn test_status_unknown_probe_is_not_found() {
    let agent = started_agent().await;
    let (status, body) = get(&agent, "/status/ghost").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "Profiler ghost is not active\n");
}

#[tokio::test]
async fn test_disable_then_disable_again() {
    let agent = started_agent().await;

    let (_, body) = get(&agent, "/disable/memory").await;
    assert_eq!(body, "Disabled profiler memory\n");
    assert!(agent.list_active().await.is_empty());

    let (_, body) = get(&agent, "/disable/memory").await;
    assert_eq!(body, "Profiler memory is already disabled\n");

    // The final invocation count stays readable after disable.
    let (status, body) = get(&agent, "/status/memory").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("memory has recorded stats "));
}

#[tokio::test]
async fn test_enable_cycle() {
    let agent = started_agent().await;

    // Already running.
    let (_, body) = post_json(&agent, "/enable/memory", "{}").await;
    assert_eq!(body, "Profiler memory is already running");

    // Disable, then enable with a fresh argument.
    get(&agent, "/disable/memory").await;
    let (status, body) =
        post_json(&agent, "/enable/memory", r#"{"memory-period": "30s"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Profiler memory is enabled");
    assert_eq!(agent.list_active().await, vec!["memory"]);
    assert_eq!(agent.config().snapshot().get("memory-period"), Some("30s"));
}

#[tokio::test]
async fn test_enable_unknown_probe_reports_error() {
    let agent = started_agent().await;
    let (status, body) = post_json(&agent, "/enable/tomcat", "{}").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.starts_with("Error in enabling tomcat: "));
    assert!(body.ends_with('\n'));
}

#[tokio::test]
async fn test_errors_route_shows_recent_failures() {
    let agent = started_agent().await;
    let (_, body) = get(&agent, "/errors").await;
    assert_eq!(body, "Errors: ");

    agent.errors().record("memory: something failed");
    let (_, body) = get(&agent, "/errors").await;
    assert_eq!(body, "Errors: memory: something failed");
}

#[tokio::test]
async fn test_is_running_flips_on_shutdown() {
    let agent = started_agent().await;

    let (_, body) = get(&agent, "/isRunning").await;
    assert_eq!(body, "isRunning: true");

    agent.shutdown().await;
    let (_, body) = get(&agent, "/isRunning").await;
    assert_eq!(body, "isRunning: false");
}

// =============================================================================
// Bind behavior
// =============================================================================

#[tokio::test]
async fn test_bind_retries_on_occupied_port() {
    // Occupy a port, then ask the control plane to bind it.
    let occupied = tokio::net::TcpListener::bind("0.0.0.0:0")
        .await
        .expect("occupy port");
    let taken = occupied.local_addr().expect("addr").port();

    let listener = bind(taken).await.expect("bind with retry");
    let bound = listener.local_addr().expect("addr").port();
    assert!(bound > taken, "expected a higher port, got {bound}");

    // The retried listener actually serves.
    let agent = started_agent().await;
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, create_router(agent)).await.unwrap();
    });

    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", addr.port()))
        .await
        .expect("connect");
    stream
        .write_all(b"GET /isRunning HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n")
        .await
        .expect("write");

    let mut response = String::new();
    stream.read_to_string(&mut response).await.expect("read");
    assert!(response.contains("isRunning: true"), "got: {response}");
}

// =============================================================================
// End-to-end scheduling
// =============================================================================

struct CadenceProbe {
    name: &'static str,
    period: Duration,
    flush_delay: Duration,
}

#[async_trait::async_trait]
impl Probe for CadenceProbe {
    fn name(&self) -> &str {
        self.name
    }

    fn period(&self) -> Duration {
        self.period
    }

    async fn sample(&mut self) -> Result<(), ProbeError> {
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ProbeError> {
        if !self.flush_delay.is_zero() {
            tokio::time::sleep(self.flush_delay).await;
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_two_periods_tick_independently() {
    let scheduler = Scheduler::new(ErrorLog::new());

    let fast = Arc::new(ProbeCell::new(Box::new(CadenceProbe {
        name: "fast",
        period: Duration::from_millis(10),
        flush_delay: Duration::ZERO,
    })));
    let slow = Arc::new(ProbeCell::new(Box::new(CadenceProbe {
        name: "slow",
        period: Duration::from_millis(50),
        flush_delay: Duration::from_millis(100),
    })));

    let fast_handle = scheduler.schedule(Arc::clone(&fast));
    let slow_handle = scheduler.schedule(Arc::clone(&slow));

    tokio::time::sleep(Duration::from_millis(100)).await;
    fast_handle.cancel();
    slow_handle.cancel();

    let fast_count = fast.samples();
    let slow_count = slow.samples();
    assert!(
        (6..=14).contains(&fast_count),
        "10ms probe ticked {fast_count} times in 100ms"
    );
    assert!(
        (1..=4).contains(&slow_count),
        "50ms probe ticked {slow_count} times in 100ms"
    );

    // A slow flush on one probe does not block the other's flush.
    let start = std::time::Instant::now();
    let (fast_flush, slow_flush) = tokio::join!(fast.flush(), slow.flush());
    fast_flush.expect("fast flush");
    slow_flush.expect("slow flush");
    assert!(
        start.elapsed() < Duration::from_millis(200),
        "flushes did not run concurrently"
    );
}
