//! HTTP control plane.
//!
//! A small plain-text surface over the agent: list active probes, inspect
//! invocation counts and recent errors, disable a probe, or enable one
//! with fresh arguments, all while the process keeps running.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agent::{Agent, AgentError, EnableOutcome};

/// How many consecutive ports are tried before giving up.
pub const MAX_BIND_ATTEMPTS: u16 = 32;

/// Build the control-plane router over an agent.
pub fn create_router(agent: Arc<Agent>) -> Router {
    Router::new()
        .route("/profilers", get(list_profilers))
        .route("/status/{name}", get(probe_status))
        .route("/disable/{name}", get(disable_probe))
        .route("/enable/{name}", post(enable_probe))
        .route("/errors", get(error_messages))
        .route("/isRunning", get(is_running))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(agent)
}

/// Bind a listener starting at `port`, retrying on `port+1` up to
/// [`MAX_BIND_ATTEMPTS`] times. Exhaustion is fatal.
pub async fn bind(port: u16) -> Result<TcpListener, AgentError> {
    for attempt in 0..MAX_BIND_ATTEMPTS {
        let candidate = port.saturating_add(attempt);
        match TcpListener::bind(("0.0.0.0", candidate)).await {
            Ok(listener) => {
                tracing::info!(port = candidate, "Control plane listening");
                return Ok(listener);
            }
            Err(e) => {
                tracing::warn!(port = candidate, error = %e, "Bind failed, trying next port");
            }
        }
    }

    Err(AgentError::Bind(std::io::Error::new(
        std::io::ErrorKind::AddrInUse,
        format!(
            "no free port in {}..={}",
            port,
            port.saturating_add(MAX_BIND_ATTEMPTS - 1)
        ),
    )))
}

/// `GET /profilers` — newline-joined, sorted names of live probes.
async fn list_profilers(State(agent): State<Arc<Agent>>) -> String {
    agent.list_active().await.join("\n")
}

/// `GET /status/{name}` — invocation count for one probe.
async fn probe_status(State(agent): State<Arc<Agent>>, Path(name): Path<String>) -> Response {
    match agent.sample_count(&name).await {
        Some(count) => format!("{name} has recorded stats {count} times\n").into_response(),
        None => (
            StatusCode::NOT_FOUND,
            format!("Profiler {name} is not active\n"),
        )
            .into_response(),
    }
}

/// `GET /disable/{name}` — cancel and remove a probe.
async fn disable_probe(State(agent): State<Arc<Agent>>, Path(name): Path<String>) -> String {
    if agent.disable(&name).await {
        format!("Disabled profiler {name}\n")
    } else {
        format!("Profiler {name} is already disabled\n")
    }
}

/// `POST /enable/{name}` — instantiate and schedule a probe, merging the
/// JSON object body into the argument set.
async fn enable_probe(
    State(agent): State<Arc<Agent>>,
    Path(name): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let extra = match json_to_args(body) {
        Ok(extra) => extra,
        Err(reason) => {
            return (
                StatusCode::BAD_REQUEST,
                format!("Error in enabling {name}: {reason}\n"),
            )
                .into_response();
        }
    };

    match agent.enable(&name, extra).await {
        Ok(EnableOutcome::Enabled) => format!("Profiler {name} is enabled").into_response(),
        Ok(EnableOutcome::AlreadyRunning) => {
            format!("Profiler {name} is already running").into_response()
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            format!("Error in enabling {name}: {e}\n"),
        )
            .into_response(),
    }
}

/// `GET /errors` — the most recent probe failures.
async fn error_messages(State(agent): State<Arc<Agent>>) -> String {
    format!("Errors: {}", agent.errors().snapshot().join("\n"))
}

/// `GET /isRunning` — the global running flag.
async fn is_running(State(agent): State<Arc<Agent>>) -> String {
    format!("isRunning: {}", agent.is_running())
}

/// Flatten a JSON object into string arguments.
fn json_to_args(body: serde_json::Value) -> Result<HashMap<String, String>, String> {
    let serde_json::Value::Object(map) = body else {
        return Err("request body must be a JSON object".to_owned());
    };

    let mut extra = HashMap::with_capacity(map.len());
    for (key, value) in map {
        let rendered = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Bool(b) => b.to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            other => return Err(format!("unsupported value for {key}: {other}")),
        };
        extra.insert(key, rendered);
    }
    Ok(extra)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_to_args_scalars() {
        let extra = json_to_args(serde_json::json!({
            "memory-period": "5s",
            "port": 8125,
            "flag": true,
        }))
        .unwrap();

        assert_eq!(extra.get("memory-period").unwrap(), "5s");
        assert_eq!(extra.get("port").unwrap(), "8125");
        assert_eq!(extra.get("flag").unwrap(), "true");
    }

    #[test]
    fn test_json_to_args_rejects_non_objects() {
        assert!(json_to_args(serde_json::json!([1, 2])).is_err());
        assert!(json_to_args(serde_json::json!({"nested": {"a": 1}})).is_err());
    }
}
