//! Periscope binary entry point.
//!
//! Runs the agent standalone over its own process. Core functionality is
//! provided by the `periscope` library crate; embedding hosts use that
//! directly.

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use periscope::{Agent, Arguments, server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Periscope - in-process telemetry agent
#[derive(Parser, Debug)]
#[command(name = "periscope", version, about, long_about = None)]
struct Cli {
    /// Agent arguments as a comma-delimited k=v list
    /// (e.g. "server=statsd.local,port=8125,probes=memory").
    /// A conf=<file> key loads additional keys from a flat YAML file.
    #[arg(short, long, env = "PERISCOPE_ARGS")]
    args: String,

    /// Control-plane port (overrides the http_port argument).
    #[arg(long, env = "PERISCOPE_HTTP_PORT")]
    http_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,periscope=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut arguments = Arguments::parse(&cli.args)?;
    if let Some(port) = cli.http_port {
        let mut extra = HashMap::new();
        extra.insert("http_port".to_owned(), port.to_string());
        arguments = arguments.merged(&extra)?;
    }

    let http_enabled = arguments.http_server_enabled();
    let http_port = arguments.http_port()?;

    let agent = Arc::new(Agent::new(arguments)?);
    agent.start().await?;
    tracing::info!(probes = ?agent.list_active().await, "Agent started");

    if http_enabled {
        let listener = server::bind(http_port).await?;
        let router = server::create_router(Arc::clone(&agent));

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal(Arc::clone(&agent)))
            .await?;
    } else {
        shutdown_signal(Arc::clone(&agent)).await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for a termination signal, then run the one-shot shutdown flush.
async fn shutdown_signal(agent: Arc<Agent>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }

    agent.shutdown().await;
}
