//! Two-role ping-pong demo for `streamipc-core`.
//!
//! Run two copies of this binary against the same Redis instance and
//! stream: one with `ROLE=child`, which replies `"pong"` to every
//! request, and one with `ROLE=parent`, which sends `"ping"` to the
//! child's group on a timer and logs the response. A single process can
//! also run both roles if `ROLE=both`.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde_json::{Value, json};
use tokio::signal;
use tracing::{error, info, warn};

use streamipc_config::Config;
use streamipc_core::{Entry, Replier, StreamCoordinator};

const STREAM: &str = "ping-pong";
const PARENT_GROUP: &str = "parent";
const CHILD_GROUP: &str = "child";

#[derive(Clone, Copy, PartialEq, Eq)]
enum Role {
    Parent,
    Child,
    Both,
}

fn role_from_env() -> Role {
    match std::env::var("ROLE").as_deref() {
        Ok("child") => Role::Child,
        Ok("both") => Role::Both,
        _ => Role::Parent,
    }
}

fn child_request_handler() -> streamipc_core::RequestHandler {
    Arc::new(move |entry: Entry, replier: Replier| {
        Box::pin(async move {
            info!(content = %entry.content(), "child received request");
            if let Err(e) = replier.fulfill(&entry, "pong").await {
                error!(error = %e, "failed to publish pong reply");
            }
        })
    })
}

fn rejecting_request_handler(group: &'static str) -> streamipc_core::RequestHandler {
    Arc::new(move |entry: Entry, replier: Replier| {
        Box::pin(async move {
            warn!(content = %entry.content(), group, "unexpected inbound request, rejecting");
            if let Err(e) = replier.reject(&entry, "this group does not accept requests").await {
                error!(error = %e, "failed to publish rejection");
            }
        })
    })
}

fn logging_error_handler(group: &'static str) -> streamipc_core::ErrorHandler {
    Arc::new(move |message: String| {
        error!(group, %message, "streamipc coordinator error");
    })
}

/// Sends `"ping"` to the child group every two seconds. Spawned as its own
/// task; the caller cancels it with `JoinHandle::abort` on shutdown rather
/// than threading a cancellation channel through.
async fn run_parent_loop(coordinator: Arc<StreamCoordinator>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(2));
    loop {
        ticker.tick().await;
        match coordinator.send_to_group("ping", CHILD_GROUP).await {
            Ok(response) if response.is_fulfilled() => {
                info!(value = ?response.value(), "parent received reply");
            }
            Ok(response) => {
                warn!(reason = ?response.reason(), "parent's ping was rejected");
            }
            Err(e) => {
                error!(error = %e, "send_to_group failed");
            }
        }
    }
}

#[derive(Clone)]
struct ServiceState {
    role: &'static str,
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "streamipc-demo-ping-pong",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn ready_check(State(state): State<ServiceState>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({ "ready": true, "role": state.role })),
    )
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    streamipc_core::render_metrics().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn start_health_server(port: u16, state: ServiceState) -> Result<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind health server to {addr}"))?;

    info!("health server listening on http://{addr}");
    axum::serve(listener, app).await.context("health server failed")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    streamipc_common::init_tracing();

    let role = role_from_env();
    let config = Config::load().context("failed to load configuration")?;

    let state = ServiceState {
        role: match role {
            Role::Parent => "parent",
            Role::Child => "child",
            Role::Both => "both",
        },
    };
    let health_port = config.observability.health_port;
    let health_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_port, health_state).await {
            error!(error = %e, "health server exited");
        }
    });

    let mut coordinators = Vec::new();

    if matches!(role, Role::Child | Role::Both) {
        let mut child = StreamCoordinator::new(STREAM, CHILD_GROUP);
        child.on_request(child_request_handler());
        child.on_error(logging_error_handler("child"));
        child.connect(&config).await.context("child coordinator failed to connect")?;
        info!("child group connected and listening for ping requests");
        coordinators.push(Arc::new(child));
    }

    let mut parent_handle = None;
    if matches!(role, Role::Parent | Role::Both) {
        let mut parent = StreamCoordinator::new(STREAM, PARENT_GROUP);
        parent.on_request(rejecting_request_handler("parent"));
        parent.on_error(logging_error_handler("parent"));
        parent.connect(&config).await.context("parent coordinator failed to connect")?;
        info!("parent group connected, sending ping every 2s");

        let parent = Arc::new(parent);
        coordinators.push(parent.clone());
        parent_handle = Some(tokio::spawn(run_parent_loop(parent)));
    }

    signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown signal received");

    if let Some(handle) = parent_handle {
        handle.abort();
    }

    for coordinator in coordinators {
        if let Ok(mut coordinator) = Arc::try_unwrap(coordinator) {
            let _ = coordinator.disconnect().await;
        }
    }

    info!("streamipc-demo-ping-pong stopped");
    Ok(())
}
