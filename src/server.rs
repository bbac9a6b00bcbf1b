//! HTTP server exposing the probe endpoint.
//!
//! `/probe?target=<name>` runs one probe and returns its metrics. The
//! exporter's own process metrics are served on `/metrics`, and `/health`
//! answers liveness checks.

use crate::error::{CommvaultError, Result};
use crate::exposition::{self, CONTENT_TYPE};
use crate::probe::Prober;
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Header Prometheus sets to announce its scrape timeout.
const SCRAPE_TIMEOUT_HEADER: &str = "X-Prometheus-Scrape-Timeout-Seconds";

/// Shared application state.
#[derive(Clone)]
struct AppState {
    prober: Arc<Prober>,
}

#[derive(Debug, Deserialize)]
struct ProbeParams {
    target: Option<String>,
}

/// Build the router.
pub fn router(prober: Arc<Prober>) -> Router {
    let state = AppState { prober };

    Router::new()
        .route("/probe", get(probe_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/", get(root_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server and run until SIGINT or SIGTERM.
///
/// # Examples
///
/// ```no_run
/// use commvault_exporter::config::{ProbeConfig, TargetConfig};
/// use commvault_exporter::probe::Prober;
/// use commvault_exporter::server::start_server;
/// use commvault_exporter::targets::TargetRegistry;
///
/// #[tokio::main]
/// async fn main() {
///     let targets = TargetRegistry::new([TargetConfig::new(
///         "prod",
///         "https://commserve.example.com/webconsole/api",
///         "admin",
///         "secret",
///     )]);
///     let prober = Prober::new(targets, ProbeConfig::default()).unwrap();
///     start_server("0.0.0.0:9657", prober).await.unwrap();
/// }
/// ```
pub async fn start_server(listen_address: &str, prober: Prober) -> Result<()> {
    info!("Starting HTTP server on {}", listen_address);
    let listener = TcpListener::bind(listen_address).await?;

    serve(listener, Arc::new(prober), shutdown_signal()).await?;

    info!("HTTP server stopped");
    Ok(())
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, prober: Arc<Prober>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(prober))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| CommvaultError::Server(e.to_string()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// Handler for /probe endpoint.
async fn probe_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ProbeParams>,
) -> Response {
    let Some(target) = params.target.filter(|t| !t.trim().is_empty()) else {
        warn!("Probe request missing 'target' parameter");
        return (
            StatusCode::BAD_REQUEST,
            "Bad Request: 'target' parameter is required",
        )
            .into_response();
    };

    let scrape_timeout = headers
        .get(SCRAPE_TIMEOUT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok());
    let deadline = state.prober.config().deadline_for(scrape_timeout);

    let registry = match state.prober.probe_with_deadline(&target, deadline).await {
        Ok(registry) => registry,
        Err(CommvaultError::TargetNotFound(_)) => {
            warn!(target_name = %target, "Target not found in configuration");
            return (
                StatusCode::NOT_FOUND,
                format!("Target '{}' not found in configuration", target),
            )
                .into_response();
        }
        Err(e) => {
            error!(target_name = %target, "Probe failed: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to probe target '{}': {}", target, e),
            )
                .into_response();
        }
    };

    match exposition::encode(&registry) {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            warn!(target_name = %target, "Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Handler for /metrics endpoint (exporter process metrics).
async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        warn!("Failed to encode process metrics: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response();
    }

    (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], buffer).into_response()
}

/// Handler for /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "OK").into_response()
}

/// Handler for root endpoint.
async fn root_handler(State(state): State<AppState>) -> Html<String> {
    let targets: String = state
        .prober
        .targets()
        .list_targets()
        .map(|name| {
            format!(
                r#"            <li><a href="/probe?{}">{}</a></li>"#,
                escape_html(&target_query(name)),
                escape_html(name)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Commvault Exporter</title>
    <style>
        body {{ font-family: Arial, sans-serif; margin: 40px; }}
        h1 {{ color: #333; }}
        a {{ color: #0066cc; text-decoration: none; }}
        a:hover {{ text-decoration: underline; }}
        .info {{ background: #f0f0f0; padding: 15px; border-radius: 5px; margin: 20px 0; }}
    </style>
</head>
<body>
    <h1>Commvault Exporter</h1>
    <div class="info">
        <p>Prometheus probe exporter for Commvault backup servers</p>
        <p><strong>Endpoints:</strong></p>
        <ul>
            <li>/probe?target=&lt;name&gt; - Probe a configured target</li>
            <li><a href="/metrics">/metrics</a> - Exporter process metrics</li>
            <li><a href="/health">/health</a> - Health check</li>
        </ul>
        <p><strong>Targets:</strong></p>
        <ul>
{targets}
        </ul>
    </div>
</body>
</html>
"#
    ))
}

/// `target=<name>` with the name form-encoded.
fn target_query(name: &str) -> String {
    reqwest::Url::parse_with_params("http://localhost/probe", [("target", name)])
        .ok()
        .and_then(|url| url.query().map(str::to_string))
        .unwrap_or_default()
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
