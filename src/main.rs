use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate::config::TollgateConfig;
use tollgate::http::{HttpServer, RateLimitLayer};
use tollgate::ratelimit::PolicySet;

/// Sliding-window rate limiting in front of a demo API.
#[derive(Parser, Debug)]
#[command(name = "tollgate", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration
    #[arg(short, long)]
    addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting Tollgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TollgateConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.server.http_addr = addr;
    }
    info!(http_addr = %config.server.http_addr, "Configuration loaded");

    let policies = PolicySet::from_config(&config.rate_limiting)?;
    policies.start()?;
    info!("Rate limit tiers initialized");

    let server = HttpServer::bind(config.server.http_addr, router(&policies)).await?;
    server.serve_with_shutdown(shutdown_signal()).await?;

    policies.stop();
    info!("Tollgate stopped");
    Ok(())
}

/// Demo routes, one per protection tier.
fn router(policies: &PolicySet) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(
            "/api/auth/login",
            post(login).layer(RateLimitLayer::new(policies.authentication.clone())),
        )
        .route(
            "/api/items",
            get(list_items).layer(RateLimitLayer::new(policies.general_api.clone())),
        )
        .route(
            "/api/admin/reindex",
            post(reindex).layer(RateLimitLayer::new(policies.strict.clone())),
        )
}

async fn login() -> Json<Value> {
    Json(json!({ "success": true, "token": "demo" }))
}

async fn list_items() -> Json<Value> {
    Json(json!({ "success": true, "items": [] }))
}

async fn reindex() -> (StatusCode, Json<Value>) {
    (StatusCode::ACCEPTED, Json(json!({ "success": true })))
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
