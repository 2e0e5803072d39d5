//! TransferScope HTTP server.
//!
//! Serves the read surface, the event ingest endpoint, and the API-key
//! guarded admin writes. Batch work lives in the `transferscope-worker`
//! binary.

use anyhow::Context;
use axum::http::HeaderValue;
use axum::middleware as axum_mw;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transferscope_backend::api::{self, AppState};
use transferscope_backend::middleware::{
    rate_limit_middleware, request_logging, RateLimitConfig, RateLimitLayer,
};
use transferscope_backend::{Config, Store};

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(parsed))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(
                "transferscope=info,transferscope_backend=info,tower_http=warn",
            )
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let store = Store::open(&config.database_path)?;

    let limiter = RateLimitLayer::new(RateLimitConfig {
        max_requests: config.rate_limit_requests,
        window: Duration::from_secs(config.rate_limit_window_secs),
        burst: config.rate_limit_burst,
    });
    {
        // Old limiter buckets drain on a slow cycle.
        let limiter = limiter.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(120));
            loop {
                interval.tick().await;
                limiter.cleanup();
            }
        });
    }

    let cors = cors_layer(&config.cors_origins);
    let port = config.port;
    let state = AppState {
        store,
        config: Arc::new(config),
    };

    let app = api::router(state)
        .layer(axum_mw::from_fn_with_state(
            limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(axum_mw::from_fn(request_logging))
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "transferscope listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server exited")?;

    Ok(())
}
