use anyhow::Context;
use axum::{Router, routing::get};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use workbench_api::config::AppConfig;
use workbench_api::middleware::{create_cors_layer, observability::init_observability};
use workbench_api::routes::{AppState, create_api_router, health_check};
use workbench_api::services::auth_adapter::AuthAdapter;
use workbench_api::services::jwt_service::JwtService;

const JWKS_ATTEMPTS: u32 = 5;
const JWKS_RETRY_DELAY: Duration = Duration::from_secs(2);

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("SIGINT received, shutting down gracefully"),
                    _ = sigterm.recv() => info!("SIGTERM received, shutting down gracefully"),
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG controls the level (default: info)
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    init_observability(&config);
    info!("Application starting...");

    let jwks_client = reqwest::Client::builder()
        .timeout(config.http_client_timeout)
        .build()
        .context("failed to build JWKS client")?;
    let jwt = Arc::new(JwtService::new(&config.jwks_url, jwks_client));
    let keys = jwt
        .refresh_with_retry(JWKS_ATTEMPTS, JWKS_RETRY_DELAY)
        .await
        .inspect_err(|e| error!("JWKS unreachable at {}: {}", config.jwks_url, e))
        .context("failed to load the JWKS key set")?;
    info!("Loaded {} signing key(s) from {}", keys, config.jwks_url);

    let adapter = match &config.adapter_secret {
        Some(_) => {
            let adapter = AuthAdapter::open(config.adapter_db.as_deref())
                .context("failed to open the auth adapter database")?;
            info!("Auth adapter mounted at /api/v1/auth-adapter");
            Some(Arc::new(adapter))
        }
        None => {
            info!("AUTH_ADAPTER_SECRET not set; auth adapter disabled");
            None
        }
    };

    let bind_addr = config.bind_addr;
    let drain = config.shutdown_drain;
    let cors = create_cors_layer(&config.cors_origins);
    let state = AppState::new(config, jwt, adapter).context("failed to build application state")?;

    let app = Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", create_api_router(&state))
        .with_state(state.clone())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        );

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .inspect_err(|e| error!("Failed to bind {}: {}", bind_addr, e))
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    info!("Server listening on {}", bind_addr);

    let graceful = state.shutdown.child_token();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { graceful.cancelled().await })
            .await
    });

    tokio::select! {
        result = &mut server => {
            // The server stopped on its own.
            state.store.close();
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(anyhow::Error::new(e).context("server failed")),
                Err(e) => Err(anyhow::Error::new(e).context("server task failed")),
            };
        }
        _ = shutdown_signal() => {}
    }

    // Stop accepting, cancel open streams, then give in-flight requests the drain window.
    state.shutdown.cancel();
    match tokio::time::timeout(drain, &mut server).await {
        Ok(Ok(Ok(()))) => info!("Drained in-flight requests"),
        Ok(Ok(Err(e))) => warn!("Server error while draining: {}", e),
        Ok(Err(e)) => warn!("Server task failed while draining: {}", e),
        Err(_) => {
            warn!("Drain window of {:?} elapsed; aborting remaining connections", drain);
            server.abort();
        }
    }

    state.store.close();
    info!("Server shutdown complete");
    Ok(())
}
