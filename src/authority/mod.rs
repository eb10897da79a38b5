//! In-memory remote authority speaking the same HTTP surface the client consumes.

mod accounts;
mod catalog;
mod handlers;

pub use accounts::{Accounts, TokenSigner};
pub use catalog::Catalog;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::AuthorityConfig;
use crate::models::Series;

const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AuthorityState {
    pub accounts: Arc<Mutex<Accounts>>,
    pub catalog: Arc<Mutex<Catalog>>,
}

impl AuthorityState {
    pub fn new(token_secret: &str, seed: Vec<Series>) -> Self {
        Self {
            accounts: Arc::new(Mutex::new(Accounts::new(token_secret))),
            catalog: Arc::new(Mutex::new(Catalog::new(seed))),
        }
    }
}

pub async fn run_server(config: AuthorityConfig) -> Result<()> {
    let seed = match &config.seed_file {
        Some(path) => load_seed(path).await?,
        None => {
            info!("RATEIT_SEED_FILE not set, starting with an empty catalog");
            Vec::new()
        }
    };
    let app = build_router(AuthorityState::new(&config.token_secret, seed));

    info!("Listening on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Authority server failed")?;
    info!("Authority stopped");
    Ok(())
}

pub fn build_router(state: AuthorityState) -> Router {
    let api = Router::new()
        .route("/series", get(handlers::list_series))
        .route("/series/my-profile", get(handlers::my_profile))
        .route("/series/my-ratings", get(handlers::my_ratings))
        .route("/series/:id", get(handlers::get_series))
        .route("/series/:id/rank", post(handlers::submit_rank))
        .route("/series/:id/tap", post(handlers::tap))
        .route("/series/:id/library", post(handlers::set_library))
        .route("/auth/me", get(handlers::me))
        .route("/auth/login", post(handlers::login))
        .route("/auth/register", post(handlers::register))
        .route("/auth/logout", get(handlers::logout));

    Router::new()
        .nest("/api", api)
        .route("/health", get(handlers::health))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Reads a JSON array of series; each entry must pass the payload checks the client applies.
pub async fn load_seed(path: &Path) -> Result<Vec<Series>> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read seed file {}", path.display()))?;
    let series: Vec<Series> = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse seed file {}", path.display()))?;
    for s in &series {
        s.validate()
            .with_context(|| format!("Invalid series in {}", path.display()))?;
    }
    info!("Loaded {} series from {}", series.len(), path.display());
    Ok(series)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        term.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        }
    }
}
