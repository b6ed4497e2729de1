mod admin;
mod handlers;
mod issued;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;

use crate::contracts::{BlobStore, CounterStore, DocumentConverter};

pub use admin::{CounterStatusResponse, SeedRequest, SeedResponse};
pub use handlers::{
    ApiConfig, ApiError, AppState, ErrorResponse, GenerateResponse, SignedUploadResponse,
    StatsResponse, AUTH_HEADER, MAX_SIGNED_UPLOAD_BYTES,
};
pub use issued::{IssuedContract, IssuedContracts, DEFAULT_ISSUED_TTL_DAYS};

/// Creates the API router.
pub fn create_router<S, B, V>(state: Arc<AppState<S, B, V>>) -> Router
where
    S: CounterStore + 'static,
    B: BlobStore + 'static,
    V: DocumentConverter + 'static,
{
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ping", get(handlers::ping))
        .route("/stats", get(handlers::get_stats::<S, B, V>))
        .route("/metrics", get(handlers::metrics::<S, B, V>))
        .route("/contracts", post(handlers::generate_contract::<S, B, V>))
        .route(
            "/contracts/:filename",
            get(handlers::download_contract::<S, B, V>),
        )
        // Oversized uploads get through to the handler so the 413 carries a JSON body
        .route(
            "/contracts/:number/signed",
            post(handlers::upload_signed::<S, B, V>)
                .layer(DefaultBodyLimit::max(2 * MAX_SIGNED_UPLOAD_BYTES)),
        )
        // Counter administration
        .route("/admin/counter", get(admin::counter_status::<S, B, V>))
        .route("/admin/counter/seed", post(admin::seed_counter::<S, B, V>))
        .with_state(state)
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// How often expired duplicate-client entries are dropped.
    pub purge_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            purge_interval: Duration::from_secs(3600),
        }
    }
}

impl ServerConfig {
    /// Reads `CONTRACTOR_HOST` and `CONTRACTOR_PORT`.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            host: std::env::var("CONTRACTOR_HOST").unwrap_or(default.host),
            port: std::env::var("CONTRACTOR_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(default.port),
            purge_interval: default.purge_interval,
        }
    }
}

/// Starts the HTTP server.
pub async fn start_server<S, B, V, F>(
    config: ServerConfig,
    state: Arc<AppState<S, B, V>>,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: CounterStore + 'static,
    B: BlobStore + 'static,
    V: DocumentConverter + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let purge_state = Arc::clone(&state);
    let purge_interval = config.purge_interval;
    let purger = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(purge_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = purge_state.issued.purge_expired(Utc::now());
            if removed > 0 {
                tracing::debug!(removed = removed, "Purged expired client entries");
            }
        }
    });

    let router = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await;
    purger.abort();
    served?;

    Ok(())
}
