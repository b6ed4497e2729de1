use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use contractor::allocator::{AllocatorConfig, NumberIssuer, SequenceAllocator};
use contractor::api::{start_server, ApiConfig, AppState, ServerConfig};
use contractor::contracts::{ContractorError, DocumentConverter};
use contractor::conversion::{ConversionConfig, ConversionDispatcher, ConverterBackend};
use contractor::documents::Template;
use contractor::metrics::MetricsRegistry;
use contractor::storage::{
    BlobBackend, CounterBackend, CounterBackendKind, FileCounterStore, LocalBlobStore,
    S3BlobStore,
};

type ServiceState = AppState<CounterBackend, BlobBackend, ConverterBackend>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("contractor=info".parse()?))
        .init();

    tracing::info!("Contractor starting...");

    let state = match build_state().await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return Err(e.into());
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown signal received");
    };

    start_server(ServerConfig::from_env(), state, shutdown).await?;

    tracing::info!("Contractor stopped");
    Ok(())
}

async fn build_state() -> Result<ServiceState, ContractorError> {
    // Invalid numbering settings are fatal
    let allocator_config = AllocatorConfig::from_env()?;

    // Counter store
    let data_dir = std::env::var("CONTRACTOR_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let kind: CounterBackendKind = std::env::var("CONTRACTOR_COUNTER_BACKEND")
        .unwrap_or_else(|_| "rocksdb".into())
        .parse()?;
    let counters = Arc::new(CounterBackend::open(kind, &data_dir)?);
    tracing::info!(
        backend = %kind,
        data_dir = %data_dir,
        scope_policy = %allocator_config.scope_policy,
        wrap_bound = allocator_config.wrap_bound.get(),
        "Opened counter store"
    );

    let metrics = Arc::new(MetricsRegistry::new());
    let mut issuer = NumberIssuer::new(
        SequenceAllocator::with_system_clock(counters, allocator_config),
        Arc::clone(&metrics.allocation),
    );

    // Optional fallback; numbers issued from it are flagged degraded
    if let Ok(dir) = std::env::var("CONTRACTOR_FALLBACK_DIR") {
        let fallback = FileCounterStore::open(&dir)?;
        issuer = issuer.with_fallback(SequenceAllocator::with_system_clock(
            Arc::new(fallback),
            allocator_config,
        ));
        tracing::warn!(dir = %dir, "File counter fallback enabled; fallback numbers may repeat");
    }

    // Document storage (S3 when a bucket is configured, local disk otherwise)
    let blobs = if let Ok(bucket) = std::env::var("CONTRACTOR_S3_BUCKET") {
        let prefix = std::env::var("CONTRACTOR_S3_PREFIX").unwrap_or_default();
        let s3 = if let Ok(endpoint) = std::env::var("CONTRACTOR_S3_ENDPOINT") {
            let region =
                std::env::var("CONTRACTOR_S3_REGION").unwrap_or_else(|_| "us-east-1".into());
            tracing::info!("Connecting to S3 at {} (bucket: {})", endpoint, bucket);
            S3BlobStore::with_endpoint(&bucket, prefix, endpoint, region).await?
        } else {
            tracing::info!("Connecting to AWS S3 (bucket: {})", bucket);
            S3BlobStore::new(&bucket, prefix).await?
        };
        BlobBackend::s3(s3)
    } else {
        let root = std::env::var("CONTRACTOR_STORAGE_DIR")
            .unwrap_or_else(|_| format!("{}/documents", data_dir));
        tracing::info!("Storing documents under {}", root);
        BlobBackend::local(LocalBlobStore::open(root)?)
    };
    let blobs = Arc::new(blobs);

    let template = match std::env::var("CONTRACTOR_TEMPLATE_PATH") {
        Ok(path) => {
            tracing::info!("Loading contract template from {}", path);
            Template::from_path(path)?
        }
        Err(_) => Template::default_contract(),
    };

    let converter = ConverterBackend::from_env()?;
    if converter.is_enabled() {
        tracing::info!(converter = converter.name(), "PDF conversion enabled");
    } else {
        tracing::info!("CloudConvert not configured, contracts are served without PDF");
    }
    let conversions = ConversionDispatcher::new(
        Arc::clone(&blobs),
        Arc::new(converter),
        ConversionConfig::from_env(),
        Arc::clone(&metrics.conversion),
    );

    Ok(AppState::new(
        issuer,
        blobs,
        conversions,
        template,
        ApiConfig::from_env(),
        metrics,
    ))
}
