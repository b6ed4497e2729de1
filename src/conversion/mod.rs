//! Background PDF conversion of generated contracts.

mod cloudconvert;

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

pub use cloudconvert::{CloudConvertClient, CloudConvertConfig};

use crate::contracts::{BlobStore, ConversionError, DocumentConverter, SourceDocument};
use crate::metrics::ConversionMetrics;

/// Converter used when no conversion service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopConverter;

impl DocumentConverter for NoopConverter {
    async fn convert(&self, _source: SourceDocument) -> Result<Bytes, ConversionError> {
        Err(ConversionError::Disabled)
    }

    fn name(&self) -> &'static str {
        "noop"
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Converter selected at startup.
pub enum ConverterBackend {
    CloudConvert(CloudConvertClient),
    Noop(NoopConverter),
}

impl ConverterBackend {
    /// CloudConvert when `CONTRACTOR_CLOUDCONVERT_API_KEY` is set, otherwise noop.
    pub fn from_env() -> Result<Self, ConversionError> {
        match CloudConvertConfig::from_env() {
            Some(config) => Ok(Self::CloudConvert(CloudConvertClient::new(config)?)),
            None => Ok(Self::Noop(NoopConverter)),
        }
    }
}

impl DocumentConverter for ConverterBackend {
    async fn convert(&self, source: SourceDocument) -> Result<Bytes, ConversionError> {
        match self {
            Self::CloudConvert(c) => c.convert(source).await,
            Self::Noop(c) => c.convert(source).await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::CloudConvert(c) => c.name(),
            Self::Noop(c) => c.name(),
        }
    }

    fn is_enabled(&self) -> bool {
        match self {
            Self::CloudConvert(c) => c.is_enabled(),
            Self::Noop(c) => c.is_enabled(),
        }
    }
}

/// Configuration for background conversion.
#[derive(Debug, Clone)]
pub struct ConversionConfig {
    /// Maximum conversions running at once.
    pub max_concurrent: usize,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}

impl ConversionConfig {
    /// Reads `CONTRACTOR_MAX_CONVERSIONS` (default: 4, minimum 1).
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_concurrent: std::env::var("CONTRACTOR_MAX_CONVERSIONS")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .map(|n| n.max(1))
                .unwrap_or(default.max_concurrent),
        }
    }
}

/// Blob key of the PDF produced for `filename`.
pub fn pdf_key(filename: &str) -> String {
    format!("contracts/{}.pdf", filename)
}

/// Runs conversions off the request path and stores the resulting PDFs.
///
/// A failed conversion leaves the source document in place; the failure is
/// logged and counted, never reported to the original caller.
pub struct ConversionDispatcher<B: BlobStore, V: DocumentConverter> {
    blobs: Arc<B>,
    converter: Arc<V>,
    permits: Arc<Semaphore>,
    metrics: Arc<ConversionMetrics>,
}

impl<B, V> ConversionDispatcher<B, V>
where
    B: BlobStore + 'static,
    V: DocumentConverter + 'static,
{
    pub fn new(
        blobs: Arc<B>,
        converter: Arc<V>,
        config: ConversionConfig,
        metrics: Arc<ConversionMetrics>,
    ) -> Self {
        Self {
            blobs,
            converter,
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            metrics,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.converter.is_enabled()
    }

    pub fn converter_name(&self) -> &'static str {
        self.converter.name()
    }

    /// Queues a conversion. Returns `None` when conversion is disabled.
    pub fn spawn(&self, filename: String, source: SourceDocument) -> Option<JoinHandle<()>> {
        if !self.converter.is_enabled() {
            tracing::debug!(filename = %filename, "Conversion disabled, keeping source document only");
            return None;
        }

        let blobs = Arc::clone(&self.blobs);
        let converter = Arc::clone(&self.converter);
        let permits = Arc::clone(&self.permits);
        let metrics = Arc::clone(&self.metrics);

        Some(tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };

            metrics.record_started();
            let start = Instant::now();
            let result = convert_and_store(blobs.as_ref(), converter.as_ref(), &filename, source).await;
            let elapsed_us = start.elapsed().as_micros() as u64;
            metrics.record_finished(result.is_ok(), elapsed_us);

            match result {
                Ok(location) => tracing::info!(
                    filename = %filename,
                    location = %location,
                    converter = converter.name(),
                    duration_ms = elapsed_us / 1000,
                    "Stored converted PDF"
                ),
                Err(e) => tracing::warn!(
                    filename = %filename,
                    converter = converter.name(),
                    error = %e,
                    "PDF conversion failed, source document kept"
                ),
            }
        }))
    }
}

async fn convert_and_store<B: BlobStore, V: DocumentConverter>(
    blobs: &B,
    converter: &V,
    filename: &str,
    source: SourceDocument,
) -> Result<String, ConversionError> {
    let pdf = converter.convert(source).await?;
    let location = blobs.put(&pdf_key(filename), pdf, "application/pdf").await?;
    Ok(location)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalBlobStore;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    struct EchoConverter;

    impl DocumentConverter for EchoConverter {
        async fn convert(&self, source: SourceDocument) -> Result<Bytes, ConversionError> {
            let mut pdf = b"%PDF-".to_vec();
            pdf.extend_from_slice(&source.body);
            Ok(Bytes::from(pdf))
        }

        fn name(&self) -> &'static str {
            "echo"
        }
    }

    fn source() -> SourceDocument {
        SourceDocument {
            filename: "ivanov_20250923-001.html".into(),
            content_type: "text/html".into(),
            body: Bytes::from_static(b"<p>contract</p>"),
        }
    }

    #[tokio::test]
    async fn stores_pdf_next_to_source() {
        let dir = TempDir::new().unwrap();
        let blobs = Arc::new(LocalBlobStore::open(dir.path()).unwrap());
        let metrics = Arc::new(ConversionMetrics::default());
        let dispatcher = ConversionDispatcher::new(
            Arc::clone(&blobs),
            Arc::new(EchoConverter),
            ConversionConfig::default(),
            Arc::clone(&metrics),
        );

        dispatcher
            .spawn("ivanov_20250923-001".into(), source())
            .unwrap()
            .await
            .unwrap();

        let pdf = blobs.get("contracts/ivanov_20250923-001.pdf").await.unwrap().unwrap();
        assert!(pdf.starts_with(b"%PDF-"));
        assert_eq!(metrics.succeeded_total.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.inflight.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn noop_converter_spawns_nothing() {
        let dir = TempDir::new().unwrap();
        let dispatcher = ConversionDispatcher::new(
            Arc::new(LocalBlobStore::open(dir.path()).unwrap()),
            Arc::new(NoopConverter),
            ConversionConfig::default(),
            Arc::new(ConversionMetrics::default()),
        );
        assert!(!dispatcher.is_enabled());
        assert!(dispatcher.spawn("x".into(), source()).is_none());
    }

    #[test]
    fn pdf_key_lives_under_contracts() {
        assert_eq!(pdf_key("a_20250923-001"), "contracts/a_20250923-001.pdf");
    }
}
