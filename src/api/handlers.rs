use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::allocator::NumberIssuer;
use crate::api::issued::{IssuedContract, IssuedContracts};
use crate::contracts::{
    validate_blob_key, AllocationError, BlobStore, CounterStore, DocumentConverter,
    DocumentError, SourceDocument, StorageError,
};
use crate::conversion::ConversionDispatcher;
use crate::documents::{contract_date, contract_filename, validate_contract_number, ContractRequest, Template};
use crate::metrics::MetricsRegistry;

/// Largest accepted signed contract upload.
pub const MAX_SIGNED_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Header carrying the shared API token.
pub const AUTH_HEADER: &str = "x-auth-token";

/// HTTP-facing settings.
#[derive(Debug, Clone, Default)]
pub struct ApiConfig {
    /// Prefix for download links, e.g. `https://contracts.example.com`.
    /// Empty means links are relative to the server root.
    pub public_base_url: String,
    /// When set, mutating endpoints require a matching `X-Auth-Token`.
    pub auth_token: Option<String>,
}

impl ApiConfig {
    /// Reads `CONTRACTOR_PUBLIC_BASE_URL` and `CONTRACTOR_AUTH_TOKEN`.
    pub fn from_env() -> Self {
        Self {
            public_base_url: std::env::var("CONTRACTOR_PUBLIC_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_default(),
            auth_token: std::env::var("CONTRACTOR_AUTH_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
        }
    }

    /// Public download URL for a stored contract file.
    pub fn download_url(&self, file: &str) -> String {
        format!("{}/contracts/{}", self.public_base_url, file)
    }
}

/// Application state shared across handlers.
pub struct AppState<S: CounterStore, B: BlobStore, V: DocumentConverter> {
    pub issuer: NumberIssuer<S>,
    pub blobs: Arc<B>,
    pub conversions: ConversionDispatcher<B, V>,
    pub template: Template,
    pub issued: IssuedContracts,
    pub metrics: Arc<MetricsRegistry>,
    pub config: ApiConfig,
}

impl<S, B, V> AppState<S, B, V>
where
    S: CounterStore,
    B: BlobStore + 'static,
    V: DocumentConverter + 'static,
{
    pub fn new(
        issuer: NumberIssuer<S>,
        blobs: Arc<B>,
        conversions: ConversionDispatcher<B, V>,
        template: Template,
        config: ApiConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            issuer,
            blobs,
            conversions,
            template,
            issued: IssuedContracts::default(),
            metrics,
            config,
        }
    }

    /// Rejects the request unless it carries the configured token.
    pub(crate) fn check_auth(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let Some(expected) = &self.config.auth_token else {
            return Ok(());
        };
        let provided = headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok());
        if provided == Some(expected.as_str()) {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }

    /// Counts the error by code and passes it through.
    pub(crate) fn track<T>(&self, result: Result<T, ApiError>) -> Result<T, ApiError> {
        if let Err(e) = &result {
            self.metrics.api.record_error(e.code());
        }
        result
    }
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden,
    NotFound(String),
    PayloadTooLarge { size: usize, limit: usize },
    UnsupportedMediaType(String),
    Document(DocumentError),
    Allocation(AllocationError),
    Storage(StorageError),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Forbidden => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            ApiError::UnsupportedMediaType(_) => "UNSUPPORTED_MEDIA_TYPE",
            ApiError::Document(DocumentError::Validation { .. }) => "VALIDATION_ERROR",
            ApiError::Document(DocumentError::Template(_)) => "TEMPLATE_ERROR",
            ApiError::Allocation(AllocationError::PersistenceUnavailable(_)) => {
                "PERSISTENCE_UNAVAILABLE"
            }
            ApiError::Allocation(AllocationError::CounterExhausted(_)) => "COUNTER_EXHAUSTED",
            ApiError::Allocation(_) => "CONFIGURATION_ERROR",
            ApiError::Storage(StorageError::InvalidKey(_)) => "INVALID_KEY",
            ApiError::Storage(_) => "STORAGE_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_)
            | ApiError::Document(DocumentError::Validation { .. })
            | ApiError::Storage(StorageError::InvalidKey(_)) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Allocation(AllocationError::PersistenceUnavailable(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Document(_) | ApiError::Allocation(_) | ApiError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::UnsupportedMediaType(msg) => msg.clone(),
            ApiError::Forbidden => "Invalid or missing X-Auth-Token".into(),
            ApiError::PayloadTooLarge { size, limit } => {
                format!("Upload of {} bytes exceeds the {} byte limit", size, limit)
            }
            ApiError::Document(e) => e.to_string(),
            ApiError::Allocation(e) => e.to_string(),
            ApiError::Storage(e) => e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self.message(), "Request failed");
        }
        let body = ErrorResponse {
            error: self.message(),
            code: self.code().into(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<DocumentError> for ApiError {
    fn from(e: DocumentError) -> Self {
        ApiError::Document(e)
    }
}

impl From<AllocationError> for ApiError {
    fn from(e: AllocationError) -> Self {
        ApiError::Allocation(e)
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        ApiError::Storage(e)
    }
}

/// Response for contract generation.
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub success: bool,
    pub contract_number: String,
    pub filename: String,
    pub contract_url: String,
    pub pdf_url: Option<String>,
    /// Number came from the fallback counter store and may be a duplicate.
    pub degraded: bool,
    /// Returned from the duplicate-client cache.
    pub cached: bool,
}

impl GenerateResponse {
    fn from_issued(contract: IssuedContract, cached: bool) -> Self {
        Self {
            success: true,
            contract_number: contract.contract_number,
            filename: contract.filename,
            contract_url: contract.contract_url,
            pdf_url: contract.pdf_url,
            degraded: contract.degraded,
            cached,
        }
    }
}

/// POST /contracts
/// Validates the request, assigns a contract number, renders and stores the
/// contract, then queues PDF conversion.
pub async fn generate_contract<S, B, V>(
    State(state): State<Arc<AppState<S, B, V>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<GenerateResponse>), ApiError>
where
    S: CounterStore + 'static,
    B: BlobStore + 'static,
    V: DocumentConverter + 'static,
{
    state.metrics.api.record_request("generate");
    let start = Instant::now();
    let result = generate_inner(&state, &headers, body).await;
    state
        .metrics
        .api
        .generate_latency_us
        .observe_duration(start.elapsed());
    state.track(result)
}

async fn generate_inner<S, B, V>(
    state: &AppState<S, B, V>,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<GenerateResponse>), ApiError>
where
    S: CounterStore + 'static,
    B: BlobStore + 'static,
    V: DocumentConverter + 'static,
{
    state.check_auth(headers)?;

    let mut request: ContractRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))?;

    if let Err(e) = request.validate() {
        state.metrics.documents.record_validation_failure();
        return Err(e.into());
    }
    request.normalize_passport();

    let fingerprint = request.fingerprint();
    // Held until the contract is remembered below
    let _client_guard = state.issued.lock(&fingerprint).await;
    if let Some(existing) = state.issued.get(&fingerprint, Utc::now()) {
        state.metrics.documents.record_cached();
        tracing::info!(
            contract_number = %existing.contract_number,
            "Returning existing contract for client"
        );
        return Ok((StatusCode::OK, Json(GenerateResponse::from_issued(existing, true))));
    }

    let (contract_number, degraded) = match request.requested_number() {
        Some(number) => (number.to_string(), false),
        None => {
            let issued = state.issuer.issue()?;
            (issued.number.display, issued.degraded)
        }
    };

    let date = contract_date(state.issuer.primary().today());
    let fields = request.template_fields(&contract_number, &date);
    let rendered = state.template.render(&fields);

    let client_name = fields
        .get("client_full_name")
        .map(String::as_str)
        .unwrap_or_default();
    let filename = contract_filename(client_name, &contract_number);
    let format = state.template.format();
    let file = format!("{}.{}", filename, format.extension());
    let body = Bytes::from(rendered);

    state
        .blobs
        .put(&format!("contracts/{}", file), body.clone(), format.content_type())
        .await?;

    let pdf_url = state
        .conversions
        .is_enabled()
        .then(|| state.config.download_url(&format!("{}.pdf", filename)));

    let contract = IssuedContract {
        contract_number: contract_number.clone(),
        filename: file.clone(),
        contract_url: state.config.download_url(&file),
        pdf_url,
        degraded,
        created_at: Utc::now(),
    };
    state.issued.insert(fingerprint, contract.clone());

    state.conversions.spawn(
        filename,
        SourceDocument {
            filename: file.clone(),
            content_type: format.content_type().to_string(),
            body,
        },
    );

    state.metrics.documents.record_generated();
    tracing::info!(
        contract_number = %contract_number,
        filename = %file,
        degraded = degraded,
        "Contract generated"
    );

    Ok((
        StatusCode::CREATED,
        Json(GenerateResponse::from_issued(contract, false)),
    ))
}

fn content_type_for(file: &str) -> &'static str {
    match file.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "pdf" => "application/pdf",
        Some(ext) if ext == "html" || ext == "htm" => "text/html; charset=utf-8",
        Some(ext) if ext == "txt" => "text/plain; charset=utf-8",
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// GET /contracts/{filename}
/// Serves a stored contract or its converted PDF.
pub async fn download_contract<S, B, V>(
    State(state): State<Arc<AppState<S, B, V>>>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    S: CounterStore + 'static,
    B: BlobStore + 'static,
    V: DocumentConverter + 'static,
{
    state.metrics.api.record_request("download");
    let result = async {
        if filename.contains('/') {
            return Err(ApiError::BadRequest(format!("Invalid file name: {}", filename)));
        }
        let key = format!("contracts/{}", filename);
        validate_blob_key(&key)?;

        let body = state
            .blobs
            .get(&key)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("File not found: {}", filename)))?;

        state.metrics.documents.record_download();
        let disposition = format!("attachment; filename=\"{}\"", filename);
        Ok::<_, ApiError>((
            [
                (header::CONTENT_TYPE, content_type_for(&filename).to_string()),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            body,
        ))
    }
    .await;
    state.track(result)
}

/// Accepted signed-copy formats: (content type, extension, magic prefix).
const SIGNED_FORMATS: [(&str, &str, &[u8]); 3] = [
    ("application/pdf", "pdf", b"%PDF"),
    ("image/jpeg", "jpg", &[0xFF, 0xD8, 0xFF]),
    ("image/png", "png", &[0x89, b'P', b'N', b'G']),
];

/// Response for signed contract uploads.
#[derive(Debug, Serialize)]
pub struct SignedUploadResponse {
    pub success: bool,
    pub contract_number: String,
    pub filename: String,
    pub location: String,
}

/// POST /contracts/{number}/signed
/// Stores a signed copy (PDF, JPEG or PNG, raw request body).
pub async fn upload_signed<S, B, V>(
    State(state): State<Arc<AppState<S, B, V>>>,
    Path(contract_number): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<SignedUploadResponse>), ApiError>
where
    S: CounterStore + 'static,
    B: BlobStore + 'static,
    V: DocumentConverter + 'static,
{
    state.metrics.api.record_request("upload_signed");
    let result = async {
        state.check_auth(&headers)?;
        validate_contract_number(&contract_number)?;

        if body.is_empty() {
            return Err(ApiError::BadRequest("Empty upload".into()));
        }
        if body.len() > MAX_SIGNED_UPLOAD_BYTES {
            return Err(ApiError::PayloadTooLarge {
                size: body.len(),
                limit: MAX_SIGNED_UPLOAD_BYTES,
            });
        }

        let declared = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_ascii_lowercase())
            .unwrap_or_default();
        let (content_type, ext, magic) = SIGNED_FORMATS
            .iter()
            .find(|(ct, _, _)| *ct == declared)
            .ok_or_else(|| {
                ApiError::UnsupportedMediaType(format!(
                    "Unsupported content type {:?}; expected application/pdf, image/jpeg or image/png",
                    declared
                ))
            })?;
        if !body.starts_with(magic) {
            return Err(ApiError::UnsupportedMediaType(format!(
                "Body is not a valid {} file",
                ext
            )));
        }

        let filename = format!(
            "signed_{}_{}.{}",
            contract_number,
            Utc::now().timestamp(),
            ext
        );
        let size = body.len();
        let location = state
            .blobs
            .put(&format!("signed-contracts/{}", filename), body, content_type)
            .await?;

        state.metrics.documents.record_signed_upload(size as u64);
        tracing::info!(
            contract_number = %contract_number,
            filename = %filename,
            bytes = size,
            "Signed contract uploaded"
        );

        Ok::<_, ApiError>((
            StatusCode::CREATED,
            Json(SignedUploadResponse {
                success: true,
                contract_number: contract_number.clone(),
                filename,
                location,
            }),
        ))
    }
    .await;
    state.track(result)
}

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy"
    }))
}

/// GET /ping
pub async fn ping() -> &'static str {
    "pong"
}

/// Response for stats endpoint.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_secs: f64,
    pub counter: CounterStats,
    pub allocations: AllocationStats,
    pub contracts: ContractStats,
    pub conversions: ConversionStats,
    pub storage: crate::contracts::BlobStoreInfo,
    pub errors_total: u64,
}

#[derive(Debug, Serialize)]
pub struct CounterStats {
    pub backend: &'static str,
    pub scope_policy: &'static str,
    pub wrap_bound: u32,
    pub fallback_configured: bool,
}

#[derive(Debug, Serialize)]
pub struct AllocationStats {
    pub total: u64,
    pub wraps: u64,
    pub failures: u64,
    pub fallback: u64,
    pub avg_latency_us: f64,
}

#[derive(Debug, Serialize)]
pub struct ContractStats {
    pub generated: u64,
    pub cached: u64,
    pub downloads: u64,
    pub signed_uploads: u64,
    pub remembered_clients: usize,
}

#[derive(Debug, Serialize)]
pub struct ConversionStats {
    pub converter: &'static str,
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub inflight: u64,
}

/// Calculates average, returning 0.0 if count is zero.
#[inline]
fn safe_avg(sum: u64, count: u64) -> f64 {
    if count > 0 {
        sum as f64 / count as f64
    } else {
        0.0
    }
}

/// GET /stats
pub async fn get_stats<S, B, V>(State(state): State<Arc<AppState<S, B, V>>>) -> impl IntoResponse
where
    S: CounterStore + 'static,
    B: BlobStore + 'static,
    V: DocumentConverter + 'static,
{
    let m = &state.metrics;
    let allocator = state.issuer.primary();
    let config = allocator.config();
    let alloc = &m.allocation;
    let docs = &m.documents;
    let conv = &m.conversion;

    Json(StatsResponse {
        uptime_secs: m.uptime_secs(),
        counter: CounterStats {
            backend: allocator.backend_name(),
            scope_policy: config.scope_policy.as_str(),
            wrap_bound: config.wrap_bound.get(),
            fallback_configured: state.issuer.has_fallback(),
        },
        allocations: AllocationStats {
            total: alloc.allocations_total.load(Ordering::Relaxed),
            wraps: alloc.wraps_total.load(Ordering::Relaxed),
            failures: alloc.failures_total.load(Ordering::Relaxed),
            fallback: alloc.fallback_allocations_total.load(Ordering::Relaxed),
            avg_latency_us: safe_avg(
                alloc.allocation_latency_us.sum(),
                alloc.allocation_latency_us.count(),
            ),
        },
        contracts: ContractStats {
            generated: docs.contracts_generated_total.load(Ordering::Relaxed),
            cached: docs.cached_responses_total.load(Ordering::Relaxed),
            downloads: docs.downloads_total.load(Ordering::Relaxed),
            signed_uploads: docs.signed_uploads_total.load(Ordering::Relaxed),
            remembered_clients: state.issued.len(),
        },
        conversions: ConversionStats {
            converter: state.conversions.converter_name(),
            started: conv.started_total.load(Ordering::Relaxed),
            succeeded: conv.succeeded_total.load(Ordering::Relaxed),
            failed: conv.failed_total.load(Ordering::Relaxed),
            inflight: conv.inflight.load(Ordering::Relaxed),
        },
        storage: state.blobs.storage_info(),
        errors_total: m.api.errors_total(),
    })
}

/// GET /metrics
/// Returns metrics in Prometheus text exposition format.
pub async fn metrics<S, B, V>(State(state): State<Arc<AppState<S, B, V>>>) -> impl IntoResponse
where
    S: CounterStore + 'static,
    B: BlobStore + 'static,
    V: DocumentConverter + 'static,
{
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.format_prometheus(),
    )
}
