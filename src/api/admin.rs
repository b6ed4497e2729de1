//! Counter inspection and seeding for operators.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::handlers::{ApiError, AppState};
use crate::contracts::{
    validate_scope_key, AllocationError, BlobStore, CounterRecord, CounterStore,
    DocumentConverter,
};

/// Response for the counter inspection endpoint.
#[derive(Debug, Serialize)]
pub struct CounterStatusResponse {
    pub backend: &'static str,
    pub scope_policy: &'static str,
    pub wrap_bound: u32,
    /// Counter the next allocation will draw from.
    pub scope_key: String,
    /// Raw value of that counter, `None` before the first allocation.
    pub value: Option<u64>,
    pub records: Vec<CounterRecord>,
}

/// GET /admin/counter
pub async fn counter_status<S, B, V>(
    State(state): State<Arc<AppState<S, B, V>>>,
    headers: HeaderMap,
) -> Result<Json<CounterStatusResponse>, ApiError>
where
    S: CounterStore + 'static,
    B: BlobStore + 'static,
    V: DocumentConverter + 'static,
{
    state.metrics.api.record_request("admin_counter");
    let result = (|| -> Result<_, ApiError> {
        state.check_auth(&headers)?;
        let allocator = state.issuer.primary();
        let config = allocator.config();
        Ok(Json(CounterStatusResponse {
            backend: allocator.backend_name(),
            scope_policy: config.scope_policy.as_str(),
            wrap_bound: config.wrap_bound.get(),
            scope_key: allocator.current_scope_key(),
            value: allocator.current_value()?,
            records: allocator.records()?,
        }))
    })();
    state.track(result)
}

#[derive(Debug, Deserialize)]
pub struct SeedRequest {
    pub value: u64,
    /// Defaults to today's scope under the configured policy.
    pub scope_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SeedResponse {
    pub scope_key: String,
    /// False when the counter already existed and was left untouched.
    pub created: bool,
    pub value: Option<u64>,
}

/// POST /admin/counter/seed
///
/// Creates a counter at the given value. Existing counters are never
/// overwritten, so seeding cannot move numbering backwards.
pub async fn seed_counter<S, B, V>(
    State(state): State<Arc<AppState<S, B, V>>>,
    headers: HeaderMap,
    Json(request): Json<SeedRequest>,
) -> Result<(StatusCode, Json<SeedResponse>), ApiError>
where
    S: CounterStore + 'static,
    B: BlobStore + 'static,
    V: DocumentConverter + 'static,
{
    state.metrics.api.record_request("admin_seed");
    let result = (|| -> Result<_, ApiError> {
        state.check_auth(&headers)?;
        let allocator = state.issuer.primary();
        let scope_key = request
            .scope_key
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| allocator.current_scope_key());
        validate_scope_key(&scope_key).map_err(|e| ApiError::BadRequest(e.to_string()))?;

        let created = allocator.seed(&scope_key, request.value).map_err(|e| match e {
            AllocationError::CounterExhausted(reason) => ApiError::BadRequest(format!(
                "Seed value {} is too large for the {} store: {}",
                request.value,
                allocator.backend_name(),
                reason
            )),
            other => ApiError::Allocation(other),
        })?;
        let value = allocator.value_of(&scope_key)?;

        let status = if created {
            StatusCode::CREATED
        } else {
            StatusCode::OK
        };
        Ok((
            status,
            Json(SeedResponse {
                scope_key,
                created,
                value,
            }),
        ))
    })();
    state.track(result)
}
