// Request handlers for the /api surface

use super::response::ApiError;
use super::stream::{ChannelSink, SseFrame, STREAM_BUFFER};
use super::AppState;
use crate::enrich::{self, BatchCollector, BatchStatus, EnrichRequest};
use crate::error::IpScopeError;
use crate::lookup::AccountInfo;
use crate::storage::HostRecord;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Header carrying the lookup credential
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Deserialize)]
pub struct ValidateKeyBody {
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IpsBody {
    #[serde(default)]
    pub ips: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteBody {
    #[serde(default)]
    pub ids: Vec<i64>,
}

/// Key sent in the `X-API-Key` header, if any
fn header_credential(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
}

/// Read the address list from a JSON body (`ips`, whitespace separated) or a
/// multipart upload (`file`, one address per line)
async fn read_ip_input(state: &AppState, request: Request) -> Result<Vec<String>, ApiError> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false);

    if !is_multipart {
        let Json(body) = Json::<IpsBody>::from_request(request, state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        return Ok(enrich::split_whitespace(&body.ips.unwrap_or_default()));
    }

    let mut multipart = Multipart::from_request(request, state)
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?;

    let mut tokens = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let text = field
            .text()
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        match name.as_str() {
            "file" => tokens.extend(enrich::split_lines(&text)),
            "ips" => tokens.extend(enrich::split_whitespace(&text)),
            _ => tracing::debug!("Ignoring multipart field '{}'", name),
        }
    }

    Ok(tokens)
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Response {
    match state.database.with_blocking(|db| db.ping()).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "healthy", "database": "connected" })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy", "database": "disconnected" })),
            )
                .into_response()
        }
    }
}

/// POST /api/validate-api-key
pub async fn validate_api_key(
    State(state): State<AppState>,
    body: Result<Json<ValidateKeyBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let api_key = body
        .ok()
        .and_then(|Json(body)| body.api_key)
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .ok_or_else(|| ApiError::bad_request("API key is required"))?;

    let is_valid = state.enricher.lookup().validate_credential(&api_key).await;
    Ok(Json(json!({ "is_valid": is_valid })))
}

/// GET /api/api-info
pub async fn api_info(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AccountInfo>, ApiError> {
    let api_key = header_credential(&headers)
        .map(str::to_string)
        .or_else(|| state.default_api_key.clone())
        .ok_or_else(|| ApiError::bad_request("API key is required"))?;

    let info = state
        .enricher
        .lookup()
        .fetch_account_info(&api_key)
        .await
        .map_err(IpScopeError::from)?;
    Ok(Json(info))
}

/// GET /api/ips
pub async fn list_ips(State(state): State<AppState>) -> Result<Json<Vec<HostRecord>>, ApiError> {
    let hosts = state
        .database
        .with_blocking(|db| db.session()?.list_all())
        .await?;
    Ok(Json(hosts))
}

/// GET /api/ips/{id}
pub async fn get_ip(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<HostRecord>, ApiError> {
    let host = state
        .database
        .with_blocking(move |db| db.session()?.get(id))
        .await?;
    Ok(Json(host))
}

/// POST /api/ips: buffered enrichment
pub async fn enrich_ips(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
) -> Result<Response, ApiError> {
    let credential = state.enricher.authorize(header_credential(&headers)).await?;
    let tokens = read_ip_input(&state, request).await?;
    let prepared = EnrichRequest::new(credential, tokens)?;

    let mut collector = BatchCollector::new();
    state.enricher.run(prepared, &mut collector).await?;
    let outcome = collector.into_outcome();

    Ok(match outcome.status() {
        BatchStatus::Complete => (StatusCode::CREATED, Json(outcome.enriched_ips)).into_response(),
        BatchStatus::Partial => (StatusCode::MULTI_STATUS, Json(outcome)).into_response(),
    })
}

/// POST /api/ips/stream: incremental enrichment as server-sent events
pub async fn enrich_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
) -> Result<Sse<ReceiverStream<SseFrame>>, ApiError> {
    let credential = state.enricher.authorize(header_credential(&headers)).await?;
    let tokens = read_ip_input(&state, request).await?;
    let prepared = EnrichRequest::new(credential, tokens)?;

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let enricher = state.enricher.clone();
    tokio::spawn(async move {
        let mut sink = ChannelSink::new(tx);
        match enricher.run(prepared, &mut sink).await {
            Ok(()) => {}
            Err(IpScopeError::StreamClosed) => {
                tracing::info!("Stream consumer disconnected, enrichment stopped")
            }
            Err(e) => {
                tracing::error!("Streaming enrichment failed: {}", e);
                sink.fail("Enrichment stopped due to an internal error").await;
            }
        }
    });

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}

/// DELETE /api/ips/{id}
pub async fn delete_ip(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    state
        .database
        .with_blocking(move |db| db.session()?.delete(id))
        .await?;
    tracing::info!("Deleted record {}", id);
    Ok(Json(json!({ "message": "IP address deleted successfully" })))
}

/// POST /api/ips/bulk-delete
pub async fn bulk_delete(
    State(state): State<AppState>,
    body: Result<Json<BulkDeleteBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let ids = body.map(|Json(body)| body.ids).unwrap_or_default();
    if ids.is_empty() {
        return Err(ApiError::bad_request("No IDs provided"));
    }

    let count = ids.len();
    let deleted = state
        .database
        .with_blocking(move |db| db.session()?.bulk_delete(&ids))
        .await
        .map_err(|e| {
            tracing::error!("Bulk delete of {} id(s) failed: {}", count, e);
            ApiError::internal("An error occurred while deleting IP addresses")
        })?;

    tracing::info!("Bulk deleted {} record(s)", deleted);
    Ok(Json(json!({
        "message": format!("Successfully deleted {} IP address(es)", deleted),
        "deleted_count": deleted,
    })))
}
