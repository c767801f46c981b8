//! REST API endpoints for airq-service.
//!
//! # Routes
//!
//! - `POST /api/data` - Submit one reading
//! - `GET /latest` - Most recent record, optionally `?device_id=`
//! - `GET /download/csv` - Every record as a CSV attachment
//! - `GET /api/records` - Newest records, `?device_id=&limit=`
//! - `GET /api/status` - Pipeline status and counters
//! - `GET /health`, `GET /api/health` - Liveness check
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`], including
//! bodies the JSON extractor refuses. Rejected readings return 422. A full
//! ingestion buffer or a failing store returns 503 so devices back off and
//! resend.
//!
//! # Example
//!
//! ```ignore
//! use airq_service::api;
//!
//! let app = api::router().with_state(state);
//! ```

use std::sync::Arc;

use airq_store::RetentionPolicy;
use airq_types::{Reading, Record, ThresholdConfig};
use axum::{
    Json, Router,
    extract::{Query, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use crate::ingest::{IngestError, IngestStatus};
use crate::state::AppState;

/// File name offered for the CSV export.
pub const CSV_FILE_NAME: &str = "air_quality_data.csv";

/// Default number of records returned by `/api/records`.
pub const DEFAULT_RECORDS_LIMIT: usize = 100;
/// Upper bound for `limit` on `/api/records`.
pub const MAX_RECORDS_LIMIT: usize = 10_000;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        .route("/api/data", post(receive_data))
        .route("/api/records", get(get_records))
        .route("/latest", get(get_latest))
        .route("/download/csv", get(download_csv))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "running",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Service status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Service version.
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub uptime_seconds: u64,
    /// Backend, pending count and counters.
    pub ingest: IngestStatus,
    pub thresholds: ThresholdConfig,
    pub retention: RetentionPolicy,
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
        uptime_seconds: state.uptime_seconds(),
        ingest: state.ingestor.status().await,
        thresholds: state.config.thresholds.clone(),
        retention: state.config.retention,
    })
}

/// Acknowledgement for a submitted reading.
#[derive(Debug, Serialize)]
pub struct DataResponse {
    pub status: &'static str,
}

/// Accept one reading from a device.
///
/// A body that does not deserialize into a [`Reading`] is rejected by the
/// extractor with 422 as well.
async fn receive_data(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Reading>, JsonRejection>,
) -> Result<Json<DataResponse>, AppError> {
    let Json(reading) = payload?;
    let device_id = reading.device_id.clone();
    let outcome = state.ingestor.accept(reading).await?;
    debug!("Accepted reading from {}: {:?}", device_id, outcome);
    Ok(Json(DataResponse { status: "ok" }))
}

/// Query parameters for `/latest`.
#[derive(Debug, Deserialize, Default)]
pub struct LatestQuery {
    pub device_id: Option<String>,
}

/// Returned by `/latest` when nothing has been recorded yet.
#[derive(Debug, Serialize)]
pub struct NoDataResponse {
    pub message: &'static str,
}

async fn get_latest(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LatestQuery>,
) -> Result<Response, AppError> {
    let device_id = query.device_id.as_deref().filter(|id| !id.is_empty());
    match state.ingestor.latest(device_id).await? {
        Some(latest) => Ok(Json(latest.record).into_response()),
        None => Ok(Json(NoDataResponse {
            message: "No data yet",
        })
        .into_response()),
    }
}

/// Export every record, stored and pending, as CSV.
async fn download_csv(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let records = state.ingestor.download_all().await?;
    let body = airq_store::codec::to_csv(&records)
        .map_err(|e| AppError::Internal(format!("Failed to encode CSV: {}", e)))?;

    let disposition = format!("attachment; filename=\"{}\"", CSV_FILE_NAME);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

/// Query parameters for `/api/records`.
#[derive(Debug, Deserialize, Default)]
pub struct RecordsQuery {
    pub device_id: Option<String>,
    pub limit: Option<usize>,
}

impl RecordsQuery {
    /// Validate the query parameters and resolve the effective limit.
    pub fn validate(&self) -> Result<usize, AppError> {
        match self.limit {
            None => Ok(DEFAULT_RECORDS_LIMIT),
            Some(0) => Err(AppError::BadRequest(
                "Invalid limit: must be at least 1".to_string(),
            )),
            Some(limit) if limit > MAX_RECORDS_LIMIT => Err(AppError::BadRequest(format!(
                "Invalid limit: {} exceeds maximum of {}",
                limit, MAX_RECORDS_LIMIT
            ))),
            Some(limit) => Ok(limit),
        }
    }
}

/// Newest records first, across the buffer and the store.
async fn get_records(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecordsQuery>,
) -> Result<Json<Vec<Record>>, AppError> {
    let limit = query.validate()?;
    let device_id = query.device_id.as_deref().filter(|id| !id.is_empty());
    let records = state.ingestor.recent(device_id, limit).await?;
    Ok(Json(records))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    /// The reading was well-formed JSON but failed validation.
    Unprocessable(String),
    /// The service cannot take the request right now.
    Unavailable(String),
    /// The request body could not be extracted; keeps the extractor's status.
    Rejected(StatusCode, String),
    Store(airq_store::Error),
    Internal(String),
}

impl From<airq_store::Error> for AppError {
    fn from(e: airq_store::Error) -> Self {
        AppError::Store(e)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<IngestError> for AppError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Validation(e) => AppError::Unprocessable(e.to_string()),
            IngestError::BufferFull { .. } => AppError::Unavailable(e.to_string()),
            IngestError::Store(e) => AppError::Store(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Rejected(status, msg) => (status, msg),
            AppError::Store(e @ airq_store::Error::MalformedRecord { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            AppError::Store(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
