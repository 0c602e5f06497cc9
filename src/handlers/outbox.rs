use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::config::OutboxSettings;
use crate::domain::outbox::{OutboxRecord, OutboxStats};
use crate::domain::ports::OutboxStore;
use crate::errors::AppError;

// ── Response DTOs ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OutboxStatsResponse {
    pub ready: i64,
    pub published: i64,
    /// Failed, still under the retry cap.
    pub failed: i64,
    /// Failed on every allowed attempt; needs manual attention.
    pub parked: i64,
    pub max_retries: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OutboxEventResponse {
    pub id: i64,
    pub event_id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: i64,
    pub event_type: String,
    pub version: i64,
    pub status: String,
    pub retry_count: i32,
    pub occurred_at: String,
    pub created_at: String,
    pub published_at: Option<String>,
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
}

impl OutboxStatsResponse {
    fn new(stats: OutboxStats, max_retries: i32) -> Self {
        Self {
            ready: stats.ready,
            published: stats.published,
            failed: stats.failed,
            parked: stats.parked,
            max_retries,
        }
    }
}

impl From<OutboxRecord> for OutboxEventResponse {
    fn from(r: OutboxRecord) -> Self {
        Self {
            id: r.id,
            event_id: r.event_id,
            aggregate_type: r.aggregate_type,
            aggregate_id: r.aggregate_id,
            event_type: r.event_type,
            version: r.version,
            status: r.status.to_string(),
            retry_count: r.retry_count,
            occurred_at: r.occurred_at.to_rfc3339(),
            created_at: r.created_at.to_rfc3339(),
            published_at: r.published_at.map(|t| t.to_rfc3339()),
            payload: r.payload,
        }
    }
}

// ── Query parameters ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ParkedParams {
    /// Maximum number of records to return. Defaults to 50, maximum 500.
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

const MAX_LIMIT: i64 = 500;

// ── Handlers ─────────────────────────────────────────────────────────────────

/// GET /outbox/stats
///
/// Counts of outbox records by state.
#[utoipa::path(
    get,
    path = "/outbox/stats",
    responses(
        (status = 200, description = "Outbox counts", body = OutboxStatsResponse),
        (status = 500, description = "Internal server error"),
    ),
    tag = "outbox"
)]
pub async fn outbox_stats(
    store: web::Data<dyn OutboxStore>,
    settings: web::Data<OutboxSettings>,
) -> Result<HttpResponse, AppError> {
    let max_retries = settings.max_retries;

    let stats = web::block(move || store.stats(max_retries))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(HttpResponse::Ok().json(OutboxStatsResponse::new(stats, max_retries)))
}

/// GET /outbox/parked
///
/// Records that exhausted their retries, oldest first.
#[utoipa::path(
    get,
    path = "/outbox/parked",
    params(ParkedParams),
    responses(
        (status = 200, description = "Parked records", body = [OutboxEventResponse]),
        (status = 400, description = "Invalid limit"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "outbox"
)]
pub async fn list_parked(
    store: web::Data<dyn OutboxStore>,
    settings: web::Data<OutboxSettings>,
    query: web::Query<ParkedParams>,
) -> Result<HttpResponse, AppError> {
    let limit = query.into_inner().limit;
    if limit < 1 {
        return Err(AppError::BadRequest("limit must be at least 1".to_string()));
    }
    let limit = limit.min(MAX_LIMIT);
    let max_retries = settings.max_retries;

    let records = web::block(move || store.list_parked(max_retries, limit))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    let body: Vec<OutboxEventResponse> = records.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(body))
}

/// GET /outbox/events/{event_id}
///
/// Looks up a single record by the id consumers see in the envelope.
#[utoipa::path(
    get,
    path = "/outbox/events/{event_id}",
    params(
        ("event_id" = Uuid, Path, description = "Event id carried in the envelope"),
    ),
    responses(
        (status = 200, description = "Record found", body = OutboxEventResponse),
        (status = 404, description = "No record with this event id"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "outbox"
)]
pub async fn get_event(
    store: web::Data<dyn OutboxStore>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let event_id = path.into_inner();

    let record = web::block(move || store.find_by_event_id(event_id))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    match record {
        Some(record) => Ok(HttpResponse::Ok().json(OutboxEventResponse::from(record))),
        None => Err(AppError::NotFound),
    }
}
