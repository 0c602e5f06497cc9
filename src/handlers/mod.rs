pub mod outbox;

use actix_web::{web, HttpResponse};
use serde::Serialize;
use utoipa::{OpenApi, ToSchema};

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

/// GET /health
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
    tag = "health"
)]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(OpenApi)]
#[openapi(
    paths(health, outbox::outbox_stats, outbox::list_parked, outbox::get_event),
    components(schemas(
        HealthResponse,
        outbox::OutboxStatsResponse,
        outbox::OutboxEventResponse
    )),
    tags(
        (name = "outbox", description = "Outbox publishing state"),
        (name = "health", description = "Liveness"),
    )
)]
pub struct ApiDoc;

/// Register every route. Expects `web::Data<dyn OutboxStore>` and
/// `web::Data<OutboxSettings>` in the app data.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health)).service(
        web::scope("/outbox")
            .route("/stats", web::get().to(outbox::outbox_stats))
            .route("/parked", web::get().to(outbox::list_parked))
            .route("/events/{event_id}", web::get().to(outbox::get_event)),
    );
}
