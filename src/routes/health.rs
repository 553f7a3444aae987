use crate::models::health::HealthResponse;
use crate::realtime::RealtimeHub;
use chrono::Utc;
use rocket::serde::json::Json;
use rocket::{State, get};
use rocket_okapi::openapi;
use std::sync::Arc;

#[openapi(tag = "Health")]
#[get("/")]
pub async fn healthcheck(hub: &State<Arc<RealtimeHub>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
        connections: hub.connection_count().await,
    })
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![healthcheck]
}
