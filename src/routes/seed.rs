use crate::database::repository::Repository;
use crate::error::app_error::AppError;
use crate::middleware::rate_limit::AuthRateLimit;
use crate::service::seed::{SeedResponse, seed_demo_data};
use rocket::serde::json::Json;
use rocket::{State, get};
use rocket_okapi::openapi;

/// Creates the demo accounts. Only mounted when `api.enable_seed` is set.
#[openapi(tag = "Development")]
#[get("/")]
pub async fn seed(repo: &State<Repository>, _rate_limit: AuthRateLimit) -> Result<Json<SeedResponse>, AppError> {
    tracing::warn!("seed endpoint invoked");
    Ok(Json(seed_demo_data(repo).await?))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![seed]
}
