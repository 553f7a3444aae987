use chrono::{DateTime, Utc};
use rocket::serde::Serialize;
use schemars::JsonSchema;

#[derive(Serialize, Debug, JsonSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    /// Open websocket connections on this instance.
    pub connections: usize,
}
