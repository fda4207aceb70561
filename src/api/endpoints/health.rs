//! Liveness endpoint.

use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct RootResponse {
    pub message: String,
    pub version: &'static str,
}

/// `GET /`: service is up.
pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: format!("{} API is running", crate::config::APP_NAME),
        version: crate::config::APP_VERSION,
    })
}
