//! API router.
//!
//! Routes:
//! - `GET /` liveness
//! - `POST /analyze` multipart upload (`file`, optional `query`)
//! - `GET /status/:task_id` task polling
//!
//! Every response carries `Cache-Control: no-store`; task state changes
//! under the client's feet.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue};
use axum::routing::{get, post};
use axum::Router;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::api::endpoints;
use crate::api::types::ApiContext;

/// Room for multipart boundaries, headers and the query field on top of the file itself.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Build the service router.
///
/// NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
pub fn api_router(ctx: ApiContext) -> Router {
    let body_limit = ctx.documents.max_bytes().saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/", get(endpoints::health::root))
        .route("/analyze", post(endpoints::analyze::submit))
        .route("/status/:task_id", get(endpoints::status::get_status))
        .with_state(ctx)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
}
