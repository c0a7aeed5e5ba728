pub mod params;
pub mod routes;

mod cors;
pub(crate) mod observability;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::AppState;

pub fn router(state: AppState) -> Router {
    let metrics = Arc::clone(state.metrics());
    let allow_origin = state.cors_allow_origin().clone();
    let max_request_bytes = state.max_request_bytes();

    Router::new()
        .route("/record", post(routes::record))
        .route("/play", post(routes::play))
        .route("/upload", post(routes::upload))
        .route("/edit", delete(routes::edit))
        .route("/status", get(routes::status))
        .route("/playlist", get(routes::playlist))
        .route("/space", get(routes::space))
        .route("/healthz", get(routes::healthz))
        .route("/metrics", get(routes::metrics))
        .fallback(routes::not_found)
        // Applied after the fallback so unmatched paths are traced and counted too.
        .layer(middleware::from_fn_with_state(
            metrics,
            observability::middleware,
        ))
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .layer(middleware::from_fn_with_state(allow_origin, cors::middleware))
        .with_state(state)
}
