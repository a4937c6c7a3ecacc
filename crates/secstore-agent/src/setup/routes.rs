//! Route configuration and setup

use crate::handlers;
use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use secstore_infra::request_id_middleware;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Setup all agent routes
pub fn setup_routes(state: Arc<AppState>) -> Router<()> {
    let userdata = ServeDir::new(state.config.public_download_dir());

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/upload", post(handlers::upload::upload))
        .route("/upload/status", get(handlers::status::upload_status))
        .route("/commands", post(handlers::commands::run_command))
        .nest_service("/userdata", userdata)
        // Upload size is enforced by the pipeline against the signed limit.
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_id_middleware))
        .with_state(state)
}
