use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};

use super::handlers::{
    backfill, beacon, get_multi, get_object, health_check, home, post_multi, AppState,
};

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

    Router::new()
        .route("/", get(home))
        .route("/health", get(health_check))
        .route("/beacon.png", get(beacon))
        .route("/api/_multi", get(get_multi).post(post_multi))
        .route("/api/{*object_id}", get(get_object).post(backfill))
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}
