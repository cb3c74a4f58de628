//! Axum router configuration

use crate::{rest::handlers, AppState};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::{sync::Arc, time::Duration};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.validator.body_limit()).unwrap_or(usize::MAX);
    let state = Arc::new(state);

    // Upload routes carry their own body limit in place of axum's 2MB default
    let api_v1 = Router::new()
        .route("/optimize", post(handlers::optimize))
        .layer(DefaultBodyLimit::max(body_limit));

    // Operational routes
    let ops_routes = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/metrics/prometheus", get(handlers::prometheus_metrics));

    Router::new()
        .nest("/api/v1", api_v1)
        .merge(ops_routes)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Configure CORS layer
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(
            std::env::var("REDRAFT_CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".to_string())
                .parse::<HeaderValue>()
                .unwrap_or(HeaderValue::from_static("*")),
        )
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600))
}
