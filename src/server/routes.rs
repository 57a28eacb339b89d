use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::AppState;
use super::handlers;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::dashboard))
        .route("/healthz", get(handlers::health))
        .route("/api/products", get(handlers::list_products))
        .route("/api/forecasts", get(handlers::list_forecasts))
        .route("/api/recommendations/tread-pattern", get(handlers::tread_pattern_recommendations))
        .route("/api/analytics/demand-by-pattern", get(handlers::demand_by_pattern))
        .route("/api/analytics/demand-by-category", get(handlers::demand_by_category))
        .route("/api/analytics/trends/:keyword", get(handlers::trend_series))
        .route("/api/stats", get(handlers::stats))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
