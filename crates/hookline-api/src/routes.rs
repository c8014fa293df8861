//! API routes

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::{auth_middleware, AppState};
use crate::handlers::{campaigns, health, tracking};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    // Health check routes (no auth required)
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness))
        .with_state(state.clone());

    // Tracking callbacks (no auth, identified by rId)
    let tracking_routes = Router::new()
        .route("/:campaign_id/open", get(tracking::open))
        .route("/:campaign_id/click", get(tracking::click))
        .route("/:campaign_id/submit", post(tracking::submit))
        .route("/:campaign_id/report", post(tracking::report))
        .with_state(state.clone());

    // Campaign routes
    let campaign_routes = Router::new()
        .route(
            "/",
            get(campaigns::list_campaigns).post(campaigns::launch_campaign),
        )
        .route(
            "/:campaign_id",
            get(campaigns::get_campaign).delete(campaigns::delete_campaign),
        )
        .route("/:campaign_id/stats", get(campaigns::get_campaign_stats))
        .route("/:campaign_id/results", get(campaigns::get_campaign_results))
        .route("/:campaign_id/timeline", get(campaigns::get_campaign_timeline))
        .route("/:campaign_id/cancel", post(campaigns::cancel_campaign));

    // API v1 routes with authentication
    let api_v1 = Router::new()
        .nest("/owners/:owner_id/campaigns", campaign_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state);

    Router::new()
        .nest("/health", health_routes)
        .nest("/t", tracking_routes)
        .nest("/api/v1", api_v1)
        .layer(TraceLayer::new_for_http())
}
