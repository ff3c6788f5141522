//! Route configuration.

use crate::handlers;
use crate::identity::identity_middleware;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Health check (intentionally unauthenticated for load balancers/k8s probes)
        .route("/v1/health", get(handlers::health_check))
        // Encounter ingestion
        .route("/v1/encounters", post(handlers::submit_encounter))
        .route("/v1/encounters/{tracking_id}", get(handlers::get_encounter));

    let mut router = Router::new().merge(api_routes);

    // Conditionally add metrics endpoint based on config.
    // When enabled, this endpoint must be network-restricted to the scraper.
    if state.config.server.metrics_enabled {
        let metrics_routes = Router::new().route("/metrics", get(metrics_handler));
        router = router.merge(metrics_routes);
    }

    // Order of execution: TraceLayer -> Identity -> Handler
    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            identity_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
