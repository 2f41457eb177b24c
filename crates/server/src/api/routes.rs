use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{attendees, audit, handlers, middleware::metrics_middleware, scheduler, workshops};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health, config and metrics
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/metrics", get(handlers::get_metrics))
        // Audit
        .route("/audit", get(audit::query_audit))
        // Workshops
        .route(
            "/workshops",
            get(workshops::list_workshops).post(workshops::create_workshop),
        )
        .route("/workshops/{id}/status", get(workshops::get_status))
        .route("/workshops/{id}/reconcile", post(workshops::reconcile))
        .route(
            "/workshops/{id}/attendees",
            get(workshops::list_attendees).post(workshops::add_attendee),
        )
        .route("/workshops/{id}/deletion", put(workshops::schedule_deletion))
        .route("/workshops/{id}/pin", put(workshops::pin_status))
        // Attendees
        .route("/attendees/{id}/status", get(attendees::get_status))
        .route("/attendees/{id}/deployments", get(attendees::list_deployments))
        .route("/attendees/{id}/provision", post(attendees::provision))
        .route("/attendees/{id}/teardown", post(attendees::teardown))
        // Scheduler
        .route("/scheduler/status", get(scheduler::get_status))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
