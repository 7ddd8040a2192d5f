pub mod feasibility;
pub mod health;
pub mod jobs;
pub mod metrics;

use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

/// Application routes without the metrics endpoint or middleware layers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/jobs/{job_id}", get(jobs::get_job))
        .route("/api/v1/feasibility", post(feasibility::assess_feasibility))
        .with_state(state)
}
