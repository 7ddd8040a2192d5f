use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use ethers::types::Address;

use crate::app_state::AppState;
use crate::models::verification::JobResponse;

/// GET /api/v1/jobs/{job_id}: current on-chain record of one job.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<u64>,
) -> Result<Json<JobResponse>, StatusCode> {
    let job = state
        .ledger
        .with(|ledger| async move { ledger.read_job(job_id).await })
        .await
        .map_err(|e| {
            tracing::warn!(job_id, error = %e, "Job lookup failed");
            if e.is_connectivity() {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::BAD_GATEWAY
            }
        })?;

    // Unset mapping slots read back as all-zero records.
    if job.client == Address::zero() {
        return Err(StatusCode::NOT_FOUND);
    }

    Ok(Json(JobResponse::from(job)))
}
