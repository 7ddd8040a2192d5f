use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::verification::{FeasibilityAssessment, FeasibilityRequest};
use crate::services::advisory::AdvisoryError;
use crate::services::storage::{ArtifactStore, StorageError};

/// POST /api/v1/feasibility: advisory review of a job description.
///
/// The description is given inline or as the hash of a stored document,
/// never both.
pub async fn assess_feasibility(
    State(state): State<AppState>,
    Json(request): Json<FeasibilityRequest>,
) -> Result<Json<FeasibilityAssessment>, StatusCode> {
    request.validate().map_err(|report| {
        tracing::debug!(error = %report, "Rejected feasibility request");
        StatusCode::UNPROCESSABLE_ENTITY
    })?;

    let description = match (request.description, request.description_hash) {
        (Some(text), None) => text,
        (None, Some(hash)) => state.storage.fetch_text(&hash).await.map_err(|e| {
            tracing::warn!(hash = %hash, error = %e, "Failed to fetch description");
            storage_status(&e)
        })?,
        _ => return Err(StatusCode::UNPROCESSABLE_ENTITY),
    };

    let assessment = state
        .advisory
        .assess(&request.title, &description)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Advisory assessment failed");
            advisory_status(&e)
        })?;

    metrics::counter!(
        "oracle_feasibility_assessments_total",
        "feasible" => assessment.feasible.to_string()
    )
    .increment(1);

    Ok(Json(assessment))
}

fn storage_status(error: &StorageError) -> StatusCode {
    match error {
        StorageError::NotFound(_) => StatusCode::NOT_FOUND,
        StorageError::InvalidHash(_) | StorageError::Decode(_) | StorageError::Empty(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => StatusCode::BAD_GATEWAY,
    }
}

fn advisory_status(error: &AdvisoryError) -> StatusCode {
    match error {
        AdvisoryError::Http(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}
