use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::time::Instant;

use crate::app_state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Probe {
    Ok,
    Degraded,
    Error,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: Probe,
    pub version: &'static str,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub ledger: ComponentHealth,
    pub ipfs: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: Probe,
    pub latency_ms: Option<u64>,
    /// Chain head seen by the probe (ledger only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    fn from_probe<T, E: std::fmt::Display>(
        started: Instant,
        result: Result<T, E>,
        block: impl FnOnce(&T) -> Option<u64>,
    ) -> Self {
        match result {
            Ok(value) => Self {
                status: Probe::Ok,
                latency_ms: Some(started.elapsed().as_millis() as u64),
                block: block(&value),
                error: None,
            },
            Err(e) => Self {
                status: Probe::Error,
                latency_ms: None,
                block: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// GET /health: ledger and object store reachability, probed concurrently.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let started = Instant::now();
    let (head, ipfs) = tokio::join!(
        state
            .ledger
            .with(|ledger| async move { ledger.current_block().await }),
        state.storage.health_check(),
    );

    let ledger = ComponentHealth::from_probe(started, head, |block| Some(*block));
    let ipfs = ComponentHealth::from_probe(started, ipfs, |_| None);

    if let Some(e) = &ledger.error {
        tracing::warn!(error = %e, "Ledger health probe failed");
    }
    if let Some(e) = &ipfs.error {
        tracing::warn!(error = %e, "IPFS health probe failed");
    }

    let healthy = ledger.status == Probe::Ok && ipfs.status == Probe::Ok;
    let (code, status) = if healthy {
        (StatusCode::OK, Probe::Ok)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Probe::Degraded)
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            checks: HealthChecks { ledger, ipfs },
        }),
    )
}
