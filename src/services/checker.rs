use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::models::verification::{CheckReport, Rejection};

/// File name of the machine-readable report inside the artifact directory.
pub const REPORT_FILE: &str = "coverage.json";

/// Quality gate run against a downloaded artifact.
///
/// Every expected failure mode is reported as a rejection inside
/// `CheckReport`. `Err` is reserved for faults in the checker itself; the
/// pipeline treats those as rejections too.
#[async_trait]
pub trait AcceptanceChecker: Send + Sync {
    async fn check(&self, artifact_dir: &Path) -> Result<CheckReport, CheckerError>;
}

/// Runs a pytest-cov compatible command and gates on total line coverage.
pub struct CoverageChecker {
    program: String,
    leading_args: Vec<String>,
    threshold: f64,
    timeout: Duration,
}

impl CoverageChecker {
    pub fn new(program: impl Into<String>, threshold: f64, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            threshold,
            timeout,
        }
    }

    /// Arguments placed before the coverage flags, e.g. `["-m", "pytest"]`.
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

#[async_trait]
impl AcceptanceChecker for CoverageChecker {
    async fn check(&self, artifact_dir: &Path) -> Result<CheckReport, CheckerError> {
        let report_path = report_path(artifact_dir);

        // A report shipped inside the submission must not count as a measurement.
        match tokio::fs::remove_file(&report_path).await {
            Ok(()) => warn!(path = %report_path.display(), "Removed pre-existing coverage report"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(CheckerError::Io(e)),
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .arg("--cov=.")
            .arg(format!("--cov-report=json:{}", report_path.display()))
            .arg(artifact_dir)
            .current_dir(artifact_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(program = %self.program, dir = %artifact_dir.display(), "Running acceptance tool");

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Acceptance tool timed out");
                return Ok(CheckReport::rejected(Rejection::TimedOut));
            }
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
                warn!(program = %self.program, "Acceptance tool not found");
                return Ok(CheckReport::rejected(Rejection::ToolMissing));
            }
            Ok(Err(e)) => return Err(CheckerError::Spawn(e)),
            Ok(Ok(output)) => output,
        };

        debug!(
            stdout = %tail(&output.stdout),
            stderr = %tail(&output.stderr),
            "Acceptance tool output"
        );

        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "Acceptance tool failed");
            return Ok(CheckReport::rejected(Rejection::ToolFailed {
                exit_code: output.status.code(),
            }));
        }

        let report = evaluate_report(&report_path, self.threshold).await;
        info!(
            passed = report.passed(),
            score = ?report.score,
            threshold = self.threshold,
            "Coverage evaluated"
        );
        Ok(report)
    }
}

/// Gate a coverage report on `totals.percent_covered >= threshold`.
pub async fn evaluate_report(path: &Path, threshold: f64) -> CheckReport {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(_) => return CheckReport::rejected(Rejection::ReportMissing),
    };
    evaluate_report_bytes(&raw, threshold)
}

pub fn evaluate_report_bytes(raw: &[u8], threshold: f64) -> CheckReport {
    let value: serde_json::Value = match serde_json::from_slice(raw) {
        Ok(v) => v,
        Err(_) => return CheckReport::rejected(Rejection::ReportUnparsable),
    };

    let Some(percent) = value
        .get("totals")
        .and_then(|t| t.get("percent_covered"))
        .and_then(|p| p.as_f64())
    else {
        return CheckReport::rejected(Rejection::SummaryMissing);
    };

    if percent >= threshold {
        CheckReport::approved(percent)
    } else {
        CheckReport {
            score: Some(percent),
            rejection: Some(Rejection::BelowThreshold { threshold }),
        }
    }
}

fn tail(bytes: &[u8]) -> String {
    const LIMIT: usize = 2_000;
    let text = String::from_utf8_lossy(bytes);
    let start = text.len().saturating_sub(LIMIT);
    let start = (start..text.len())
        .find(|i| text.is_char_boundary(*i))
        .unwrap_or(text.len());
    text[start..].to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum CheckerError {
    #[error("Failed to start acceptance tool: {0}")]
    Spawn(std::io::Error),

    #[error("Artifact directory I/O error: {0}")]
    Io(std::io::Error),

    #[error("Checker task aborted: {0}")]
    Aborted(String),
}

/// Report path inside an artifact directory.
pub fn report_path(artifact_dir: &Path) -> PathBuf {
    artifact_dir.join(REPORT_FILE)
}
