use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Why an acceptance check did not approve a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Display)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum Rejection {
    #[strum(to_string = "acceptance tool not installed")]
    ToolMissing,
    #[strum(to_string = "acceptance tool exited with failure")]
    ToolFailed { exit_code: Option<i32> },
    #[strum(to_string = "acceptance tool timed out")]
    TimedOut,
    #[strum(to_string = "coverage report not produced")]
    ReportMissing,
    #[strum(to_string = "coverage report is not valid JSON")]
    ReportUnparsable,
    #[strum(to_string = "coverage report has no totals.percent_covered")]
    SummaryMissing,
    #[strum(to_string = "coverage below threshold")]
    BelowThreshold { threshold: f64 },
}

/// Result of one acceptance check. Approved iff there is no rejection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckReport {
    pub score: Option<f64>,
    pub rejection: Option<Rejection>,
}

impl CheckReport {
    pub fn approved(score: f64) -> Self {
        Self {
            score: Some(score),
            rejection: None,
        }
    }

    pub fn rejected(rejection: Rejection) -> Self {
        Self {
            score: None,
            rejection: Some(rejection),
        }
    }

    pub fn passed(&self) -> bool {
        self.rejection.is_none()
    }

    pub fn detail(&self) -> String {
        match (&self.rejection, self.score) {
            (None, Some(score)) => format!("coverage {:.2}%", score),
            (None, None) => "passed".to_string(),
            (Some(rejection), Some(score)) => format!("{} ({:.2}%)", rejection, score),
            (Some(rejection), None) => rejection.to_string(),
        }
    }
}

/// Transient verdict for one job, encoded into a single `verifyWork` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationOutcome {
    pub job_id: u64,
    pub approved: bool,
    pub reason: String,
}

/// Request to assess a job description before it is posted.
#[derive(Debug, Deserialize, Validate)]
pub struct FeasibilityRequest {
    #[garde(length(min = 1, max = 200))]
    pub title: String,

    /// Inline description text.
    #[garde(length(min = 1, max = 20_000))]
    pub description: Option<String>,

    /// Content hash of a stored description document.
    #[garde(length(min = 1, max = 128))]
    pub description_hash: Option<String>,
}

/// Advisory model's assessment of a job description.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FeasibilityAssessment {
    #[garde(skip)]
    pub feasible: bool,

    #[garde(length(min = 1, max = 100))]
    pub category: String,

    #[garde(length(max = 100))]
    #[serde(default)]
    pub estimated_effort: String,

    #[garde(length(min = 1, max = 4_000))]
    pub rationale: String,
}

/// Job record as served by the API.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: u64,
    pub client: String,
    pub freelancer: String,
    pub title: String,
    pub description_hash: String,
    pub price: String,
    pub deadline: Option<String>,
    pub result_hash: String,
    pub status: String,
    pub dispute_reason: Option<String>,
}

impl From<crate::models::job::JobSnapshot> for JobResponse {
    fn from(job: crate::models::job::JobSnapshot) -> Self {
        Self {
            job_id: job.job_id,
            client: format!("{:?}", job.client),
            freelancer: format!("{:?}", job.freelancer),
            deadline: job.deadline_at().map(|d| d.to_rfc3339()),
            price: job.price.to_string(),
            title: job.title,
            description_hash: job.description_hash,
            result_hash: job.result_hash,
            status: job.status.to_string(),
            dispute_reason: Some(job.dispute_reason).filter(|r| !r.is_empty()),
        }
    }
}
