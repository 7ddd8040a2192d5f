//! Per-event verification state machine.
//!
//! `Received -> Downloading -> (Downloaded -> Verifying -> Verified | VerifyFailed)
//! | DownloadFailed -> Submitting -> Done`
//!
//! Every path that reaches `Submitting` produces exactly one `verifyWork`
//! transaction. Anything ambiguous inside the pipeline (missing artifact,
//! checker crash, unreadable report) becomes a rejection. Only ledger
//! connectivity failures escape, so the listener can reconnect and rescan.

use ethers::types::H256;
use std::sync::Arc;
use std::time::Instant;
use strum::Display;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::models::event::{ContractCall, WorkSubmitted};
use crate::models::job::JobStatus;
use crate::models::verification::VerificationOutcome;
use crate::services::checker::{AcceptanceChecker, CheckerError};
use crate::services::ledger::{Ledger, LedgerError};
use crate::services::storage::ArtifactStore;

/// Pipeline states, logged as the `stage` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Received,
    Downloading,
    Downloaded,
    DownloadFailed,
    Verifying,
    Verified,
    VerifyFailed,
    Submitting,
    Done,
}

/// Terminal result of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Verdict mined successfully.
    Confirmed {
        verdict: VerificationOutcome,
        decided_at: Stage,
        tx_hash: H256,
    },
    /// Verdict mined but the contract rejected it. Not retried.
    Reverted {
        verdict: VerificationOutcome,
        decided_at: Stage,
        tx_hash: H256,
    },
    /// The job had already left `WorkSubmitted`; nothing was sent.
    AlreadyAdjudicated { job_id: u64, status: JobStatus },
}

impl JobOutcome {
    pub fn job_id(&self) -> u64 {
        match self {
            JobOutcome::Confirmed { verdict, .. } | JobOutcome::Reverted { verdict, .. } => {
                verdict.job_id
            }
            JobOutcome::AlreadyAdjudicated { job_id, .. } => *job_id,
        }
    }

    pub fn approved(&self) -> Option<bool> {
        match self {
            JobOutcome::Confirmed { verdict, .. } | JobOutcome::Reverted { verdict, .. } => {
                Some(verdict.approved)
            }
            JobOutcome::AlreadyAdjudicated { .. } => None,
        }
    }
}

pub struct JobPipeline {
    store: Arc<dyn ArtifactStore>,
    checker: Arc<dyn AcceptanceChecker>,
}

impl JobPipeline {
    pub fn new(store: Arc<dyn ArtifactStore>, checker: Arc<dyn AcceptanceChecker>) -> Self {
        Self { store, checker }
    }

    /// Run one `WorkSubmitted` event to a terminal outcome.
    ///
    /// `Err` means the verdict was not confirmed for connectivity reasons and
    /// the event must be handled again.
    pub async fn handle(
        &self,
        ledger: &dyn Ledger,
        event: &WorkSubmitted,
    ) -> Result<JobOutcome, LedgerError> {
        let span = tracing::info_span!(
            "job",
            job_id = event.job_id,
            result_hash = %event.result_hash,
            run_id = %Uuid::new_v4(),
        );
        self.run(ledger, event).instrument(span).await
    }

    async fn run(&self, ledger: &dyn Ledger, event: &WorkSubmitted) -> Result<JobOutcome, LedgerError> {
        let start = Instant::now();
        metrics::counter!("oracle_jobs_received_total").increment(1);
        info!(
            stage = %Stage::Received,
            freelancer = ?event.freelancer,
            block = event.block_number,
            "Processing submitted work"
        );

        match ledger.read_job(event.job_id).await {
            Ok(job) if job.status.is_adjudicated() => {
                info!(status = %job.status, "Job already adjudicated, skipping");
                metrics::counter!("oracle_jobs_skipped_total").increment(1);
                return Ok(JobOutcome::AlreadyAdjudicated {
                    job_id: event.job_id,
                    status: job.status,
                });
            }
            Ok(job) if job.result_hash != event.result_hash => {
                warn!(
                    current_hash = %job.result_hash,
                    "Event hash differs from the job's current result hash"
                );
            }
            Ok(_) => {}
            Err(e) if e.is_connectivity() => return Err(e),
            // The contract stays the arbiter; an unreadable record only loses the duplicate check.
            Err(e) => warn!(error = %e, "Could not read job record, verifying anyway"),
        }

        let (verdict, decided_at) = self.decide(event).await;

        info!(
            stage = %Stage::Submitting,
            approved = verdict.approved,
            reason = %verdict.reason,
            "Submitting verdict"
        );
        let receipt = ledger
            .submit(ContractCall::VerifyWork {
                job_id: event.job_id,
                approved: verdict.approved,
            })
            .await?;

        metrics::histogram!("oracle_job_processing_seconds").record(start.elapsed().as_secs_f64());

        if receipt.success {
            info!(
                stage = %Stage::Done,
                tx_hash = ?receipt.tx_hash,
                block = ?receipt.block_number,
                approved = verdict.approved,
                "Verdict confirmed"
            );
            let label = if verdict.approved { "approved" } else { "rejected" };
            metrics::counter!("oracle_verdicts_total", "verdict" => label).increment(1);
            Ok(JobOutcome::Confirmed {
                verdict,
                decided_at,
                tx_hash: receipt.tx_hash,
            })
        } else {
            error!(
                stage = %Stage::Done,
                tx_hash = ?receipt.tx_hash,
                approved = verdict.approved,
                "Verdict transaction reverted"
            );
            metrics::counter!("oracle_tx_reverted_total").increment(1);
            Ok(JobOutcome::Reverted {
                verdict,
                decided_at,
                tx_hash: receipt.tx_hash,
            })
        }
    }

    /// Download and check. Never fails: every problem becomes a rejection.
    async fn decide(&self, event: &WorkSubmitted) -> (VerificationOutcome, Stage) {
        let reject = |reason: String| VerificationOutcome {
            job_id: event.job_id,
            approved: false,
            reason,
        };

        info!(stage = %Stage::Downloading, "Fetching artifact");
        let artifact = match self.store.fetch(&event.result_hash).await {
            Ok(artifact) if !artifact.is_empty() => artifact,
            Ok(_) => {
                warn!(stage = %Stage::DownloadFailed, "Artifact is empty");
                metrics::counter!("oracle_download_failures_total").increment(1);
                return (reject("artifact is empty".into()), Stage::DownloadFailed);
            }
            Err(e) => {
                warn!(stage = %Stage::DownloadFailed, error = %e, "Artifact download failed");
                metrics::counter!("oracle_download_failures_total").increment(1);
                return (reject(format!("artifact not delivered: {}", e)), Stage::DownloadFailed);
            }
        };
        info!(stage = %Stage::Downloaded, bytes = artifact.len(), "Artifact ready");

        info!(stage = %Stage::Verifying, "Running acceptance check");
        let checker = Arc::clone(&self.checker);
        let dir = artifact.dir().to_path_buf();
        // Separate task so a panicking checker surfaces as a JoinError.
        let checked = tokio::spawn(async move { checker.check(&dir).await })
            .await
            .unwrap_or_else(|join| Err(CheckerError::Aborted(join.to_string())));

        let path = artifact.dir().to_path_buf();
        if let Err(e) = artifact.close() {
            warn!(path = %path.display(), error = %e, "Failed to remove scratch artifact");
        }

        match checked {
            Ok(report) => {
                info!(
                    stage = %Stage::Verified,
                    passed = report.passed(),
                    detail = %report.detail(),
                    "Acceptance check finished"
                );
                let outcome = VerificationOutcome {
                    job_id: event.job_id,
                    approved: report.passed(),
                    reason: report.detail(),
                };
                (outcome, Stage::Verified)
            }
            Err(e) => {
                error!(stage = %Stage::VerifyFailed, error = %e, "Acceptance check crashed");
                metrics::counter!("oracle_checker_faults_total").increment(1);
                (reject(format!("acceptance check fault: {}", e)), Stage::VerifyFailed)
            }
        }
    }
}
