//! Block-polling event listener with watermark tracking and full reinitialisation.
//!
//! The listener keeps a cursor on the next block to scan. The watermark it
//! reports is the block before that cursor: the last block whose events have
//! all reached a terminal pipeline outcome. The cursor only moves forward after
//! a whole batch completes; any failure leaves it where it was, so the next
//! scan repeats the batch.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::models::event::{EventKind, LedgerEvent};
use crate::services::ledger::{Connector, Ledger, LedgerError};
use crate::services::pipeline::{JobOutcome, JobPipeline};

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub poll_interval: Duration,
    pub reconnect_cooldown: Duration,
    pub max_block_range: u64,
    /// First block to scan. `None` starts at the head seen on first connect.
    pub start_block: Option<u64>,
}

impl ListenerConfig {
    pub fn from_config(config: &crate::config::OracleConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            reconnect_cooldown: config.reconnect_cooldown(),
            max_block_range: config.max_block_range,
            start_block: config.start_block,
        }
    }
}

/// Externally observable listener state.
#[derive(Debug, Default)]
pub struct ListenerStatus {
    watermark: AtomicU64,
    initialized: AtomicBool,
    connected: AtomicBool,
    reinitializations: AtomicU64,
    events_handled: AtomicU64,
    last_poll_unix: AtomicI64,
}

impl ListenerStatus {
    /// Last fully processed block, once one exists.
    pub fn watermark(&self) -> Option<u64> {
        self.initialized
            .load(Ordering::Acquire)
            .then(|| self.watermark.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn reinitializations(&self) -> u64 {
        self.reinitializations.load(Ordering::Acquire)
    }

    pub fn events_handled(&self) -> u64 {
        self.events_handled.load(Ordering::Acquire)
    }

    pub fn last_poll(&self) -> Option<DateTime<Utc>> {
        match self.last_poll_unix.load(Ordering::Acquire) {
            0 => None,
            secs => DateTime::from_timestamp(secs, 0),
        }
    }

    fn set_watermark(&self, block: u64) {
        self.watermark.store(block, Ordering::Release);
        self.initialized.store(true, Ordering::Release);
        metrics::gauge!("oracle_watermark_block").set(block as f64);
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
        metrics::gauge!("oracle_ledger_connected").set(if connected { 1.0 } else { 0.0 });
    }

    fn record_poll(&self) {
        self.last_poll_unix
            .store(Utc::now().timestamp(), Ordering::Release);
    }
}

/// Why a connected session ended.
enum SessionEnd {
    Shutdown,
    Failed(LedgerError),
}

pub struct EventListener {
    connector: Arc<dyn Connector>,
    pipeline: JobPipeline,
    config: ListenerConfig,
    status: Arc<ListenerStatus>,
}

impl EventListener {
    pub fn new(connector: Arc<dyn Connector>, pipeline: JobPipeline, config: ListenerConfig) -> Self {
        Self {
            connector,
            pipeline,
            config,
            status: Arc::new(ListenerStatus::default()),
        }
    }

    pub fn status(&self) -> Arc<ListenerStatus> {
        Arc::clone(&self.status)
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            event = %EventKind::WorkSubmitted,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            cooldown_ms = self.config.reconnect_cooldown.as_millis() as u64,
            "Starting event listener"
        );

        let mut next = self.config.start_block;
        if let Some(block) = next.and_then(|n| n.checked_sub(1)) {
            self.status.set_watermark(block);
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            let end = match self.connect().await {
                Ok(ledger) => {
                    self.status.set_connected(true);
                    let end = self.session(ledger.as_ref(), &mut next, &mut shutdown).await;
                    // The handle is dropped here; the next iteration builds a new one.
                    drop(ledger);
                    self.status.set_connected(false);
                    end
                }
                Err(e) => SessionEnd::Failed(e),
            };

            match end {
                SessionEnd::Shutdown => break,
                SessionEnd::Failed(e) => {
                    self.status.reinitializations.fetch_add(1, Ordering::AcqRel);
                    metrics::counter!("oracle_listener_reinitializations_total").increment(1);
                    error!(
                        error = %e,
                        next_block = ?next,
                        cooldown_secs = self.config.reconnect_cooldown.as_secs_f64(),
                        "Listener failed, reinitializing"
                    );
                    if sleep_or_shutdown(self.config.reconnect_cooldown, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        info!(next_block = ?next, "Event listener stopped");
    }

    async fn connect(&self) -> Result<Arc<dyn Ledger>, LedgerError> {
        self.connector.connect().await
    }

    async fn session(
        &self,
        ledger: &dyn Ledger,
        next: &mut Option<u64>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        if next.is_none() {
            match ledger.current_block().await {
                Ok(head) => {
                    info!(block = head, "Initial watermark at chain head");
                    *next = Some(head.saturating_add(1));
                    self.status.set_watermark(head);
                }
                Err(e) => return SessionEnd::Failed(e),
            }
        }

        loop {
            let from = next.unwrap_or_default();
            match self.poll_once(ledger, from, shutdown).await {
                Ok(Some(cursor)) => {
                    if cursor != from {
                        debug!(from, watermark = cursor - 1, "Watermark advanced");
                        *next = Some(cursor);
                        self.status.set_watermark(cursor - 1);
                    }
                }
                Ok(None) => return SessionEnd::Shutdown,
                Err(e) => return SessionEnd::Failed(e),
            }

            if sleep_or_shutdown(self.config.poll_interval, shutdown).await {
                return SessionEnd::Shutdown;
            }
        }
    }

    /// Scan `[from, head]` (bounded by `max_block_range`) and handle every event.
    ///
    /// Returns the next block to scan, or `None` if shutdown was requested mid-batch.
    async fn poll_once(
        &self,
        ledger: &dyn Ledger,
        from: u64,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<Option<u64>, LedgerError> {
        let head = ledger.current_block().await?;
        self.status.record_poll();
        if head < from {
            return Ok(Some(from));
        }

        let span = self.config.max_block_range.max(1) - 1;
        let to = head.min(from.saturating_add(span));
        let mut events = ledger
            .poll_events(EventKind::WorkSubmitted, from, to)
            .await?;
        events.sort_by_key(LedgerEvent::position);

        if !events.is_empty() {
            info!(from, to, count = events.len(), "New events");
        }

        for event in &events {
            if *shutdown.borrow() {
                warn!(from, to, "Shutdown during batch, watermark not advanced");
                return Ok(None);
            }

            match event {
                LedgerEvent::WorkSubmitted(work) => {
                    let outcome = self.pipeline.handle(ledger, work).await?;
                    self.status.events_handled.fetch_add(1, Ordering::AcqRel);
                    log_outcome(&outcome);
                }
            }
        }

        Ok(Some(to.saturating_add(1)))
    }
}

fn log_outcome(outcome: &JobOutcome) {
    match outcome {
        JobOutcome::Confirmed { verdict, .. } => {
            debug!(job_id = verdict.job_id, approved = verdict.approved, "Event handled")
        }
        JobOutcome::Reverted { verdict, tx_hash, .. } => warn!(
            job_id = verdict.job_id,
            tx_hash = ?tx_hash,
            "Event handled, verdict reverted on-chain"
        ),
        JobOutcome::AlreadyAdjudicated { job_id, status } => {
            debug!(job_id, status = %status, "Event handled, job already adjudicated")
        }
    }
}

/// Sleep for `duration`; returns `true` if shutdown was requested meanwhile.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    let changed = tokio::select! {
        _ = tokio::time::sleep(duration) => return false,
        changed = shutdown.changed() => changed,
    };
    changed.is_err() || *shutdown.borrow()
}
