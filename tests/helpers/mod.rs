//! In-memory collaborators for pipeline and listener tests

#![allow(dead_code)]

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use escrow_oracle::models::event::{ContractCall, EventKind, LedgerEvent, TxReceipt, WorkSubmitted};
use escrow_oracle::models::job::{JobSnapshot, JobStatus};
use escrow_oracle::models::verification::{CheckReport, Rejection};
use escrow_oracle::services::checker::{AcceptanceChecker, CheckerError};
use escrow_oracle::services::ledger::{Connector, Ledger, LedgerError};
use escrow_oracle::services::storage::{ArtifactStore, ScratchArtifact, StorageError};

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ChainState {
    head: u64,
    events: Vec<WorkSubmitted>,
    statuses: HashMap<u64, JobStatus>,
    submissions: Vec<ContractCall>,
    polled_ranges: Vec<(u64, u64)>,
    poll_failures: u32,
    read_failures: u32,
    submit_failures: u32,
    drops_after_mining: u32,
    revert_all: bool,
}

/// Shared chain state behind every `FakeLedger` handle.
#[derive(Default)]
pub struct FakeChain {
    state: Mutex<ChainState>,
}

impl FakeChain {
    pub fn new(head: u64) -> Arc<Self> {
        let chain = Self::default();
        chain.state.lock().unwrap().head = head;
        Arc::new(chain)
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    /// Append a `WorkSubmitted` log and move the job into `WorkSubmitted`.
    pub fn emit(&self, event: WorkSubmitted) {
        let mut state = self.state.lock().unwrap();
        state.head = state.head.max(event.block_number);
        state.statuses.insert(event.job_id, JobStatus::WorkSubmitted);
        state.events.push(event);
    }

    pub fn set_status(&self, job_id: u64, status: JobStatus) {
        self.state.lock().unwrap().statuses.insert(job_id, status);
    }

    pub fn status(&self, job_id: u64) -> Option<JobStatus> {
        self.state.lock().unwrap().statuses.get(&job_id).copied()
    }

    /// Fail the next `n` log queries with a connection error.
    pub fn fail_polls(&self, n: u32) {
        self.state.lock().unwrap().poll_failures = n;
    }

    /// Fail the next `n` job reads with a decode error.
    pub fn fail_reads(&self, n: u32) {
        self.state.lock().unwrap().read_failures = n;
    }

    /// Fail the next `n` submissions before they reach the chain.
    pub fn fail_submits(&self, n: u32) {
        self.state.lock().unwrap().submit_failures = n;
    }

    /// Mine the next `n` submissions but lose their confirmations.
    pub fn drop_confirmations(&self, n: u32) {
        self.state.lock().unwrap().drops_after_mining = n;
    }

    pub fn revert_all(&self) {
        self.state.lock().unwrap().revert_all = true;
    }

    pub fn submissions(&self) -> Vec<ContractCall> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn polled_ranges(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().polled_ranges.clone()
    }

    fn snapshot(&self, job_id: u64, state: &ChainState) -> JobSnapshot {
        let result_hash = state
            .events
            .iter()
            .rev()
            .find(|e| e.job_id == job_id)
            .map(|e| e.result_hash.clone())
            .unwrap_or_default();
        JobSnapshot {
            job_id,
            client: Address::repeat_byte(0x11),
            freelancer: Address::repeat_byte(0x22),
            title: format!("job {}", job_id),
            description_hash: "QmDescription".to_string(),
            price: U256::from(1_000_000_000_000_000_000u64),
            deadline: U256::from(1_900_000_000u64),
            result_hash,
            status: state
                .statuses
                .get(&job_id)
                .copied()
                .unwrap_or(JobStatus::InProgress),
            dispute_reason: String::new(),
        }
    }
}

pub struct FakeLedger {
    chain: Arc<FakeChain>,
}

impl FakeLedger {
    pub fn new(chain: Arc<FakeChain>) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl Ledger for FakeLedger {
    async fn current_block(&self) -> Result<u64, LedgerError> {
        Ok(self.chain.state.lock().unwrap().head)
    }

    async fn poll_events(
        &self,
        kind: EventKind,
        from: u64,
        to: u64,
    ) -> Result<Vec<LedgerEvent>, LedgerError> {
        assert_eq!(kind, EventKind::WorkSubmitted);
        let mut state = self.chain.state.lock().unwrap();
        state.polled_ranges.push((from, to));
        if state.poll_failures > 0 {
            state.poll_failures -= 1;
            return Err(LedgerError::Connection("connection reset".into()));
        }
        // Newest first, so callers have to order the batch themselves.
        Ok(state
            .events
            .iter()
            .rev()
            .filter(|e| e.block_number >= from && e.block_number <= to)
            .cloned()
            .map(LedgerEvent::WorkSubmitted)
            .collect())
    }

    async fn read_job(&self, job_id: u64) -> Result<JobSnapshot, LedgerError> {
        let mut state = self.chain.state.lock().unwrap();
        if state.read_failures > 0 {
            state.read_failures -= 1;
            return Err(LedgerError::Decode("unexpected tuple".into()));
        }
        Ok(self.chain.snapshot(job_id, &state))
    }

    async fn submit(&self, call: ContractCall) -> Result<TxReceipt, LedgerError> {
        let mut state = self.chain.state.lock().unwrap();
        if state.submit_failures > 0 {
            state.submit_failures -= 1;
            return Err(LedgerError::Connection("broadcast failed".into()));
        }

        state.submissions.push(call);
        let tx_hash = H256::from_low_u64_be(state.submissions.len() as u64);
        let current = state
            .statuses
            .get(&call.job_id())
            .copied()
            .unwrap_or(JobStatus::InProgress);

        let accepted = !state.revert_all
            && match call {
                ContractCall::VerifyWork { .. } => current == JobStatus::WorkSubmitted,
                ContractCall::ResolveDispute { .. } => current == JobStatus::Disputed,
            };
        if accepted {
            let next = match call {
                ContractCall::VerifyWork { approved: true, .. } => JobStatus::Verified,
                ContractCall::VerifyWork { approved: false, .. } => JobStatus::Disputed,
                ContractCall::ResolveDispute { .. } => JobStatus::Resolved,
            };
            state.statuses.insert(call.job_id(), next);
        }

        if state.drops_after_mining > 0 {
            state.drops_after_mining -= 1;
            return Err(LedgerError::Transaction(format!("transaction {:?} was dropped", tx_hash)));
        }

        let block_number = Some(state.head);
        Ok(TxReceipt {
            tx_hash,
            block_number,
            success: accepted,
        })
    }
}

/// Hands out fresh `FakeLedger` handles over one chain, optionally refusing some.
pub struct FakeConnector {
    chain: Arc<FakeChain>,
    connects: AtomicUsize,
    refusals: AtomicUsize,
}

impl FakeConnector {
    pub fn new(chain: Arc<FakeChain>) -> Arc<Self> {
        Arc::new(Self {
            chain,
            connects: AtomicUsize::new(0),
            refusals: AtomicUsize::new(0),
        })
    }

    pub fn refuse_next(&self, n: usize) {
        self.refusals.store(n, Ordering::SeqCst);
    }

    /// Connection attempts, including refused ones.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Arc<dyn Ledger>, LedgerError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(LedgerError::Connection("node unreachable".into()));
        }
        Ok(Arc::new(FakeLedger::new(Arc::clone(&self.chain))))
    }
}

// ---------------------------------------------------------------------------
// Object store
// ---------------------------------------------------------------------------

/// Content map backed by real scratch directories under a private temp root.
pub struct FakeStore {
    root: tempfile::TempDir,
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fetched_dirs: Mutex<Vec<PathBuf>>,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            root: tempfile::tempdir().unwrap(),
            objects: Mutex::new(HashMap::new()),
            fetched_dirs: Mutex::new(Vec::new()),
        })
    }

    pub fn put(&self, hash: &str, content: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(hash.to_string(), content.to_vec());
    }

    /// Scratch directories handed out so far.
    pub fn fetched_dirs(&self) -> Vec<PathBuf> {
        self.fetched_dirs.lock().unwrap().clone()
    }

    fn get(&self, hash: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .lock()
            .unwrap()
            .get(hash)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(hash.to_string()))
    }
}

#[async_trait]
impl ArtifactStore for FakeStore {
    async fn fetch(&self, hash: &str) -> Result<ScratchArtifact, StorageError> {
        let content = self.get(hash)?;
        let artifact = ScratchArtifact::materialize(self.root.path(), hash, &content).await?;
        self.fetched_dirs
            .lock()
            .unwrap()
            .push(artifact.dir().to_path_buf());
        Ok(artifact)
    }

    async fn fetch_text(&self, hash: &str) -> Result<String, StorageError> {
        let content = self.get(hash)?;
        String::from_utf8(content).map_err(|e| StorageError::Decode(e.to_string()))
    }

    async fn store(&self, path: &Path) -> Result<String, StorageError> {
        let content = tokio::fs::read(path).await?;
        let hash = format!("QmFake{}", self.objects.lock().unwrap().len());
        self.put(&hash, &content);
        Ok(hash)
    }
}

// ---------------------------------------------------------------------------
// Acceptance checker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum CheckerBehavior {
    Coverage { score: f64, threshold: f64 },
    Reject(Rejection),
    Fault,
    Panic,
}

/// Scripted checker that records which directories it was asked to inspect.
pub struct FakeChecker {
    behavior: CheckerBehavior,
    inspected: Mutex<Vec<(PathBuf, bool)>>,
}

impl FakeChecker {
    pub fn new(behavior: CheckerBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            inspected: Mutex::new(Vec::new()),
        })
    }

    pub fn passing(score: f64) -> Arc<Self> {
        Self::new(CheckerBehavior::Coverage {
            score,
            threshold: 90.0,
        })
    }

    pub fn calls(&self) -> usize {
        self.inspected.lock().unwrap().len()
    }

    /// `(dir, dir existed during the check)` per call.
    pub fn inspected(&self) -> Vec<(PathBuf, bool)> {
        self.inspected.lock().unwrap().clone()
    }
}

#[async_trait]
impl AcceptanceChecker for FakeChecker {
    async fn check(&self, artifact_dir: &Path) -> Result<CheckReport, CheckerError> {
        self.inspected
            .lock()
            .unwrap()
            .push((artifact_dir.to_path_buf(), artifact_dir.is_dir()));

        match &self.behavior {
            CheckerBehavior::Coverage { score, threshold } if score >= threshold => {
                Ok(CheckReport::approved(*score))
            }
            CheckerBehavior::Coverage { threshold, .. } => {
                Ok(CheckReport::rejected(Rejection::BelowThreshold {
                    threshold: *threshold,
                }))
            }
            CheckerBehavior::Reject(rejection) => Ok(CheckReport::rejected(rejection.clone())),
            CheckerBehavior::Fault => Err(CheckerError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "scratch dir not readable",
            ))),
            CheckerBehavior::Panic => panic!("checker blew up"),
        }
    }
}

// ---------------------------------------------------------------------------
// Async utilities
// ---------------------------------------------------------------------------

/// Poll `condition` every few milliseconds until it holds or `limit` elapses.
pub async fn wait_until<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Await `fut` with a generous upper bound so a hung task fails the test instead of the run.
pub async fn bounded<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("operation did not finish in time")
}
