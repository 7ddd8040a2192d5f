use ethers::abi::Token;
use ethers::types::{Address, H256};
use serde::Serialize;
use strum::{AsRefStr, Display};

use crate::models::job::{self, DecodeError};

/// Contract events the oracle subscribes to. The string form is the ABI event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display)]
pub enum EventKind {
    WorkSubmitted,
}

/// `WorkSubmitted(jobId, freelancer, resultIPFSHash)` plus its log position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkSubmitted {
    pub job_id: u64,
    pub freelancer: Address,
    pub result_hash: String,
    pub block_number: u64,
    pub log_index: u64,
}

impl WorkSubmitted {
    /// Decode the event parameters in declaration order.
    pub fn from_tokens(
        tokens: Vec<Token>,
        block_number: u64,
        log_index: u64,
    ) -> Result<Self, DecodeError> {
        if tokens.len() != 3 {
            return Err(DecodeError::Arity {
                expected: 3,
                actual: tokens.len(),
            });
        }
        let mut it = tokens.into_iter();
        let job_id = job::uint_u64(it.next().ok_or(DecodeError::Missing("jobId"))?, "jobId")?;
        let freelancer =
            job::address(it.next().ok_or(DecodeError::Missing("freelancer"))?, "freelancer")?;
        let result_hash = job::string(
            it.next().ok_or(DecodeError::Missing("resultIPFSHash"))?,
            "resultIPFSHash",
        )?;

        Ok(Self {
            job_id,
            freelancer,
            result_hash,
            block_number,
            log_index,
        })
    }
}

/// A decoded contract event. Closed set: adding an event kind means adding a variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    WorkSubmitted(WorkSubmitted),
}

impl LedgerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LedgerEvent::WorkSubmitted(_) => EventKind::WorkSubmitted,
        }
    }

    /// Position in the chain: block first, then index within the block.
    pub fn position(&self) -> (u64, u64) {
        match self {
            LedgerEvent::WorkSubmitted(e) => (e.block_number, e.log_index),
        }
    }
}

/// A state transition the oracle may propose to the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContractCall {
    /// `verifyWork(uint256 jobId, bool approved)`
    VerifyWork { job_id: u64, approved: bool },
    /// `resolveDispute(uint256 jobId, bool releaseToFreelancer)`
    ResolveDispute {
        job_id: u64,
        release_to_freelancer: bool,
    },
}

impl ContractCall {
    pub fn function_name(&self) -> &'static str {
        match self {
            ContractCall::VerifyWork { .. } => "verifyWork",
            ContractCall::ResolveDispute { .. } => "resolveDispute",
        }
    }

    pub fn job_id(&self) -> u64 {
        match self {
            ContractCall::VerifyWork { job_id, .. } | ContractCall::ResolveDispute { job_id, .. } => {
                *job_id
            }
        }
    }

    pub fn flag(&self) -> bool {
        match self {
            ContractCall::VerifyWork { approved, .. } => *approved,
            ContractCall::ResolveDispute {
                release_to_freelancer,
                ..
            } => *release_to_freelancer,
        }
    }
}

/// Outcome of a mined transaction. `success == false` means the call reverted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxReceipt {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
    pub success: bool,
}
