use chrono::{DateTime, Utc};
use ethers::abi::Token;
use ethers::types::{Address, U256};
use serde::Serialize;
use std::fmt;

/// Lifecycle of an escrowed job as recorded by the contract.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    InProgress,
    WorkSubmitted,
    Verified,
    Disputed,
    Resolved,
    Unknown(u8),
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Created => f.write_str("Created"),
            JobStatus::InProgress => f.write_str("InProgress"),
            JobStatus::WorkSubmitted => f.write_str("WorkSubmitted"),
            JobStatus::Verified => f.write_str("Verified"),
            JobStatus::Disputed => f.write_str("Disputed"),
            JobStatus::Resolved => f.write_str("Resolved"),
            JobStatus::Unknown(code) => write!(f, "Unknown({code})"),
        }
    }
}

impl JobStatus {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => JobStatus::Created,
            1 => JobStatus::InProgress,
            2 => JobStatus::WorkSubmitted,
            3 => JobStatus::Verified,
            4 => JobStatus::Disputed,
            5 => JobStatus::Resolved,
            other => JobStatus::Unknown(other),
        }
    }

    /// True when the contract has already moved past `WorkSubmitted`.
    pub fn is_adjudicated(&self) -> bool {
        matches!(
            self,
            JobStatus::Verified | JobStatus::Disputed | JobStatus::Resolved
        )
    }
}

/// Point-in-time read of the contract's `jobs(id)` record.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub job_id: u64,
    pub client: Address,
    pub freelancer: Address,
    pub title: String,
    pub description_hash: String,
    pub price: U256,
    pub deadline: U256,
    pub result_hash: String,
    pub status: JobStatus,
    pub dispute_reason: String,
}

impl JobSnapshot {
    /// Decode the tuple returned by `jobs(uint256)`.
    ///
    /// Field order is fixed by the contract's struct layout: client,
    /// freelancer, title, descriptionHash, price, deadline, resultHash,
    /// status, disputeReason.
    pub fn from_tokens(job_id: u64, tokens: Vec<Token>) -> Result<Self, DecodeError> {
        if tokens.len() != 9 {
            return Err(DecodeError::Arity {
                expected: 9,
                actual: tokens.len(),
            });
        }

        let mut it = tokens.into_iter();
        let mut next = |field: &'static str| it.next().ok_or(DecodeError::Missing(field));

        let client = address(next("client")?, "client")?;
        let freelancer = address(next("freelancer")?, "freelancer")?;
        let title = string(next("title")?, "title")?;
        let description_hash = string(next("descriptionHash")?, "descriptionHash")?;
        let price = uint(next("price")?, "price")?;
        let deadline = uint(next("deadline")?, "deadline")?;
        let result_hash = string(next("resultHash")?, "resultHash")?;
        let status = uint(next("status")?, "status")?;
        let dispute_reason = string(next("disputeReason")?, "disputeReason")?;

        let status = u8::try_from(status)
            .map(JobStatus::from_code)
            .map_err(|_| DecodeError::OutOfRange("status"))?;

        Ok(Self {
            job_id,
            client,
            freelancer,
            title,
            description_hash,
            price,
            deadline,
            result_hash,
            status,
            dispute_reason,
        })
    }

    /// Deadline as wall-clock time, when it fits a timestamp.
    pub fn deadline_at(&self) -> Option<DateTime<Utc>> {
        if self.deadline > U256::from(i64::MAX as u64) {
            return None;
        }
        DateTime::from_timestamp(self.deadline.as_u64() as i64, 0)
    }
}

pub(crate) fn address(token: Token, field: &'static str) -> Result<Address, DecodeError> {
    match token {
        Token::Address(a) => Ok(a),
        _ => Err(DecodeError::Type(field)),
    }
}

pub(crate) fn string(token: Token, field: &'static str) -> Result<String, DecodeError> {
    match token {
        Token::String(s) => Ok(s),
        _ => Err(DecodeError::Type(field)),
    }
}

pub(crate) fn uint(token: Token, field: &'static str) -> Result<U256, DecodeError> {
    match token {
        Token::Uint(v) => Ok(v),
        _ => Err(DecodeError::Type(field)),
    }
}

pub(crate) fn uint_u64(token: Token, field: &'static str) -> Result<u64, DecodeError> {
    let value = uint(token, field)?;
    u64::try_from(value).map_err(|_| DecodeError::OutOfRange(field))
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DecodeError {
    #[error("expected {expected} values, got {actual}")]
    Arity { expected: usize, actual: usize },

    #[error("missing value for {0}")]
    Missing(&'static str),

    #[error("unexpected ABI type for {0}")]
    Type(&'static str),

    #[error("value out of range for {0}")]
    OutOfRange(&'static str),
}
