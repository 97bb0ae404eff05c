use thiserror::Error;

use crate::models::{PollStatus, TrustTier};

/// Client-correctable rejections raised before a ballot is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("poll not found: {0}")]
    PollNotFound(String),
    #[error("poll is closed for voting")]
    PollClosed,
    #[error("poll is not active (status: {0})")]
    PollNotActive(PollStatus),
    #[error("selection does not match the poll's voting method: {0}")]
    InvalidSelectionShape(String),
    #[error("option {0} appears more than once")]
    DuplicateOption(String),
    #[error("trust tier {actual} is below the required {required}")]
    InsufficientTier { required: TrustTier, actual: TrustTier },
    #[error("a counted ballot already exists for this voter")]
    DuplicateVote,
    #[error("identity provider unavailable: {0}")]
    IdentityUnavailable(String),
}

impl ValidationError {
    /// Machine-readable code distinguishing "retry" from "ineligible" from
    /// "already voted".
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::PollNotFound(_) => "poll_not_found",
            ValidationError::PollClosed => "poll_closed",
            ValidationError::PollNotActive(_) => "poll_not_active",
            ValidationError::InvalidSelectionShape(_) => "invalid_selection",
            ValidationError::DuplicateOption(_) => "duplicate_option",
            ValidationError::InsufficientTier { .. } => "insufficient_tier",
            ValidationError::DuplicateVote => "already_voted",
            ValidationError::IdentityUnavailable(_) => "retry",
        }
    }
}

/// Failures from the storage layer. Connection-level problems are transient
/// and worth retrying; corrupt rows are not.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("stored row is corrupt: {0}")]
    Corrupt(String),
    #[error("row not found")]
    NotFound,
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Sqlx(err) => matches!(
                err,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            StoreError::Corrupt(_) | StoreError::NotFound => false,
        }
    }
}

/// Errors surfaced by the vote processor at submission time.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Transient; the caller may retry.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
    /// The caller should back off.
    #[error("rate limited; retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

impl ProcessingError {
    pub fn code(&self) -> &'static str {
        match self {
            ProcessingError::Validation(err) => err.code(),
            ProcessingError::Storage(_) => "retry",
            ProcessingError::RateLimited { .. } => "rate_limited",
        }
    }
}

/// Errors from poll finalization. `RetryLater` is the only transient kind;
/// computation errors are fatal and demand operator attention.
#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("poll not found: {0}")]
    PollNotFound(String),
    #[error("poll {0} is not ready to finalize (status: {1})")]
    PollNotActive(String, PollStatus),
    #[error("poll is being finalized by another caller")]
    RetryLater,
    #[error("tally produced an internally contradictory result: {0}")]
    Computation(String),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}
