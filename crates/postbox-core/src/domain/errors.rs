//! Errors - ストレージ層と処理層のエラー
//!
//! - `StorageError`: Postbox / Transactor が返す永続化エラー
//! - `RequestProcessingError`: processor が外に出す唯一のエラー
//!
//! Storage errors are flattened into a reason string at the processor
//! boundary; callers only ever see `RequestProcessingError`.

use thiserror::Error;

use super::ids::RequestId;
use super::state::RequestState;

/// Reason attached to requests whose response failed the success criteria.
pub const REJECTED_BY_SUCCESS_CRITERIA: &str = "response did not pass success criteria";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("request {0} not found")]
    NotFound(RequestId),

    #[error("request {request_id} is already {state}")]
    AlreadyResolved {
        request_id: RequestId,
        state: RequestState,
    },

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("transaction failed: {0}")]
    Transaction(String),

    /// The unit of work itself blew up (e.g. a handler panic); nothing is committed.
    #[error("unit of work aborted: {0}")]
    Aborted(String),
}

impl StorageError {
    /// Human-readable description carried into `RequestProcessingError`.
    pub fn description(&self) -> String {
        self.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct RequestProcessingError {
    pub reason: String,
}

impl RequestProcessingError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn rejected() -> Self {
        Self::new(REJECTED_BY_SUCCESS_CRITERIA)
    }
}

impl From<StorageError> for RequestProcessingError {
    fn from(err: StorageError) -> Self {
        Self::new(err.description())
    }
}
