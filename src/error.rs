//! Error types for identity reconciliation
//!
//! Errors are classified by who can fix them:
//! - Client: the request carried no usable identifier
//! - Retryable: the contact store could not complete a read/write
//! - Internal: the store contents break the cluster invariants

use thiserror::Error;

use crate::db::DbError;

/// Failure of one `/identify` reconciliation. The surrounding transaction is
/// rolled back for every variant; no partial result exists.
#[derive(Debug, Error)]
pub enum IdentifyError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Contact store unavailable: {0}")]
    StoreUnavailable(#[source] DbError),

    #[error("Contact links are inconsistent: {0}")]
    ConsistencyViolation(String),
}

/// A row that fails to decode is bad data, not a store outage: retrying
/// reads the same row again.
impl From<DbError> for IdentifyError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::InvalidRow(msg) => IdentifyError::ConsistencyViolation(msg),
            other => IdentifyError::StoreUnavailable(other),
        }
    }
}

impl IdentifyError {
    /// Returns true if the whole request may be retried as-is
    pub fn is_retryable(&self) -> bool {
        matches!(self, IdentifyError::StoreUnavailable(_))
    }

    /// Returns true if the caller sent something we cannot reconcile
    pub fn is_client_error(&self) -> bool {
        matches!(self, IdentifyError::InvalidInput(_))
    }

    /// Message safe to hand back to a client. Server-side failures never
    /// echo row contents.
    pub fn public_message(&self) -> String {
        match self {
            IdentifyError::InvalidInput(msg) => msg.clone(),
            IdentifyError::StoreUnavailable(_) => "Contact store unavailable".to_string(),
            IdentifyError::ConsistencyViolation(_) => "Internal server error".to_string(),
        }
    }
}

/// Serializable error body for HTTP responses
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub error_type: ErrorType,
    pub can_retry: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorType {
    InvalidInput,
    StoreUnavailable,
    ConsistencyViolation,
}

impl From<&IdentifyError> for ErrorBody {
    fn from(err: &IdentifyError) -> Self {
        let error_type = match err {
            IdentifyError::InvalidInput(_) => ErrorType::InvalidInput,
            IdentifyError::StoreUnavailable(_) => ErrorType::StoreUnavailable,
            IdentifyError::ConsistencyViolation(_) => ErrorType::ConsistencyViolation,
        };

        ErrorBody {
            error: err.public_message(),
            error_type,
            can_retry: err.is_retryable(),
        }
    }
}
