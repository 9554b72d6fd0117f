//! Drain error types.

use relay_database::{DatabaseError, MalformedRow, RecordId};
use thiserror::Error;

/// Why a single delivery attempt failed.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// No response within the configured timeout
    #[error("request timed out")]
    Timeout,

    /// Connection or transport failure
    #[error("network error: {0}")]
    Network(String),

    /// Primary service refused the shared secret
    #[error("credential rejected (HTTP {0})")]
    CredentialRejected(u16),

    /// Any other non-success status
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Drain error type.
#[derive(Error, Debug)]
pub enum DrainError {
    /// Staging store unreachable; aborts the current cycle
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] DatabaseError),

    /// One record could not be delivered
    #[error("Delivery failed for record {id}: {source}")]
    DeliveryFailed {
        id: RecordId,
        #[source]
        source: DeliveryError,
    },

    /// Record failed shape checks; never sent
    #[error("Malformed record {id}: {reason}")]
    MalformedRecord { id: RecordId, reason: String },

    /// Another cycle holds the guard
    #[error("A drain cycle is already in progress")]
    CycleInProgress,

    /// Invalid drain or delivery settings
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<MalformedRow> for DrainError {
    fn from(row: MalformedRow) -> Self {
        DrainError::MalformedRecord {
            id: row.id,
            reason: row.reason,
        }
    }
}

/// Result type alias using DrainError.
pub type DrainResult<T> = Result<T, DrainError>;
