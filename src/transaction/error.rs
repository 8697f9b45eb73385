//! Transaction error types.

use thiserror::Error;

/// Errors returned by transaction operations.
#[derive(Error, Debug)]
pub enum TransactionError {
    /// `commit()` on a doomed transaction. No participant was touched.
    #[error("transaction doomed, cannot commit")]
    Doomed,

    /// An earlier commit or savepoint operation failed on this transaction.
    #[error("An operation previously failed, with traceback:\n\n{traceback}")]
    Failed { traceback: String },

    /// The operation is not legal in the transaction's current status.
    #[error("{0}")]
    InvalidState(String),

    /// The savepoint was invalidated by a rollback to an earlier savepoint,
    /// or its transaction already completed.
    #[error("invalid savepoint rollback: {0}")]
    InvalidSavepointRollback(String),

    /// A participant cannot take part in savepoints.
    #[error("Savepoints unsupported: {resource}")]
    SavepointsUnsupported { resource: String },

    /// Nothing was stored under the requested data key.
    #[error("no transaction data stored for key")]
    DataNotFound,

    /// Error raised by a participant, passed through unchanged.
    #[error(transparent)]
    Resource(anyhow::Error),

    /// Error raised by a before-commit hook.
    #[error(transparent)]
    Hook(anyhow::Error),

    /// Error raised by a synchronizer callback.
    #[error(transparent)]
    Synchronizer(anyhow::Error),
}

impl TransactionError {
    /// The participant error, if this error came from one.
    pub fn resource_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Resource(e) => Some(e),
            _ => None,
        }
    }

    /// Text kept on a poisoned transaction and replayed by later calls.
    pub(crate) fn traceback(&self) -> String {
        match self {
            Self::Resource(e) | Self::Hook(e) | Self::Synchronizer(e) => format!("{:?}", e),
            other => other.to_string(),
        }
    }
}

/// Result type for transaction operations.
pub type Result<T> = std::result::Result<T, TransactionError>;
