//! Error types for credit-meter storage.

use credit_meter_core::CreditError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Insufficient credits for a debit.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// The request violates a domain rule (e.g. refunding a purchase).
    #[error(transparent)]
    Domain(#[from] CreditError),

    /// Timeout or lost connection. Safe to retry after checking for a prior commit.
    #[error("transient storage failure: {0}")]
    Transient(String),

    /// The connection dropped during commit; the write may or may not have landed.
    #[error("commit outcome unknown: {0}")]
    CommitUnknown(String),
}

impl StoreError {
    /// Whether the operation may succeed if retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::CommitUnknown(_))
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Transient(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Serialization(err.to_string())
            }
            _ => Self::Database(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(StoreError::Transient("timeout".into()).is_transient());
        assert!(StoreError::CommitUnknown("reset".into()).is_transient());
        assert!(!StoreError::Database("syntax".into()).is_transient());
        assert!(!StoreError::InsufficientCredits {
            balance: 0,
            required: 1
        }
        .is_transient());
    }

    #[test]
    fn pool_timeout_is_transient() {
        let err: StoreError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_transient());
    }
}
