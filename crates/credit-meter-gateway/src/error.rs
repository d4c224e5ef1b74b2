//! Error types for the catalog, ledger and gateway.

use std::time::Duration;

use credit_meter_core::{InvocationId, InvocationState, ServiceCode};
use credit_meter_store::StoreError;

/// Errors from a [`Catalog`](crate::Catalog) lookup.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CatalogError {
    /// The pricing data source could not be read.
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for CatalogError {
    fn from(err: StoreError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Result type for ledger operations.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Errors from the [`Ledger`](crate::Ledger).
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    /// The balance does not cover the debit. Nothing was written.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// The store could not be reached after retrying.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// The request breaks a ledger rule (non-positive amount, refund of a purchase, ...).
    #[error("invalid ledger request: {0}")]
    InvalidRequest(String),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientCredits { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::Domain(err) => Self::InvalidRequest(err.to_string()),
            StoreError::Database(_)
            | StoreError::Serialization(_)
            | StoreError::Transient(_)
            | StoreError::CommitUnknown(_) => Self::Unavailable(err.to_string()),
        }
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Errors returned to callers of [`Gateway::invoke`](crate::Gateway::invoke).
///
/// A failed refund is not a caller error: it is raised through the
/// [`AlertSink`](crate::AlertSink) and the caller still receives the
/// original failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// The account cannot pay for the service. Nothing was charged.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: i64,
        /// Price of the service.
        required: i64,
    },

    /// The service is unknown or deactivated.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(ServiceCode),

    /// Pricing could not be read. Nothing was charged.
    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// The ledger could not be reached. The action did not run.
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// An earlier attempt with this invocation ID has not been resolved yet.
    #[error("invocation {invocation_id} is pending in state {state}")]
    InvocationPending {
        /// The invocation.
        invocation_id: InvocationId,
        /// Its last recorded state.
        state: InvocationState,
    },

    /// The action did not finish in time. The charge was refunded.
    #[error("action timed out after {0:?}")]
    Timeout(Duration),

    /// The action failed or panicked. The charge was refunded.
    #[error("action failed: {0}")]
    Action(String),

    /// A retry of an invocation that already failed.
    #[error("invocation {invocation_id} previously failed: {message}")]
    PreviouslyFailed {
        /// The invocation.
        invocation_id: InvocationId,
        /// The recorded failure.
        message: String,
        /// Whether the charge has been returned.
        refunded: bool,
    },

    /// The request is malformed or reuses an invocation ID for another request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unexpected internal failure (lost task, corrupt record).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<LedgerError> for GatewayError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientCredits { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            LedgerError::InvalidRequest(message) => Self::InvalidRequest(message),
            LedgerError::Unavailable(message) => Self::LedgerUnavailable(message),
            LedgerError::NotFound { entity, id } => {
                Self::Internal(format!("{entity} not found: {id}"))
            }
        }
    }
}

impl From<CatalogError> for GatewayError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Unavailable(message) => Self::CatalogUnavailable(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_outages_become_unavailable() {
        let err: LedgerError = StoreError::Transient("pool timed out".into()).into();
        assert!(matches!(err, LedgerError::Unavailable(_)));

        let err: LedgerError = StoreError::CommitUnknown("connection reset".into()).into();
        assert!(matches!(err, LedgerError::Unavailable(_)));
    }

    #[test]
    fn insufficient_credits_passes_through() {
        let err: GatewayError = LedgerError::from(StoreError::InsufficientCredits {
            balance: 30,
            required: 40,
        })
        .into();
        assert!(matches!(
            err,
            GatewayError::InsufficientCredits {
                balance: 30,
                required: 40
            }
        ));
    }

    #[test]
    fn catalog_errors_fail_closed() {
        let err: GatewayError = CatalogError::Unavailable("db down".into()).into();
        assert!(matches!(err, GatewayError::CatalogUnavailable(_)));
    }
}
