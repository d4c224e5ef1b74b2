//! Error types for the core domain.

use crate::ids::IdError;
use crate::usage::InvocationState;
use crate::EntryId;

/// Result type for core domain operations.
pub type Result<T> = std::result::Result<T, CreditError>;

/// Errors raised while building or validating domain values.
#[derive(Debug, thiserror::Error)]
pub enum CreditError {
    /// Amounts must be strictly positive.
    #[error("invalid amount: {0}")]
    InvalidAmount(i64),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// A refund was requested for an entry that is not a debit.
    #[error("entry {entry_id} is not a debit")]
    NotADebit {
        /// The offending entry.
        entry_id: EntryId,
    },

    /// An invocation state change that the state machine forbids.
    #[error("invalid invocation transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// Current state.
        from: InvocationState,
        /// Requested state.
        to: InvocationState,
    },

    /// Applying the amount would overflow a balance or lifetime counter.
    #[error("amount {amount} overflows the account totals")]
    Overflow {
        /// The amount that could not be applied.
        amount: i64,
    },

    /// Promotion discount outside `1..=100`.
    #[error("invalid discount percent: {0}")]
    InvalidDiscount(u8),
}
