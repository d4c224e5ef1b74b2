//! Ledger entry types.
//!
//! Every balance change is an immutable, append-only [`LedgerEntry`]. The
//! account balance is the signed sum of its entries; corrections are new
//! compensating entries, never edits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CreditError, Result};
use crate::{AccountId, EntryId, InvocationId, ServiceCode};

/// One balance-affecting event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID (ULID for time-ordering).
    pub id: EntryId,

    /// The account whose balance was affected.
    pub account_id: AccountId,

    /// Kind of entry.
    pub kind: EntryKind,

    /// Signed amount. Purchases and refunds are positive, debits negative.
    pub amount: i64,

    /// The service charged or refunded. Absent for purchases.
    pub service_code: Option<ServiceCode>,

    /// For refunds, the debit being reversed.
    pub related_entry_id: Option<EntryId>,

    /// For debits, the invocation that caused the charge.
    pub idempotency_key: Option<InvocationId>,

    /// Balance after this entry was applied.
    pub balance_after: i64,

    /// Human-readable description.
    pub description: String,

    /// Opaque caller metadata (target job, request origin, ...).
    pub metadata: serde_json::Value,

    /// When the entry was created.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Create a purchase (or grant) entry.
    ///
    /// # Errors
    ///
    /// Returns `CreditError::InvalidAmount` if `amount` is not positive.
    pub fn purchase(
        account_id: AccountId,
        amount: i64,
        balance_after: i64,
        description: String,
    ) -> Result<Self> {
        ensure_positive(amount)?;
        Ok(Self {
            id: EntryId::generate(),
            account_id,
            kind: EntryKind::Purchase,
            amount,
            service_code: None,
            related_entry_id: None,
            idempotency_key: None,
            balance_after,
            description,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        })
    }

    /// Create a debit entry for a service invocation.
    ///
    /// `amount` is the positive price; the stored amount is negated.
    ///
    /// # Errors
    ///
    /// Returns `CreditError::InvalidAmount` if `amount` is not positive.
    pub fn debit(
        account_id: AccountId,
        service_code: ServiceCode,
        amount: i64,
        idempotency_key: InvocationId,
        balance_after: i64,
        metadata: serde_json::Value,
    ) -> Result<Self> {
        ensure_positive(amount)?;
        Ok(Self {
            id: EntryId::generate(),
            account_id,
            kind: EntryKind::Debit,
            description: format!("Service charge: {service_code}"),
            amount: -amount,
            service_code: Some(service_code),
            related_entry_id: None,
            idempotency_key: Some(idempotency_key),
            balance_after,
            metadata,
            created_at: Utc::now(),
        })
    }

    /// Create the refund that reverses `debit`.
    ///
    /// # Errors
    ///
    /// Returns `CreditError::NotADebit` if `debit` is not a debit entry.
    pub fn refund(debit: &LedgerEntry, balance_after: i64, reason: String) -> Result<Self> {
        if debit.kind != EntryKind::Debit {
            return Err(CreditError::NotADebit { entry_id: debit.id });
        }

        Ok(Self {
            id: EntryId::generate(),
            account_id: debit.account_id,
            kind: EntryKind::Refund,
            amount: debit.amount.abs(),
            service_code: debit.service_code.clone(),
            related_entry_id: Some(debit.id),
            idempotency_key: debit.idempotency_key,
            balance_after,
            description: reason,
            metadata: debit.metadata.clone(),
            created_at: Utc::now(),
        })
    }

    /// Attach metadata to the entry.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

fn ensure_positive(amount: i64) -> Result<()> {
    if amount > 0 {
        Ok(())
    } else {
        Err(CreditError::InvalidAmount(amount))
    }
}

/// Kind of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Credits bought or granted.
    Purchase,

    /// Credits charged for a service invocation.
    Debit,

    /// A debit reversed after the service failed.
    Refund,
}

impl EntryKind {
    /// Get the kind name as stored in databases and APIs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Debit => "debit",
            Self::Refund => "refund",
        }
    }

    /// Parse a stored kind name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "purchase" => Some(Self::Purchase),
            "debit" => Some(Self::Debit),
            "refund" => Some(Self::Refund),
            _ => None,
        }
    }
}

/// Signed sum of a set of entries: the balance they project to.
///
/// Summed in `i128` so the order of `entries` cannot overflow an intermediate;
/// a total outside the `i64` range saturates.
#[must_use]
pub fn projected_balance<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> i64 {
    let total: i128 = entries.into_iter().map(|e| i128::from(e.amount)).sum();
    i64::try_from(total).unwrap_or(if total < 0 { i64::MIN } else { i64::MAX })
}

/// Result of a debit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebitReceipt {
    /// The debit entry (new, or the original one on replay).
    pub entry: LedgerEntry,

    /// Account balance after the call.
    pub balance: i64,

    /// True when the idempotency key was already recorded and nothing was charged.
    pub replayed: bool,
}

/// Result of a refund.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundReceipt {
    /// The refund entry (new, or the original one on replay).
    pub entry: LedgerEntry,

    /// Account balance after the call.
    pub balance: i64,

    /// True when the debit had already been refunded.
    pub replayed: bool,
}
