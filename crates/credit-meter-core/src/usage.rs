//! Service invocation records.
//!
//! A [`UsageRecord`] is the audit trail of one paid invocation, distinct from
//! the ledger entries it causes. Its [`InvocationState`] follows a small state
//! machine:
//!
//! ```text
//! Requested ──► Charged ──► Completed
//!     │            │
//!     │            └──► Failed ──► Refunded
//!     └──► Rejected ──► Requested (retry, never charged)
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CreditError, Result};
use crate::{AccountId, EntryId, InvocationId, ServiceCode};

/// State of a service invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    /// Priced and about to be charged.
    Requested,
    /// Debit committed; the feature is running.
    Charged,
    /// Feature succeeded. Terminal.
    Completed,
    /// Feature failed or timed out; refund outstanding.
    Failed,
    /// Debit reversed. Terminal.
    Refunded,
    /// Insufficient credits; never charged.
    Rejected,
}

impl InvocationState {
    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Requested, Self::Charged | Self::Rejected)
                | (Self::Charged, Self::Completed | Self::Failed)
                | (Self::Failed, Self::Refunded)
                | (Self::Rejected, Self::Requested)
        )
    }

    /// Terminal states need no further work.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Refunded | Self::Rejected)
    }

    /// States a crashed or interrupted invocation can be left in.
    #[must_use]
    pub const fn needs_reconciliation(self) -> bool {
        matches!(self, Self::Requested | Self::Charged | Self::Failed)
    }

    /// Get the state name as stored in databases and APIs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Charged => "charged",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::Rejected => "rejected",
        }
    }

    /// Parse a stored state name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "requested" => Some(Self::Requested),
            "charged" => Some(Self::Charged),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "refunded" => Some(Self::Refunded),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit record of one paid invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// The invocation (and idempotency key of its debit).
    pub invocation_id: InvocationId,

    /// The account being charged.
    pub account_id: AccountId,

    /// The feature invoked.
    pub service_code: ServiceCode,

    /// Current state.
    pub state: InvocationState,

    /// Credits charged (or that would have been charged).
    pub cost: i64,

    /// The debit entry, once charged.
    pub debit_entry_id: Option<EntryId>,

    /// The refund entry, once refunded.
    pub refund_entry_id: Option<EntryId>,

    /// Wall time of the feature call.
    pub latency_ms: Option<u64>,

    /// Failure or rejection reason.
    pub error: Option<String>,

    /// Serialized result of a completed invocation, replayed to duplicates.
    pub output: Option<serde_json::Value>,

    /// Caller metadata (e.g. the job a matching request targeted).
    pub metadata: serde_json::Value,

    /// When the invocation was first requested.
    pub created_at: DateTime<Utc>,

    /// When the record last changed state.
    pub updated_at: DateTime<Utc>,
}

impl UsageRecord {
    /// Create a record in the `Requested` state.
    #[must_use]
    pub fn requested(
        invocation_id: InvocationId,
        account_id: AccountId,
        service_code: ServiceCode,
        cost: i64,
        metadata: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            invocation_id,
            account_id,
            service_code,
            state: InvocationState::Requested,
            cost,
            debit_entry_id: None,
            refund_entry_id: None,
            latency_ms: None,
            error: None,
            output: None,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, to: InvocationState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(CreditError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `Requested → Charged`.
    ///
    /// # Errors
    ///
    /// Returns `CreditError::InvalidTransition` from any other state.
    pub fn mark_charged(&mut self, debit_entry_id: EntryId) -> Result<()> {
        self.transition(InvocationState::Charged)?;
        self.debit_entry_id = Some(debit_entry_id);
        Ok(())
    }

    /// `Requested → Rejected`.
    ///
    /// # Errors
    ///
    /// Returns `CreditError::InvalidTransition` from any other state.
    pub fn mark_rejected(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(InvocationState::Rejected)?;
        self.error = Some(reason.into());
        Ok(())
    }

    /// `Charged → Completed`.
    ///
    /// # Errors
    ///
    /// Returns `CreditError::InvalidTransition` from any other state.
    pub fn mark_completed(&mut self, latency_ms: u64, output: serde_json::Value) -> Result<()> {
        self.transition(InvocationState::Completed)?;
        self.latency_ms = Some(latency_ms);
        self.output = Some(output);
        Ok(())
    }

    /// `Charged → Failed`.
    ///
    /// # Errors
    ///
    /// Returns `CreditError::InvalidTransition` from any other state.
    pub fn mark_failed(&mut self, latency_ms: Option<u64>, error: impl Into<String>) -> Result<()> {
        self.transition(InvocationState::Failed)?;
        self.latency_ms = latency_ms;
        self.error = Some(error.into());
        Ok(())
    }

    /// `Failed → Refunded`.
    ///
    /// # Errors
    ///
    /// Returns `CreditError::InvalidTransition` from any other state.
    pub fn mark_refunded(&mut self, refund_entry_id: EntryId) -> Result<()> {
        self.transition(InvocationState::Refunded)?;
        self.refund_entry_id = Some(refund_entry_id);
        Ok(())
    }

    /// `Rejected → Requested`, for a retry after the account was topped up.
    ///
    /// # Errors
    ///
    /// Returns `CreditError::InvalidTransition` from any other state.
    pub fn restart(&mut self, cost: i64, metadata: serde_json::Value) -> Result<()> {
        self.transition(InvocationState::Requested)?;
        self.cost = cost;
        self.metadata = metadata;
        self.error = None;
        Ok(())
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Usage of one service, aggregated over its invocation records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatistics {
    /// The service.
    pub service_code: ServiceCode,
    /// Every recorded invocation, whatever its state.
    pub invocations: u64,
    /// Invocations that completed and kept their charge.
    pub completed: u64,
    /// Invocations whose charge was refunded.
    pub refunded: u64,
    /// Invocations refused for insufficient credits.
    pub rejected: u64,
    /// Invocations not yet settled (requested, charged or failed).
    pub pending: u64,
    /// Credits kept from completed invocations.
    pub credits_consumed: i64,
    /// Distinct accounts that invoked the service.
    pub unique_accounts: u64,
    /// Start of the latest completed invocation.
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ServiceStatistics {
    fn empty(service_code: ServiceCode) -> Self {
        Self {
            service_code,
            invocations: 0,
            completed: 0,
            refunded: 0,
            rejected: 0,
            pending: 0,
            credits_consumed: 0,
            unique_accounts: 0,
            last_used_at: None,
        }
    }
}

/// Aggregate usage records per service, ordered by service code.
#[must_use]
pub fn service_statistics<'a>(
    records: impl IntoIterator<Item = &'a UsageRecord>,
) -> Vec<ServiceStatistics> {
    let mut stats: BTreeMap<ServiceCode, (ServiceStatistics, HashSet<AccountId>)> =
        BTreeMap::new();

    for record in records {
        let (entry, accounts) = stats
            .entry(record.service_code.clone())
            .or_insert_with(|| {
                let empty = ServiceStatistics::empty(record.service_code.clone());
                (empty, HashSet::new())
            });

        entry.invocations += 1;
        accounts.insert(record.account_id);
        match record.state {
            InvocationState::Completed => {
                entry.completed += 1;
                entry.credits_consumed = entry.credits_consumed.saturating_add(record.cost);
                entry.last_used_at = entry.last_used_at.max(Some(record.created_at));
            }
            InvocationState::Refunded => entry.refunded += 1,
            InvocationState::Rejected => entry.rejected += 1,
            InvocationState::Requested | InvocationState::Charged | InvocationState::Failed => {
                entry.pending += 1;
            }
        }
    }

    stats
        .into_values()
        .map(|(mut entry, accounts)| {
            entry.unique_accounts = u64::try_from(accounts.len()).unwrap_or(u64::MAX);
            entry
        })
        .collect()
}
