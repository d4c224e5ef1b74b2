//! Reconciliation of interrupted invocations.
//!
//! A crash or outage can leave a usage record in `Requested`, `Charged` or
//! `Failed`. [`Reconciler::run_once`] settles every such record that has not
//! moved for `stale_after`, under the same invocation lock the gateway uses:
//!
//! | State | Debit committed | Outcome |
//! |---|---|---|
//! | `Requested` | no | `Rejected` |
//! | `Requested` | yes | refund, `Refunded` |
//! | `Charged` | yes | refund, `Refunded` |
//! | `Failed` | yes | refund, `Refunded` |
//!
//! A refund that still fails raises an alert and leaves the record `Failed`
//! for the next pass.

use std::time::Duration;

use chrono::Utc;
use credit_meter_core::{InvocationState, UsageRecord};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{LedgerError, LedgerResult};
use crate::gateway::Gateway;

const STALE_STATES: [InvocationState; 3] = [
    InvocationState::Requested,
    InvocationState::Charged,
    InvocationState::Failed,
];

/// Reconciliation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Minimum age of a record before it is touched. Must exceed the action timeout.
    pub stale_after: Duration,
    /// Maximum records settled per pass.
    pub batch_size: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(300),
            batch_size: 100,
        }
    }
}

/// Counts from one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    /// Stale records found.
    pub scanned: usize,
    /// Records refunded.
    pub refunded: usize,
    /// `Requested` records closed as never charged.
    pub rejected: usize,
    /// Records whose refund failed again.
    pub failed: usize,
    /// Records that moved on before they could be settled.
    pub skipped: usize,
}

enum Settlement {
    Refunded,
    Rejected,
    Failed,
    Skipped,
}

/// Settles stale invocations.
#[derive(Clone)]
pub struct Reconciler {
    gateway: Gateway,
    config: ReconcileConfig,
}

impl Reconciler {
    /// Create a reconciler sharing `gateway`'s ledger and invocation locks.
    #[must_use]
    pub const fn new(gateway: Gateway, config: ReconcileConfig) -> Self {
        Self { gateway, config }
    }

    /// Run one pass.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidRequest` if `stale_after` is out of range.
    /// - `LedgerError::Unavailable` if stale records cannot be listed.
    pub async fn run_once(&self) -> LedgerResult<ReconciliationReport> {
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .map_err(|e| LedgerError::InvalidRequest(format!("stale_after out of range: {e}")))?;
        let cutoff = Utc::now() - stale_after;

        let store = self.gateway.ledger().store();
        let records = store
            .list_stale_usage(&STALE_STATES, cutoff, self.config.batch_size)
            .await?;

        let mut report = ReconciliationReport {
            scanned: records.len(),
            ..ReconciliationReport::default()
        };

        for stale in records {
            let _guard = self.gateway.lock_invocation(stale.invocation_id).await;

            // Reload under the lock; the gateway may have settled it meanwhile.
            let current = match store.get_usage(&stale.invocation_id).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!(
                        invocation_id = %stale.invocation_id,
                        error = %e,
                        "Failed to reload usage record"
                    );
                    report.failed += 1;
                    continue;
                }
            };

            if current.updated_at > cutoff || !current.state.needs_reconciliation() {
                report.skipped += 1;
                continue;
            }

            match self.settle(current).await {
                Settlement::Refunded => report.refunded += 1,
                Settlement::Rejected => report.rejected += 1,
                Settlement::Failed => report.failed += 1,
                Settlement::Skipped => report.skipped += 1,
            }
        }

        if report.scanned > 0 {
            tracing::info!(
                scanned = %report.scanned,
                refunded = %report.refunded,
                rejected = %report.rejected,
                failed = %report.failed,
                skipped = %report.skipped,
                "Reconciliation pass finished"
            );
        }
        Ok(report)
    }

    async fn settle(&self, mut record: UsageRecord) -> Settlement {
        let debit_entry_id = match record.debit_entry_id {
            Some(id) => Some(id),
            None => {
                match self
                    .gateway
                    .ledger()
                    .store()
                    .find_debit(&record.account_id, &record.invocation_id)
                    .await
                {
                    Ok(found) => found.map(|entry| entry.id),
                    Err(e) => {
                        tracing::warn!(
                            invocation_id = %record.invocation_id,
                            error = %e,
                            "Debit lookup failed during reconciliation"
                        );
                        return Settlement::Failed;
                    }
                }
            }
        };

        let Some(debit_entry_id) = debit_entry_id else {
            if record.state != InvocationState::Requested
                || record.mark_rejected("abandoned before charge").is_err()
            {
                tracing::error!(
                    invocation_id = %record.invocation_id,
                    state = %record.state,
                    "Stale invocation has no debit"
                );
                return Settlement::Skipped;
            }
            self.gateway.persist(&record).await;
            tracing::info!(
                invocation_id = %record.invocation_id,
                account_id = %record.account_id,
                "Closed uncharged invocation"
            );
            return Settlement::Rejected;
        };

        let moved = match record.state {
            InvocationState::Requested => record
                .mark_charged(debit_entry_id)
                .and_then(|()| record.mark_failed(None, "interrupted before completion")),
            InvocationState::Charged => record.mark_failed(None, "interrupted before completion"),
            _ => Ok(()),
        };
        if let Err(e) = moved {
            tracing::error!(
                invocation_id = %record.invocation_id,
                error = %e,
                "Cannot reconcile invocation"
            );
            return Settlement::Skipped;
        }
        self.gateway.persist(&record).await;

        if self.gateway.settle_refund(&mut record, debit_entry_id).await {
            Settlement::Refunded
        } else {
            Settlement::Failed
        }
    }

    /// Run [`run_once`](Self::run_once) every `interval` on a background task.
    #[must_use]
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = self.run_once().await {
                    tracing::error!(?err, "Reconciliation pass failed");
                }
            }
        })
    }
}
