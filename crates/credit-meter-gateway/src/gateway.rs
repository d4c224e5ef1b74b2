//! Metering gateway.
//!
//! The gateway is the only component that couples accounting to behavior.
//! [`Gateway::invoke`] prices the service, debits the account, runs the
//! caller's action and settles the outcome:
//!
//! ```text
//! lookup ─► Requested ─► debit ─► Charged ─► action ─┬─► Completed
//!                          │                         └─► Failed ─► refund ─► Refunded
//!                          └─► Rejected (insufficient credits)
//! ```
//!
//! Everything after the debit runs in a spawned task that owns the
//! invocation lock, so dropping the caller's future cannot skip the refund.

use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use credit_meter_core::{
    AccountId, DebitReceipt, EntryId, InvocationId, InvocationState, LedgerEntry, Price,
    ServiceCode, UsageRecord,
};
use credit_meter_store::{KeyedGuard, KeyedLocks, Store};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::alert::{Alert, AlertSink, TracingAlertSink};
use crate::catalog::Catalog;
use crate::error::{GatewayError, GatewayResult, LedgerError};
use crate::ledger::{Ledger, RetryPolicy};
use crate::notify::{LedgerEvent, LedgerEventKind, NoopNotifier, Notifier};

/// Default bound on one action call.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Gateway settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayConfig {
    /// How long an action may run before it counts as failed.
    pub action_timeout: Duration,
    /// Retries for usage record writes after the debit.
    pub record_retry: RetryPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            record_retry: RetryPolicy::default(),
        }
    }
}

/// One paid invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// The paying account.
    pub account_id: AccountId,
    /// The service to run.
    pub service_code: ServiceCode,
    /// Caller-generated ID, reused on retry.
    pub invocation_id: InvocationId,
    /// Opaque metadata stored on the debit and the usage record.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Result of a successful invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationReceipt<T> {
    /// The invocation.
    pub invocation_id: InvocationId,
    /// The service that ran.
    pub service_code: ServiceCode,
    /// The action's output.
    pub output: T,
    /// Credits charged.
    pub cost: i64,
    /// Balance right after the debit.
    pub balance: i64,
    /// The debit entry.
    pub debit_entry_id: EntryId,
    /// Action latency.
    pub latency_ms: u64,
    /// Whether the output was replayed from an earlier completed attempt.
    pub replayed: bool,
}

/// Answer to "can this account pay for this service".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceCheck {
    /// The service asked about.
    pub service_code: ServiceCode,
    /// Current price.
    pub required: i64,
    /// Current balance.
    pub available: i64,
    /// `available >= required`.
    pub sufficient: bool,
}

/// Shared state of a [`Gateway`].
struct Inner {
    catalog: Arc<dyn Catalog>,
    ledger: Ledger,
    notifier: Arc<dyn Notifier>,
    alerts: Arc<dyn AlertSink>,
    config: GatewayConfig,
    invocation_locks: KeyedLocks<InvocationId>,
}

/// Runs paid actions.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

impl Gateway {
    /// Create a gateway with no notifier and tracing alerts.
    #[must_use]
    pub fn new(catalog: Arc<dyn Catalog>, ledger: Ledger, config: GatewayConfig) -> Self {
        Self::with_collaborators(
            catalog,
            ledger,
            config,
            Arc::new(NoopNotifier),
            Arc::new(TracingAlertSink),
        )
    }

    /// Create a gateway with explicit notification and alert collaborators.
    #[must_use]
    pub fn with_collaborators(
        catalog: Arc<dyn Catalog>,
        ledger: Ledger,
        config: GatewayConfig,
        notifier: Arc<dyn Notifier>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                catalog,
                ledger,
                notifier,
                alerts,
                config,
                invocation_locks: KeyedLocks::new(),
            }),
        }
    }

    /// The ledger used for debits and refunds.
    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.inner.ledger
    }

    /// The pricing catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.inner.catalog
    }

    /// Gateway settings.
    #[must_use]
    pub fn config(&self) -> GatewayConfig {
        self.inner.config
    }

    fn store(&self) -> &Arc<dyn Store> {
        self.inner.ledger.store()
    }

    pub(crate) async fn lock_invocation(&self, invocation_id: InvocationId) -> KeyedGuard<InvocationId> {
        self.inner.invocation_locks.lock(invocation_id).await
    }

    /// Whether `account_id` can currently pay for `service_code`. Charges nothing.
    ///
    /// # Errors
    ///
    /// - `GatewayError::ServiceUnavailable` for an unknown or inactive service.
    /// - `GatewayError::CatalogUnavailable` / `LedgerUnavailable` on outages.
    pub async fn check_sufficient(
        &self,
        account_id: &AccountId,
        service_code: &ServiceCode,
    ) -> GatewayResult<BalanceCheck> {
        let price = self.price(service_code).await?;
        let available = self.inner.ledger.balance(account_id).await?;

        Ok(BalanceCheck {
            service_code: service_code.clone(),
            required: price.cost,
            available,
            sufficient: available >= price.cost,
        })
    }

    async fn price(&self, service_code: &ServiceCode) -> GatewayResult<Price> {
        self.inner
            .catalog
            .cost(service_code)
            .await?
            .ok_or_else(|| GatewayError::ServiceUnavailable(service_code.clone()))
    }

    /// Charge for and run `action`.
    ///
    /// The action runs only after the debit committed. If it fails, panics or
    /// exceeds the action timeout the charge is refunded and the caller gets
    /// the failure. Calls sharing an invocation ID are serialized; a retry of
    /// a completed invocation replays the stored output without charging.
    ///
    /// # Errors
    ///
    /// See [`GatewayError`]. No error leaves the account charged for an
    /// action that did not succeed, except while a refund is outstanding
    /// and alerted.
    pub async fn invoke<T, E, F, Fut>(
        &self,
        request: InvocationRequest,
        action: F,
    ) -> GatewayResult<InvocationReceipt<T>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize + DeserializeOwned + Send + 'static,
        E: Display + Send + 'static,
    {
        let guard = self.lock_invocation(request.invocation_id).await;

        let existing = self
            .store()
            .get_usage(&request.invocation_id)
            .await
            .map_err(|e| GatewayError::LedgerUnavailable(e.to_string()))?;

        let retry_of = match existing {
            Some(record) => {
                if record.account_id != request.account_id
                    || record.service_code != request.service_code
                {
                    return Err(GatewayError::InvalidRequest(format!(
                        "invocation {} belongs to another request",
                        request.invocation_id
                    )));
                }
                match record.state {
                    InvocationState::Completed => return self.replay(&record).await,
                    InvocationState::Failed | InvocationState::Refunded => {
                        return Err(GatewayError::PreviouslyFailed {
                            invocation_id: record.invocation_id,
                            message: record.error.unwrap_or_default(),
                            refunded: record.state == InvocationState::Refunded,
                        });
                    }
                    InvocationState::Requested | InvocationState::Charged => {
                        return Err(GatewayError::InvocationPending {
                            invocation_id: record.invocation_id,
                            state: record.state,
                        });
                    }
                    InvocationState::Rejected => Some(record),
                }
            }
            None => None,
        };

        let price = self.price(&request.service_code).await?;

        let mut record = match retry_of {
            Some(mut record) => {
                record
                    .restart(price.cost, request.metadata.clone())
                    .map_err(|e| GatewayError::Internal(e.to_string()))?;
                record
            }
            None => UsageRecord::requested(
                request.invocation_id,
                request.account_id,
                request.service_code.clone(),
                price.cost,
                request.metadata.clone(),
            ),
        };

        // Nothing is charged yet, so a failed write aborts cleanly.
        self.store()
            .put_usage(&record)
            .await
            .map_err(|e| GatewayError::LedgerUnavailable(e.to_string()))?;

        let debit = match self
            .inner
            .ledger
            .debit(
                &request.account_id,
                &request.service_code,
                price.cost,
                request.invocation_id,
                request.metadata.clone(),
            )
            .await
        {
            Ok(debit) => debit,
            Err(LedgerError::InsufficientCredits { balance, required }) => {
                tracing::info!(
                    invocation_id = %request.invocation_id,
                    account_id = %request.account_id,
                    service_code = %request.service_code,
                    balance = %balance,
                    required = %required,
                    "Invocation rejected: insufficient credits"
                );
                if record.mark_rejected("insufficient credits").is_ok() {
                    self.persist(&record).await;
                }
                return Err(GatewayError::InsufficientCredits { balance, required });
            }
            Err(e) => {
                // The record stays Requested; reconciliation settles it.
                tracing::warn!(
                    invocation_id = %request.invocation_id,
                    account_id = %request.account_id,
                    error = %e,
                    "Debit failed, action not run"
                );
                return Err(e.into());
            }
        };

        record
            .mark_charged(debit.entry.id)
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        self.persist(&record).await;
        self.notify(LedgerEventKind::Charged, &record, &debit.entry);

        let gateway = self.clone();
        let settled = tokio::spawn(async move {
            let _guard = guard;
            gateway.run_charged(record, debit, action).await
        });

        settled
            .await
            .map_err(|e| GatewayError::Internal(format!("invocation task lost: {e}")))?
    }

    async fn run_charged<T, E, F, Fut>(
        &self,
        mut record: UsageRecord,
        debit: DebitReceipt,
        action: F,
    ) -> GatewayResult<InvocationReceipt<T>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize + DeserializeOwned + Send + 'static,
        E: Display + Send + 'static,
    {
        let timeout = self.inner.config.action_timeout;
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            timeout,
            AssertUnwindSafe(async move { action().await }).catch_unwind(),
        )
        .await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let failure = match outcome {
            Ok(Ok(Ok(output))) => {
                let stored = serde_json::to_value(&output).unwrap_or_else(|e| {
                    tracing::warn!(
                        invocation_id = %record.invocation_id,
                        error = %e,
                        "Action output not serializable; replays will fail"
                    );
                    serde_json::Value::Null
                });
                record
                    .mark_completed(latency_ms, stored)
                    .map_err(|e| GatewayError::Internal(e.to_string()))?;
                self.persist(&record).await;

                tracing::info!(
                    invocation_id = %record.invocation_id,
                    account_id = %record.account_id,
                    service_code = %record.service_code,
                    cost = %record.cost,
                    latency_ms = %latency_ms,
                    "Invocation completed"
                );

                return Ok(InvocationReceipt {
                    invocation_id: record.invocation_id,
                    service_code: record.service_code,
                    output,
                    cost: record.cost,
                    balance: debit.balance,
                    debit_entry_id: debit.entry.id,
                    latency_ms,
                    replayed: false,
                });
            }
            Ok(Ok(Err(e))) => GatewayError::Action(e.to_string()),
            Ok(Err(_panic)) => GatewayError::Action("action panicked".into()),
            Err(_elapsed) => GatewayError::Timeout(timeout),
        };

        tracing::warn!(
            invocation_id = %record.invocation_id,
            account_id = %record.account_id,
            service_code = %record.service_code,
            latency_ms = %latency_ms,
            error = %failure,
            "Invocation failed, refunding"
        );

        record
            .mark_failed(Some(latency_ms), failure.to_string())
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        self.persist(&record).await;
        self.settle_refund(&mut record, debit.entry.id).await;

        Err(failure)
    }

    /// Refund a `Failed` record's debit and mark it `Refunded`.
    ///
    /// On failure an alert is raised and the record stays `Failed`.
    pub(crate) async fn settle_refund(&self, record: &mut UsageRecord, debit_entry_id: EntryId) -> bool {
        let reason = format!("Refund: {} failed", record.service_code);
        match self.inner.ledger.refund(&debit_entry_id, &reason).await {
            Ok(refund) => {
                if let Err(e) = record.mark_refunded(refund.entry.id) {
                    tracing::error!(
                        invocation_id = %record.invocation_id,
                        error = %e,
                        "Refunded invocation in unexpected state"
                    );
                    return true;
                }
                self.persist(record).await;
                self.notify(LedgerEventKind::Refunded, record, &refund.entry);
                true
            }
            Err(e) => {
                self.inner.alerts.raise(&Alert::RefundFailed {
                    invocation_id: record.invocation_id,
                    account_id: record.account_id,
                    debit_entry_id,
                    amount: record.cost,
                    error: e.to_string(),
                });
                false
            }
        }
    }

    /// Write a usage record after the debit, retrying transient failures.
    ///
    /// A record that cannot be written keeps its previous state in the store
    /// and is picked up by reconciliation.
    pub(crate) async fn persist(&self, record: &UsageRecord) -> bool {
        let result = self
            .inner
            .config
            .record_retry
            .run(
                "put_usage",
                credit_meter_store::StoreError::is_transient,
                || self.store().put_usage(record),
            )
            .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    invocation_id = %record.invocation_id,
                    state = %record.state,
                    error = %e,
                    "Failed to persist usage record"
                );
                false
            }
        }
    }

    async fn replay<T: DeserializeOwned>(
        &self,
        record: &UsageRecord,
    ) -> GatewayResult<InvocationReceipt<T>> {
        let output = serde_json::from_value(record.output.clone().unwrap_or_default())
            .map_err(|e| GatewayError::Internal(format!("stored output unreadable: {e}")))?;
        let debit_entry_id = record.debit_entry_id.ok_or_else(|| {
            GatewayError::Internal(format!(
                "completed invocation {} has no debit",
                record.invocation_id
            ))
        })?;
        let balance = self
            .store()
            .get_entry(&debit_entry_id)
            .await
            .map_err(|e| GatewayError::LedgerUnavailable(e.to_string()))?
            .map_or(0, |entry| entry.balance_after);

        tracing::debug!(
            invocation_id = %record.invocation_id,
            "Replaying completed invocation"
        );

        Ok(InvocationReceipt {
            invocation_id: record.invocation_id,
            service_code: record.service_code.clone(),
            output,
            cost: record.cost,
            balance,
            debit_entry_id,
            latency_ms: record.latency_ms.unwrap_or(0),
            replayed: true,
        })
    }

    fn notify(&self, kind: LedgerEventKind, record: &UsageRecord, entry: &LedgerEntry) {
        let event = LedgerEvent {
            kind,
            invocation_id: record.invocation_id,
            account_id: record.account_id,
            service_code: record.service_code.clone(),
            entry_id: entry.id,
            amount: entry.amount.abs(),
            balance: entry.balance_after,
            occurred_at: entry.created_at,
        };

        let notifier = Arc::clone(&self.inner.notifier);
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&event).await {
                tracing::warn!(
                    invocation_id = %event.invocation_id,
                    event = ?event.kind,
                    error = %e,
                    "Notification failed"
                );
            }
        });
    }
}
