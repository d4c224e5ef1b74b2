//! Credit ledger.
//!
//! The ledger is the only way balances change. It delegates the atomic
//! check-and-append to the [`Store`] and adds bounded retries for transient
//! storage failures. Before retrying a debit it looks the debit up by its
//! idempotency key, so a commit whose acknowledgement was lost is never
//! charged twice.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use credit_meter_core::{
    projected_balance, Account, AccountId, DebitReceipt, EntryId, InvocationId, LedgerEntry,
    RefundReceipt, ServiceCode, ServiceStatistics, UsageRecord,
};
use credit_meter_store::{CreditRequest, DebitRequest, Store, StoreError};
use serde::Serialize;

use crate::error::{LedgerError, LedgerResult};

/// Default number of usage records returned by [`Ledger::usage_history`].
pub const DEFAULT_USAGE_LIMIT: usize = 50;

/// Maximum number of attempts for a storage operation.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Initial backoff duration for retries (doubles with each attempt).
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff duration for retries.
const DEFAULT_MAX_BACKOFF_MS: u64 = 5000;

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `retryable` decides which errors are worth another attempt.
    pub(crate) async fn run<T, E, F, Fut>(
        &self,
        operation: &'static str,
        retryable: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if !retryable(&e) || attempt >= self.max_attempts.max(1) {
                        return Err(e);
                    }

                    let backoff = self.backoff(attempt);
                    tracing::debug!(
                        operation = %operation,
                        attempt = %attempt,
                        backoff_ms = %backoff.as_millis(),
                        error = %e,
                        "Storage operation failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// Result of comparing an account's projection with its entry log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectionCheck {
    /// The audited account.
    pub account_id: AccountId,
    /// Balance stored on the account.
    pub balance: i64,
    /// Signed sum of the account's entries.
    pub projected: i64,
    /// Number of entries summed.
    pub entry_count: usize,
    /// Whether balance and projection agree and the balance is non-negative.
    pub consistent: bool,
}

/// Credit ledger over a [`Store`].
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn Store>,
    retry: RetryPolicy,
}

impl Ledger {
    /// Create a ledger with the default retry policy.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The retry policy in use.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// The account, created with a zero balance if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Unavailable` if the store cannot be reached.
    pub async fn account(&self, account_id: &AccountId) -> LedgerResult<Account> {
        let account = self
            .retry
            .run("ensure_account", StoreError::is_transient, || {
                self.store.ensure_account(account_id)
            })
            .await?;
        Ok(account)
    }

    /// Current balance, read from the store.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Unavailable` if the store cannot be reached.
    pub async fn balance(&self, account_id: &AccountId) -> LedgerResult<i64> {
        Ok(self.account(account_id).await?.balance)
    }

    /// Charge `amount` credits, at most once per `idempotency_key`.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InsufficientCredits` if the balance does not cover `amount`.
    /// - `LedgerError::InvalidRequest` for a non-positive amount.
    /// - `LedgerError::Unavailable` once retries are exhausted.
    pub async fn debit(
        &self,
        account_id: &AccountId,
        service_code: &ServiceCode,
        amount: i64,
        idempotency_key: InvocationId,
        metadata: serde_json::Value,
    ) -> LedgerResult<DebitReceipt> {
        let request = DebitRequest {
            account_id: *account_id,
            service_code: service_code.clone(),
            amount,
            idempotency_key,
            metadata,
        };

        let mut attempt = 0;
        loop {
            let err = match self.store.debit(&request).await {
                Ok(receipt) => {
                    tracing::info!(
                        account_id = %account_id,
                        service_code = %service_code,
                        amount = %amount,
                        balance = %receipt.balance,
                        replayed = %receipt.replayed,
                        "Debit recorded"
                    );
                    return Ok(receipt);
                }
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e.into()),
            };

            // The failed attempt may have committed; look before charging again.
            if let Ok(Some(entry)) = self.store.find_debit(account_id, &idempotency_key).await {
                tracing::info!(
                    account_id = %account_id,
                    entry_id = %entry.id,
                    error = %err,
                    "Debit committed despite storage error"
                );
                return Ok(DebitReceipt {
                    balance: entry.balance_after,
                    entry,
                    replayed: false,
                });
            }

            attempt += 1;
            if attempt >= self.retry.max_attempts.max(1) {
                tracing::warn!(
                    account_id = %account_id,
                    attempt = %attempt,
                    error = %err,
                    "Debit failed after max retries"
                );
                return Err(LedgerError::Unavailable(err.to_string()));
            }

            let backoff = self.retry.backoff(attempt);
            tracing::debug!(
                account_id = %account_id,
                attempt = %attempt,
                backoff_ms = %backoff.as_millis(),
                error = %err,
                "Debit failed, retrying"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    /// Return the credits of a debit. Idempotent per debit.
    ///
    /// # Errors
    ///
    /// - `LedgerError::NotFound` if the entry does not exist.
    /// - `LedgerError::InvalidRequest` if the entry is not a debit.
    /// - `LedgerError::Unavailable` once retries are exhausted.
    pub async fn refund(&self, debit_entry_id: &EntryId, reason: &str) -> LedgerResult<RefundReceipt> {
        let receipt = self
            .retry
            .run("refund", StoreError::is_transient, || {
                self.store.refund(debit_entry_id, reason)
            })
            .await?;

        tracing::info!(
            account_id = %receipt.entry.account_id,
            debit_entry_id = %debit_entry_id,
            amount = %receipt.entry.amount,
            balance = %receipt.balance,
            replayed = %receipt.replayed,
            "Refund recorded"
        );
        Ok(receipt)
    }

    /// Add purchased or granted credits.
    ///
    /// Credits carry no idempotency key, so only failures known to have
    /// happened before the commit are retried.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidRequest` for a non-positive amount.
    /// - `LedgerError::Unavailable` if the store cannot be reached.
    pub async fn credit(
        &self,
        account_id: &AccountId,
        amount: i64,
        reason: impl Into<String>,
        metadata: serde_json::Value,
    ) -> LedgerResult<LedgerEntry> {
        let request = CreditRequest {
            account_id: *account_id,
            amount,
            description: reason.into(),
            metadata,
        };

        let entry = self
            .retry
            .run(
                "credit",
                |e: &StoreError| matches!(e, StoreError::Transient(_)),
                || self.store.credit(&request),
            )
            .await?;

        tracing::info!(
            account_id = %account_id,
            amount = %amount,
            balance = %entry.balance_after,
            "Credits added"
        );
        Ok(entry)
    }

    /// Ledger history, newest first.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Unavailable` if the store cannot be reached.
    pub async fn entries(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let entries = self
            .retry
            .run("list_entries", StoreError::is_transient, || {
                self.store.list_entries(account_id, limit, offset)
            })
            .await?;
        Ok(entries)
    }

    /// Usage records of an account, newest first.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Unavailable` if the store cannot be reached.
    pub async fn usage_history(
        &self,
        account_id: &AccountId,
        limit: Option<usize>,
    ) -> LedgerResult<Vec<UsageRecord>> {
        let limit = limit.unwrap_or(DEFAULT_USAGE_LIMIT);
        let records = self
            .retry
            .run("list_usage", StoreError::is_transient, || {
                self.store.list_usage(account_id, limit)
            })
            .await?;
        Ok(records)
    }

    /// Per-service usage since `since` (everything when `None`).
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Unavailable` if the store cannot be reached.
    pub async fn service_statistics(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> LedgerResult<Vec<ServiceStatistics>> {
        let statistics = self
            .retry
            .run("service_statistics", StoreError::is_transient, || {
                self.store.service_statistics(since)
            })
            .await?;
        Ok(statistics)
    }

    /// Compare the stored balance with the sum of the entry log.
    ///
    /// # Errors
    ///
    /// - `LedgerError::NotFound` if the account does not exist.
    /// - `LedgerError::Unavailable` if the store cannot be reached.
    pub async fn verify(&self, account_id: &AccountId) -> LedgerResult<ProjectionCheck> {
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound {
                entity: "account",
                id: account_id.to_string(),
            })?;
        let entries = self.store.all_entries(account_id).await?;
        let projected = projected_balance(&entries);
        let consistent = projected == account.balance && account.balance >= 0;

        if !consistent {
            tracing::error!(
                account_id = %account_id,
                balance = %account.balance,
                projected = %projected,
                "Balance does not match ledger"
            );
        }

        Ok(ProjectionCheck {
            account_id: *account_id,
            balance: account.balance,
            projected,
            entry_count: entries.len(),
            consistent,
        })
    }
}
