//! Storage layer for credit-meter.
//!
//! This crate persists accounts, ledger entries, usage records, the service
//! cost catalog and its change history behind the [`Store`] trait. Three
//! backends are provided:
//!
//! - [`MemoryStore`]: in-process maps, for tests and local runs
//! - [`PgStore`]: PostgreSQL through `sqlx`, with embedded migrations
//! - `RocksStore`: `RocksDB` with column families (feature `rocksdb-backend`)
//!
//! # Atomicity
//!
//! [`Store::debit`], [`Store::refund`] and [`Store::credit`] are the only
//! balance mutations. Each one checks, appends the entry and updates the
//! account projection as a single atomic step, serialized per account:
//! under a [`KeyedLocks`] guard for the memory and `RocksDB` backends, under
//! a row lock inside a transaction for PostgreSQL.
//!
//! # Example
//!
//! ```no_run
//! use credit_meter_store::{CreditRequest, MemoryStore, Store};
//! use credit_meter_core::AccountId;
//!
//! # async fn example() -> credit_meter_store::Result<()> {
//! let store = MemoryStore::new();
//! let account_id = AccountId::generate();
//!
//! store
//!     .credit(&CreditRequest {
//!         account_id,
//!         amount: 100,
//!         description: "Starter pack".into(),
//!         metadata: serde_json::Value::Null,
//!     })
//!     .await?;
//!
//! let account = store.ensure_account(&account_id).await?;
//! assert_eq!(account.balance, 100);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod locks;
pub mod memory;
pub mod postgres;
mod posting;

#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use locks::{KeyedGuard, KeyedLocks};
pub use memory::MemoryStore;
pub use postgres::PgStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credit_meter_core::{
    Account, AccountId, DebitReceipt, EntryId, InvocationId, InvocationState, LedgerEntry,
    RefundReceipt, ServiceCode, ServiceCost, ServiceCostChange, ServiceStatistics, UsageRecord,
};

/// A request to charge an account for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct DebitRequest {
    /// The account to charge.
    pub account_id: AccountId,
    /// The service being paid for.
    pub service_code: ServiceCode,
    /// Positive price in credits.
    pub amount: i64,
    /// Invocation ID; at most one debit per account and key.
    pub idempotency_key: InvocationId,
    /// Opaque metadata stored on the entry.
    pub metadata: serde_json::Value,
}

/// A request to add purchased or granted credits.
#[derive(Debug, Clone, PartialEq)]
pub struct CreditRequest {
    /// The account to credit.
    pub account_id: AccountId,
    /// Positive amount in credits.
    pub amount: i64,
    /// Human-readable reason (pack name, promotion, ...).
    pub description: String,
    /// Opaque metadata stored on the entry (payment reference, ...).
    pub metadata: serde_json::Value,
}

/// The storage trait defining all persistence operations.
///
/// This trait abstracts the storage layer, allowing for different
/// implementations (PostgreSQL, `RocksDB`, in-memory for testing).
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Get an account by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>>;

    /// Get an account, creating it with a zero balance if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn ensure_account(&self, account_id: &AccountId) -> Result<Account>;

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    /// Atomically check the balance and append a debit.
    ///
    /// A second call with the same account and idempotency key returns the
    /// original entry with `replayed = true` and charges nothing.
    ///
    /// # Errors
    ///
    /// - `StoreError::InsufficientCredits` if the balance is below the amount.
    /// - `StoreError::Domain` for a non-positive amount.
    async fn debit(&self, request: &DebitRequest) -> Result<DebitReceipt>;

    /// Atomically append the refund of a debit.
    ///
    /// Idempotent: refunding an already refunded debit returns the existing
    /// refund with `replayed = true`.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the entry doesn't exist.
    /// - `StoreError::Domain` if the entry is not a debit.
    async fn refund(&self, debit_entry_id: &EntryId, reason: &str) -> Result<RefundReceipt>;

    /// Append a purchase, creating the account if needed.
    ///
    /// # Errors
    ///
    /// `StoreError::Domain` for a non-positive amount.
    async fn credit(&self, request: &CreditRequest) -> Result<LedgerEntry>;

    /// Get a ledger entry by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_entry(&self, entry_id: &EntryId) -> Result<Option<LedgerEntry>>;

    /// Find the debit recorded for an idempotency key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_debit(
        &self,
        account_id: &AccountId,
        idempotency_key: &InvocationId,
    ) -> Result<Option<LedgerEntry>>;

    /// Find the refund of a debit, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_refund(&self, debit_entry_id: &EntryId) -> Result<Option<LedgerEntry>>;

    /// List entries for an account, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_entries(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>>;

    /// Every entry of an account, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn all_entries(&self, account_id: &AccountId) -> Result<Vec<LedgerEntry>>;

    // =========================================================================
    // Usage Operations
    // =========================================================================

    /// Insert or replace a usage record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn put_usage(&self, record: &UsageRecord) -> Result<()>;

    /// Get a usage record by invocation ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_usage(&self, invocation_id: &InvocationId) -> Result<Option<UsageRecord>>;

    /// Usage records of an account, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_usage(&self, account_id: &AccountId, limit: usize) -> Result<Vec<UsageRecord>>;

    /// Records in one of `states` not updated since `older_than`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_stale_usage(
        &self,
        states: &[InvocationState],
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<UsageRecord>>;

    /// Per-service usage over records created at or after `since` (all
    /// records when `None`), ordered by service code.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn service_statistics(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ServiceStatistics>>;

    // =========================================================================
    // Catalog Operations
    // =========================================================================

    /// Get the cost of a service, active or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_service_cost(&self, service_code: &ServiceCode) -> Result<Option<ServiceCost>>;

    /// All service costs, active or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_service_costs(&self) -> Result<Vec<ServiceCost>>;

    /// Insert or replace the cost of a service and append the change to its
    /// history, as one atomic step per service.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn put_service_cost(
        &self,
        cost: &ServiceCost,
        changed_by: &str,
        reason: Option<&str>,
    ) -> Result<ServiceCostChange>;

    /// Cost changes, newest first, for one service or all of them.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_cost_changes(
        &self,
        service_code: Option<&ServiceCode>,
        limit: usize,
    ) -> Result<Vec<ServiceCostChange>>;

    // =========================================================================
    // Health
    // =========================================================================

    /// Check the backend is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot serve requests.
    async fn ping(&self) -> Result<()>;
}
