//! Shared fixtures for gateway tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credit_meter_core::{
    Account, AccountId, DebitReceipt, EntryId, InvocationId, InvocationState, LedgerEntry, Price,
    RefundReceipt, ServiceCode, ServiceCost, ServiceCostChange, ServiceStatistics, UsageRecord,
};
use credit_meter_gateway::{
    Alert, AlertSink, Catalog, CatalogError, Gateway, GatewayConfig, Ledger, LedgerEvent, Notifier,
    NotifyError, RetryPolicy, StaticCatalog,
};
use credit_meter_store::{CreditRequest, DebitRequest, MemoryStore, Result, Store, StoreError};

pub const SERVICE: &str = "ai_matching";

pub fn code() -> ServiceCode {
    ServiceCode::new(SERVICE).unwrap()
}

/// Catalog with one service costing `cost`.
pub fn catalog(cost: i64) -> StaticCatalog {
    StaticCatalog::new([ServiceCost::new(code(), "Matching", "matching", cost).unwrap()])
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: std::time::Duration::from_millis(1),
        max_backoff: std::time::Duration::from_millis(5),
    }
}

pub struct Harness {
    pub gateway: Gateway,
    pub store: Arc<FlakyStore>,
    pub alerts: Arc<RecordingAlerts>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new(cost: i64) -> Self {
        Self::with_config(cost, GatewayConfig::default())
    }

    pub fn with_config(cost: i64, mut config: GatewayConfig) -> Self {
        config.record_retry = fast_retry();
        let store = Arc::new(FlakyStore::default());
        let alerts = Arc::new(RecordingAlerts::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let gateway = Gateway::with_collaborators(
            Arc::new(catalog(cost)),
            Ledger::new(store.clone()).with_retry(fast_retry()),
            config,
            notifier.clone(),
            alerts.clone(),
        );
        Self {
            gateway,
            store,
            alerts,
            notifier,
        }
    }

    pub async fn funded(&self, amount: i64) -> AccountId {
        let account_id = AccountId::generate();
        if amount > 0 {
            self.gateway
                .ledger()
                .credit(&account_id, amount, "Starter pack", serde_json::Value::Null)
                .await
                .unwrap();
        } else {
            self.gateway.ledger().balance(&account_id).await.unwrap();
        }
        account_id
    }

    pub fn balance(&self, account_id: &AccountId) -> i64 {
        self.store.inner.balance_of(account_id)
    }

    pub async fn state(&self, invocation_id: &InvocationId) -> InvocationState {
        self.store
            .inner
            .get_usage(invocation_id)
            .await
            .unwrap()
            .unwrap()
            .state
    }
}

pub fn request(account_id: AccountId, invocation_id: InvocationId) -> credit_meter_gateway::InvocationRequest {
    credit_meter_gateway::InvocationRequest {
        account_id,
        service_code: code(),
        invocation_id,
        metadata: serde_json::json!({"job_id": "job-1"}),
    }
}

// ============================================================================
// Store with injectable failures
// ============================================================================

/// Memory store whose operations can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    /// Every operation fails with a transient error.
    pub down: AtomicBool,
    /// Debits fail with a transient error before committing.
    pub fail_debits: AtomicBool,
    /// The next N debits commit but report an unknown outcome.
    pub lose_debit_acks: AtomicUsize,
    /// Refunds fail with a transient error.
    pub fail_refunds: AtomicBool,
    pub debit_calls: AtomicUsize,
}

impl FlakyStore {
    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Transient("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        self.check()?;
        self.inner.get_account(account_id).await
    }

    async fn ensure_account(&self, account_id: &AccountId) -> Result<Account> {
        self.check()?;
        self.inner.ensure_account(account_id).await
    }

    async fn debit(&self, request: &DebitRequest) -> Result<DebitReceipt> {
        self.check()?;
        self.debit_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_debits.load(Ordering::SeqCst) {
            return Err(StoreError::Transient("pool timed out".into()));
        }
        let receipt = self.inner.debit(request).await?;
        let lost = self
            .lose_debit_acks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            return Err(StoreError::CommitUnknown("connection reset".into()));
        }
        Ok(receipt)
    }

    async fn refund(&self, debit_entry_id: &EntryId, reason: &str) -> Result<RefundReceipt> {
        self.check()?;
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(StoreError::Transient("pool timed out".into()));
        }
        self.inner.refund(debit_entry_id, reason).await
    }

    async fn credit(&self, request: &CreditRequest) -> Result<LedgerEntry> {
        self.check()?;
        self.inner.credit(request).await
    }

    async fn get_entry(&self, entry_id: &EntryId) -> Result<Option<LedgerEntry>> {
        self.check()?;
        self.inner.get_entry(entry_id).await
    }

    async fn find_debit(
        &self,
        account_id: &AccountId,
        idempotency_key: &InvocationId,
    ) -> Result<Option<LedgerEntry>> {
        self.check()?;
        self.inner.find_debit(account_id, idempotency_key).await
    }

    async fn find_refund(&self, debit_entry_id: &EntryId) -> Result<Option<LedgerEntry>> {
        self.check()?;
        self.inner.find_refund(debit_entry_id).await
    }

    async fn list_entries(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        self.check()?;
        self.inner.list_entries(account_id, limit, offset).await
    }

    async fn all_entries(&self, account_id: &AccountId) -> Result<Vec<LedgerEntry>> {
        self.check()?;
        self.inner.all_entries(account_id).await
    }

    async fn put_usage(&self, record: &UsageRecord) -> Result<()> {
        self.check()?;
        self.inner.put_usage(record).await
    }

    async fn get_usage(&self, invocation_id: &InvocationId) -> Result<Option<UsageRecord>> {
        self.check()?;
        self.inner.get_usage(invocation_id).await
    }

    async fn list_usage(&self, account_id: &AccountId, limit: usize) -> Result<Vec<UsageRecord>> {
        self.check()?;
        self.inner.list_usage(account_id, limit).await
    }

    async fn list_stale_usage(
        &self,
        states: &[InvocationState],
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<UsageRecord>> {
        self.check()?;
        self.inner.list_stale_usage(states, older_than, limit).await
    }

    async fn service_statistics(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ServiceStatistics>> {
        self.check()?;
        self.inner.service_statistics(since).await
    }

    async fn get_service_cost(&self, service_code: &ServiceCode) -> Result<Option<ServiceCost>> {
        self.check()?;
        self.inner.get_service_cost(service_code).await
    }

    async fn list_service_costs(&self) -> Result<Vec<ServiceCost>> {
        self.check()?;
        self.inner.list_service_costs().await
    }

    async fn put_service_cost(
        &self,
        cost: &ServiceCost,
        changed_by: &str,
        reason: Option<&str>,
    ) -> Result<ServiceCostChange> {
        self.check()?;
        self.inner.put_service_cost(cost, changed_by, reason).await
    }

    async fn list_cost_changes(
        &self,
        service_code: Option<&ServiceCode>,
        limit: usize,
    ) -> Result<Vec<ServiceCostChange>> {
        self.check()?;
        self.inner.list_cost_changes(service_code, limit).await
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}

// ============================================================================
// Collaborators
// ============================================================================

/// Catalog whose data source is down.
pub struct DownCatalog;

#[async_trait]
impl Catalog for DownCatalog {
    async fn cost(&self, _service_code: &ServiceCode) -> std::result::Result<Option<Price>, CatalogError> {
        Err(CatalogError::Unavailable("pricing table unreachable".into()))
    }

    async fn list_active(&self) -> std::result::Result<Vec<ServiceCost>, CatalogError> {
        Err(CatalogError::Unavailable("pricing table unreachable".into()))
    }
}

#[derive(Default)]
pub struct RecordingAlerts {
    pub alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlerts {
    pub fn count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }
}

impl AlertSink for RecordingAlerts {
    fn raise(&self, alert: &Alert) {
        self.alerts.lock().unwrap().push(alert.clone());
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<LedgerEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<LedgerEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &LedgerEvent) -> std::result::Result<(), NotifyError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
