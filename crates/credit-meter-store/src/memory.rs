//! In-memory storage implementation.
//!
//! Used by tests and local runs without a database. Maps live behind short
//! synchronous locks that are never held across an await; balance mutations
//! are serialized per account with [`KeyedLocks`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credit_meter_core::{
    service_statistics, Account, AccountId, DebitReceipt, EntryId, EntryKind, InvocationId,
    InvocationState, LedgerEntry, RefundReceipt, ServiceCode, ServiceCost, ServiceCostChange,
    ServiceStatistics, UsageRecord,
};

use crate::error::{Result, StoreError};
use crate::locks::KeyedLocks;
use crate::posting::{post_credit, post_debit, post_refund};
use crate::{CreditRequest, DebitRequest, Store};

#[derive(Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    entries: HashMap<EntryId, LedgerEntry>,
    entries_by_account: HashMap<AccountId, Vec<EntryId>>,
    debits_by_key: HashMap<(AccountId, InvocationId), EntryId>,
    refunds_by_debit: HashMap<EntryId, EntryId>,
    usage: HashMap<InvocationId, UsageRecord>,
    service_costs: BTreeMap<ServiceCode, ServiceCost>,
    cost_history: Vec<ServiceCostChange>,
}

impl State {
    fn append(&mut self, account: Account, entry: LedgerEntry) {
        match (entry.kind, entry.idempotency_key, entry.related_entry_id) {
            (EntryKind::Debit, Some(key), _) => {
                self.debits_by_key.insert((entry.account_id, key), entry.id);
            }
            (EntryKind::Refund, _, Some(debit_id)) => {
                self.refunds_by_debit.insert(debit_id, entry.id);
            }
            _ => {}
        }
        self.entries_by_account
            .entry(entry.account_id)
            .or_default()
            .push(entry.id);
        self.accounts.insert(account.account_id, account);
        self.entries.insert(entry.id, entry);
    }
}

/// In-memory implementation of [`Store`].
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    account_locks: KeyedLocks<AccountId>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current balance, zero for an unknown account. Does not create it.
    #[must_use]
    pub fn balance_of(&self, account_id: &AccountId) -> i64 {
        self.read().accounts.get(account_id).map_or(0, |a| a.balance)
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Store for MemoryStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        Ok(self.read().accounts.get(account_id).cloned())
    }

    async fn ensure_account(&self, account_id: &AccountId) -> Result<Account> {
        let mut state = self.write();
        Ok(state
            .accounts
            .entry(*account_id)
            .or_insert_with(|| Account::new(*account_id))
            .clone())
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    async fn debit(&self, request: &DebitRequest) -> Result<DebitReceipt> {
        let _guard = self.account_locks.lock(request.account_id).await;

        let (account, existing) = {
            let state = self.read();
            let existing = state
                .debits_by_key
                .get(&(request.account_id, request.idempotency_key))
                .and_then(|id| state.entries.get(id))
                .cloned();
            (state.accounts.get(&request.account_id).cloned(), existing)
        };

        if let Some(entry) = existing {
            return Ok(DebitReceipt {
                balance: account.map_or(0, |a| a.balance),
                entry,
                replayed: true,
            });
        }

        let (account, entry) = post_debit(account, request)?;
        let balance = account.balance;
        self.write().append(account, entry.clone());

        Ok(DebitReceipt {
            entry,
            balance,
            replayed: false,
        })
    }

    async fn refund(&self, debit_entry_id: &EntryId, reason: &str) -> Result<RefundReceipt> {
        let debit = self
            .read()
            .entries
            .get(debit_entry_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("ledger entry", debit_entry_id))?;

        let _guard = self.account_locks.lock(debit.account_id).await;

        let (account, existing) = {
            let state = self.read();
            let existing = state
                .refunds_by_debit
                .get(debit_entry_id)
                .and_then(|id| state.entries.get(id))
                .cloned();
            (state.accounts.get(&debit.account_id).cloned(), existing)
        };

        if let Some(entry) = existing {
            return Ok(RefundReceipt {
                balance: account.map_or(0, |a| a.balance),
                entry,
                replayed: true,
            });
        }

        let (account, entry) = post_refund(account, &debit, reason)?;
        let balance = account.balance;
        self.write().append(account, entry.clone());

        Ok(RefundReceipt {
            entry,
            balance,
            replayed: false,
        })
    }

    async fn credit(&self, request: &CreditRequest) -> Result<LedgerEntry> {
        let _guard = self.account_locks.lock(request.account_id).await;

        let account = self.read().accounts.get(&request.account_id).cloned();
        let (account, entry) = post_credit(account, request)?;
        self.write().append(account, entry.clone());

        Ok(entry)
    }

    async fn get_entry(&self, entry_id: &EntryId) -> Result<Option<LedgerEntry>> {
        Ok(self.read().entries.get(entry_id).cloned())
    }

    async fn find_debit(
        &self,
        account_id: &AccountId,
        idempotency_key: &InvocationId,
    ) -> Result<Option<LedgerEntry>> {
        let state = self.read();
        Ok(state
            .debits_by_key
            .get(&(*account_id, *idempotency_key))
            .and_then(|id| state.entries.get(id))
            .cloned())
    }

    async fn find_refund(&self, debit_entry_id: &EntryId) -> Result<Option<LedgerEntry>> {
        let state = self.read();
        Ok(state
            .refunds_by_debit
            .get(debit_entry_id)
            .and_then(|id| state.entries.get(id))
            .cloned())
    }

    async fn list_entries(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let state = self.read();
        let Some(ids) = state.entries_by_account.get(account_id) else {
            return Ok(Vec::new());
        };

        Ok(ids
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .filter_map(|id| state.entries.get(id).cloned())
            .collect())
    }

    async fn all_entries(&self, account_id: &AccountId) -> Result<Vec<LedgerEntry>> {
        let state = self.read();
        Ok(state
            .entries_by_account
            .get(account_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.entries.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    // =========================================================================
    // Usage Operations
    // =========================================================================

    async fn put_usage(&self, record: &UsageRecord) -> Result<()> {
        self.write()
            .usage
            .insert(record.invocation_id, record.clone());
        Ok(())
    }

    async fn get_usage(&self, invocation_id: &InvocationId) -> Result<Option<UsageRecord>> {
        Ok(self.read().usage.get(invocation_id).cloned())
    }

    async fn list_usage(&self, account_id: &AccountId, limit: usize) -> Result<Vec<UsageRecord>> {
        let mut records: Vec<UsageRecord> = self
            .read()
            .usage
            .values()
            .filter(|r| r.account_id == *account_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn list_stale_usage(
        &self,
        states: &[InvocationState],
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<UsageRecord>> {
        let mut records: Vec<UsageRecord> = self
            .read()
            .usage
            .values()
            .filter(|r| states.contains(&r.state) && r.updated_at < older_than)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn service_statistics(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ServiceStatistics>> {
        let state = self.read();
        Ok(service_statistics(
            state
                .usage
                .values()
                .filter(|r| since.map_or(true, |since| r.created_at >= since)),
        ))
    }

    // =========================================================================
    // Catalog Operations
    // =========================================================================

    async fn get_service_cost(&self, service_code: &ServiceCode) -> Result<Option<ServiceCost>> {
        Ok(self.read().service_costs.get(service_code).cloned())
    }

    async fn list_service_costs(&self) -> Result<Vec<ServiceCost>> {
        Ok(self.read().service_costs.values().cloned().collect())
    }

    async fn put_service_cost(
        &self,
        cost: &ServiceCost,
        changed_by: &str,
        reason: Option<&str>,
    ) -> Result<ServiceCostChange> {
        let mut state = self.write();
        let previous = state
            .service_costs
            .insert(cost.service_code.clone(), cost.clone());
        let change = ServiceCostChange::between(
            previous.as_ref(),
            cost,
            changed_by,
            reason.map(str::to_string),
        );
        state.cost_history.push(change.clone());
        Ok(change)
    }

    async fn list_cost_changes(
        &self,
        service_code: Option<&ServiceCode>,
        limit: usize,
    ) -> Result<Vec<ServiceCostChange>> {
        Ok(self
            .read()
            .cost_history
            .iter()
            .rev()
            .filter(|c| service_code.map_or(true, |code| c.service_code == *code))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
