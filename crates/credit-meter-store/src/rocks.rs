//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//! Each balance mutation writes the account, the entry and its indexes in one
//! `WriteBatch`, under the account's [`KeyedLocks`] guard.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use credit_meter_core::{
    service_statistics, Account, AccountId, ChangeId, DebitReceipt, EntryId, EntryKind,
    InvocationId, InvocationState, LedgerEntry, RefundReceipt, ServiceCode, ServiceCost,
    ServiceCostChange, ServiceStatistics, UsageRecord,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::locks::KeyedLocks;
use crate::posting::{post_credit, post_debit, post_refund};
use crate::schema::{all_column_families, cf};
use crate::{CreditRequest, DebitRequest, Store};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    account_locks: KeyedLocks<AccountId>,
    catalog_locks: KeyedLocks<ServiceCode>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            account_locks: KeyedLocks::new(),
            catalog_locks: KeyedLocks::new(),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get<T: serde::de::DeserializeOwned>(&self, family: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(family)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn get_entry_id(&self, family: &str, key: &[u8]) -> Result<Option<EntryId>> {
        let cf = self.cf(family)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| {
                keys::decode_entry_id(&data)
                    .ok_or_else(|| StoreError::Serialization("malformed entry id".into()))
            })
            .transpose()
    }

    fn load_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        self.get(cf::ACCOUNTS, &keys::account_key(account_id))
    }

    fn load_entry(&self, entry_id: &EntryId) -> Result<Option<LedgerEntry>> {
        self.get(cf::ENTRIES, &keys::entry_key(entry_id))
    }

    /// Write the account and the new entry with its indexes atomically.
    fn append(&self, account: &Account, entry: &LedgerEntry) -> Result<()> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_entries = self.cf(cf::ENTRIES)?;
        let cf_by_account = self.cf(cf::ENTRIES_BY_ACCOUNT)?;

        let entry_key = keys::entry_key(&entry.id);

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_accounts,
            keys::account_key(&account.account_id),
            Self::serialize(account)?,
        );
        batch.put_cf(&cf_entries, &entry_key, Self::serialize(entry)?);
        batch.put_cf(
            &cf_by_account,
            keys::account_entry_key(&entry.account_id, &entry.id),
            [],
        );

        match (entry.kind, entry.idempotency_key, entry.related_entry_id) {
            (EntryKind::Debit, Some(key), _) => {
                let cf_debits = self.cf(cf::DEBIT_KEYS)?;
                batch.put_cf(&cf_debits, keys::debit_key(&entry.account_id, &key), &entry_key);
            }
            (EntryKind::Refund, _, Some(debit_id)) => {
                let cf_refunds = self.cf(cf::REFUNDS)?;
                batch.put_cf(&cf_refunds, keys::entry_key(&debit_id), &entry_key);
            }
            _ => {}
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn account_entry_ids(&self, account_id: &AccountId) -> Result<Vec<EntryId>> {
        let cf_by_account = self.cf(cf::ENTRIES_BY_ACCOUNT)?;
        let prefix = keys::account_entries_prefix(account_id);

        let iter = self
            .db
            .iterator_cf(&cf_by_account, IteratorMode::From(&prefix, Direction::Forward));

        let mut ids = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            if let Some(id) = keys::entry_id_from_account_key(&key) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    fn load_change(&self, change_id: &ChangeId) -> Result<Option<ServiceCostChange>> {
        self.get(cf::COST_HISTORY, &keys::change_key(change_id))
    }

    /// Change IDs of one service, newest first.
    fn service_change_ids(
        &self,
        service_code: &ServiceCode,
        limit: usize,
    ) -> Result<Vec<ChangeId>> {
        let cf_by_service = self.cf(cf::COST_HISTORY_BY_SERVICE)?;
        let prefix = keys::service_changes_prefix(service_code);

        let iter = self
            .db
            .iterator_cf(&cf_by_service, IteratorMode::From(&prefix, Direction::Forward));

        let mut ids = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            if let Some(id) = keys::change_id_from_service_key(&key) {
                ids.push(id);
            }
        }
        ids.reverse();
        ids.truncate(limit);
        Ok(ids)
    }

    /// Change IDs across services, newest first.
    fn recent_change_ids(&self, limit: usize) -> Result<Vec<ChangeId>> {
        let cf_history = self.cf(cf::COST_HISTORY)?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(&cf_history, IteratorMode::End).take(limit) {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let bytes: [u8; 16] = key
                .as_ref()
                .try_into()
                .map_err(|_| StoreError::Serialization("malformed change id".into()))?;
            ids.push(ChangeId::from_bytes(bytes));
        }
        Ok(ids)
    }

    fn scan_usage(&self) -> Result<Vec<UsageRecord>> {
        let cf_usage = self.cf(cf::USAGE)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(&cf_usage, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            records.push(Self::deserialize(&value)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl Store for RocksStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        self.load_account(account_id)
    }

    async fn ensure_account(&self, account_id: &AccountId) -> Result<Account> {
        let _guard = self.account_locks.lock(*account_id).await;

        if let Some(account) = self.load_account(account_id)? {
            return Ok(account);
        }

        let account = Account::new(*account_id);
        let cf = self.cf(cf::ACCOUNTS)?;
        self.db
            .put_cf(&cf, keys::account_key(account_id), Self::serialize(&account)?)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(account)
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    async fn debit(&self, request: &DebitRequest) -> Result<DebitReceipt> {
        let _guard = self.account_locks.lock(request.account_id).await;

        let account = self.load_account(&request.account_id)?;
        let debit_key = keys::debit_key(&request.account_id, &request.idempotency_key);

        if let Some(entry_id) = self.get_entry_id(cf::DEBIT_KEYS, &debit_key)? {
            let entry = self
                .load_entry(&entry_id)?
                .ok_or_else(|| StoreError::not_found("ledger entry", entry_id))?;
            return Ok(DebitReceipt {
                entry,
                balance: account.map_or(0, |a| a.balance),
                replayed: true,
            });
        }

        let (account, entry) = post_debit(account, request)?;
        self.append(&account, &entry)?;

        Ok(DebitReceipt {
            entry,
            balance: account.balance,
            replayed: false,
        })
    }

    async fn refund(&self, debit_entry_id: &EntryId, reason: &str) -> Result<RefundReceipt> {
        let debit = self
            .load_entry(debit_entry_id)?
            .ok_or_else(|| StoreError::not_found("ledger entry", debit_entry_id))?;

        let _guard = self.account_locks.lock(debit.account_id).await;

        let account = self.load_account(&debit.account_id)?;

        if let Some(refund_id) = self.get_entry_id(cf::REFUNDS, &keys::entry_key(debit_entry_id))? {
            let entry = self
                .load_entry(&refund_id)?
                .ok_or_else(|| StoreError::not_found("ledger entry", refund_id))?;
            return Ok(RefundReceipt {
                entry,
                balance: account.map_or(0, |a| a.balance),
                replayed: true,
            });
        }

        let (account, entry) = post_refund(account, &debit, reason)?;
        self.append(&account, &entry)?;

        Ok(RefundReceipt {
            entry,
            balance: account.balance,
            replayed: false,
        })
    }

    async fn credit(&self, request: &CreditRequest) -> Result<LedgerEntry> {
        let _guard = self.account_locks.lock(request.account_id).await;

        let account = self.load_account(&request.account_id)?;
        let (account, entry) = post_credit(account, request)?;
        self.append(&account, &entry)?;

        Ok(entry)
    }

    async fn get_entry(&self, entry_id: &EntryId) -> Result<Option<LedgerEntry>> {
        self.load_entry(entry_id)
    }

    async fn find_debit(
        &self,
        account_id: &AccountId,
        idempotency_key: &InvocationId,
    ) -> Result<Option<LedgerEntry>> {
        match self.get_entry_id(cf::DEBIT_KEYS, &keys::debit_key(account_id, idempotency_key))? {
            Some(entry_id) => self.load_entry(&entry_id),
            None => Ok(None),
        }
    }

    async fn find_refund(&self, debit_entry_id: &EntryId) -> Result<Option<LedgerEntry>> {
        match self.get_entry_id(cf::REFUNDS, &keys::entry_key(debit_entry_id))? {
            Some(entry_id) => self.load_entry(&entry_id),
            None => Ok(None),
        }
    }

    async fn list_entries(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let ids = self.account_entry_ids(account_id)?;

        let mut entries = Vec::new();
        for id in ids.iter().rev().skip(offset).take(limit) {
            if let Some(entry) = self.load_entry(id)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn all_entries(&self, account_id: &AccountId) -> Result<Vec<LedgerEntry>> {
        let mut entries = Vec::new();
        for id in self.account_entry_ids(account_id)? {
            if let Some(entry) = self.load_entry(&id)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    // =========================================================================
    // Usage Operations
    // =========================================================================

    async fn put_usage(&self, record: &UsageRecord) -> Result<()> {
        let cf = self.cf(cf::USAGE)?;
        self.db
            .put_cf(
                &cf,
                keys::usage_key(&record.invocation_id),
                Self::serialize(record)?,
            )
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn get_usage(&self, invocation_id: &InvocationId) -> Result<Option<UsageRecord>> {
        self.get(cf::USAGE, &keys::usage_key(invocation_id))
    }

    async fn list_usage(&self, account_id: &AccountId, limit: usize) -> Result<Vec<UsageRecord>> {
        let mut records: Vec<UsageRecord> = self
            .scan_usage()?
            .into_iter()
            .filter(|r| r.account_id == *account_id)
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
            .scan_usage()?
            .into_iter()
            .filter(|r| states.contains(&r.state) && r.updated_at < older_than)
            .collect();
        records.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn service_statistics(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ServiceStatistics>> {
        let records = self.scan_usage()?;
        Ok(service_statistics(
            records
                .iter()
                .filter(|r| since.map_or(true, |since| r.created_at >= since)),
        ))
    }

    // =========================================================================
    // Catalog Operations
    // =========================================================================

    async fn get_service_cost(&self, service_code: &ServiceCode) -> Result<Option<ServiceCost>> {
        self.get(cf::SERVICE_COSTS, &keys::service_key(service_code))
    }

    async fn list_service_costs(&self) -> Result<Vec<ServiceCost>> {
        let cf_costs = self.cf(cf::SERVICE_COSTS)?;
        let mut costs = Vec::new();
        for item in self.db.iterator_cf(&cf_costs, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            costs.push(Self::deserialize(&value)?);
        }
        Ok(costs)
    }

    async fn put_service_cost(
        &self,
        cost: &ServiceCost,
        changed_by: &str,
        reason: Option<&str>,
    ) -> Result<ServiceCostChange> {
        let _guard = self.catalog_locks.lock(cost.service_code.clone()).await;

        let service_key = keys::service_key(&cost.service_code);
        let previous: Option<ServiceCost> = self.get(cf::SERVICE_COSTS, &service_key)?;
        let change = ServiceCostChange::between(
            previous.as_ref(),
            cost,
            changed_by,
            reason.map(str::to_string),
        );

        let cf_costs = self.cf(cf::SERVICE_COSTS)?;
        let cf_history = self.cf(cf::COST_HISTORY)?;
        let cf_by_service = self.cf(cf::COST_HISTORY_BY_SERVICE)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_costs, &service_key, Self::serialize(cost)?);
        batch.put_cf(&cf_history, keys::change_key(&change.id), Self::serialize(&change)?);
        batch.put_cf(
            &cf_by_service,
            keys::service_change_key(&cost.service_code, &change.id),
            b"",
        );
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(change)
    }

    async fn list_cost_changes(
        &self,
        service_code: Option<&ServiceCode>,
        limit: usize,
    ) -> Result<Vec<ServiceCostChange>> {
        let ids = match service_code {
            Some(code) => self.service_change_ids(code, limit)?,
            None => self.recent_change_ids(limit)?,
        };

        let mut changes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(change) = self.load_change(&id)? {
                changes.push(change);
            }
        }
        Ok(changes)
    }

    async fn ping(&self) -> Result<()> {
        self.cf(cf::ACCOUNTS).map(|_| ())
    }
}
