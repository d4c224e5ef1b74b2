//! PostgreSQL storage implementation.
//!
//! Balance mutations run in a transaction that first takes the account row
//! lock (`SELECT ... FOR UPDATE`), then applies a conditional
//! `UPDATE ... WHERE balance >= $n`. Partial unique indexes back the
//! idempotency guarantees: one debit per `(account_id, idempotency_key)` and
//! one refund per debit.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credit_meter_core::{
    Account, AccountId, ChangeId, CostChangeKind, CostTerms, CreditError, DebitReceipt, EntryId,
    EntryKind, InvocationId, InvocationState, LedgerEntry, Promotion, RefundReceipt, ServiceCode,
    ServiceCost, ServiceCostChange, ServiceStatistics, UsageRecord,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::posting::add_to_balance;
use crate::{CreditRequest, DebitRequest, Store};

/// Default connection pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// How long to wait for a pooled connection before failing with a transient error.
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// PostgreSQL-backed storage implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the database at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection can be established.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn replay_debit(&self, request: &DebitRequest) -> Result<DebitReceipt> {
        let entry = self
            .find_debit(&request.account_id, &request.idempotency_key)
            .await?
            .ok_or_else(|| {
                StoreError::Database("debit key conflict without a recorded debit".into())
            })?;
        let balance = self
            .get_account(&request.account_id)
            .await?
            .map_or(0, |a| a.balance);

        Ok(DebitReceipt {
            entry,
            balance,
            replayed: true,
        })
    }

    async fn replay_refund(&self, debit: &LedgerEntry) -> Result<RefundReceipt> {
        let entry = self.find_refund(&debit.id).await?.ok_or_else(|| {
            StoreError::Database("refund conflict without a recorded refund".into())
        })?;
        let balance = self
            .get_account(&debit.account_id)
            .await?
            .map_or(0, |a| a.balance);

        Ok(RefundReceipt {
            entry,
            balance,
            replayed: true,
        })
    }
}

/// Create the account if needed and take its row lock. Returns the balance.
async fn lock_account(conn: &mut PgConnection, account_id: Uuid) -> sqlx::Result<i64> {
    sqlx::query("INSERT INTO credit_accounts (account_id) VALUES ($1) ON CONFLICT (account_id) DO NOTHING")
        .bind(account_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query_scalar("SELECT balance FROM credit_accounts WHERE account_id = $1 FOR UPDATE")
        .bind(account_id)
        .fetch_one(&mut *conn)
        .await
}

async fn insert_entry(conn: &mut PgConnection, entry: &LedgerEntry) -> sqlx::Result<()> {
    sqlx::query(
        r"
        INSERT INTO ledger_entries (
            id, account_id, kind, amount, service_code, related_entry_id,
            idempotency_key, balance_after, description, metadata, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ",
    )
    .bind(entry.id.to_string())
    .bind(*entry.account_id.as_uuid())
    .bind(entry.kind.as_str())
    .bind(entry.amount)
    .bind(entry.service_code.as_ref().map(ServiceCode::as_str))
    .bind(entry.related_entry_id.map(|id| id.to_string()))
    .bind(entry.idempotency_key.map(|key| *key.as_uuid()))
    .bind(entry.balance_after)
    .bind(&entry.description)
    .bind(&entry.metadata)
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

/// A failed `COMMIT` over a broken connection leaves the outcome unknown.
fn commit_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::Protocol(_) => StoreError::CommitUnknown(err.to_string()),
        other => other.into(),
    }
}

fn parse_entry_id(raw: &str) -> Result<EntryId> {
    raw.parse()
        .map_err(|e| StoreError::Serialization(format!("entry id {raw:?}: {e}")))
}

fn parse_service_code(raw: String) -> Result<ServiceCode> {
    ServiceCode::new(raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    Ok(Account {
        account_id: AccountId::from_uuid(row.try_get("account_id")?),
        balance: row.try_get("balance")?,
        lifetime_purchased: row.try_get("lifetime_purchased")?,
        lifetime_used: row.try_get("lifetime_used")?,
        lifetime_refunded: row.try_get("lifetime_refunded")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("kind")?;
    let service_code: Option<String> = row.try_get("service_code")?;
    let related: Option<String> = row.try_get("related_entry_id")?;
    let key: Option<Uuid> = row.try_get("idempotency_key")?;

    Ok(LedgerEntry {
        id: parse_entry_id(&id)?,
        account_id: AccountId::from_uuid(row.try_get("account_id")?),
        kind: EntryKind::parse(&kind)
            .ok_or_else(|| StoreError::Serialization(format!("unknown entry kind: {kind}")))?,
        amount: row.try_get("amount")?,
        service_code: service_code.map(parse_service_code).transpose()?,
        related_entry_id: related.as_deref().map(parse_entry_id).transpose()?,
        idempotency_key: key.map(InvocationId::from_uuid),
        balance_after: row.try_get("balance_after")?,
        description: row.try_get("description")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
    })
}

fn usage_from_row(row: &PgRow) -> Result<UsageRecord> {
    let state: String = row.try_get("state")?;
    let debit: Option<String> = row.try_get("debit_entry_id")?;
    let refund: Option<String> = row.try_get("refund_entry_id")?;
    let latency: Option<i64> = row.try_get("latency_ms")?;

    Ok(UsageRecord {
        invocation_id: InvocationId::from_uuid(row.try_get("invocation_id")?),
        account_id: AccountId::from_uuid(row.try_get("account_id")?),
        service_code: parse_service_code(row.try_get("service_code")?)?,
        state: InvocationState::parse(&state)
            .ok_or_else(|| StoreError::Serialization(format!("unknown state: {state}")))?,
        cost: row.try_get("cost")?,
        debit_entry_id: debit.as_deref().map(parse_entry_id).transpose()?,
        refund_entry_id: refund.as_deref().map(parse_entry_id).transpose()?,
        latency_ms: latency.and_then(|ms| u64::try_from(ms).ok()),
        error: row.try_get("error")?,
        output: row.try_get("output")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn service_cost_from_row(row: &PgRow) -> Result<ServiceCost> {
    let discount: Option<i16> = row.try_get("discount_percent")?;
    let promotion = discount
        .map(|d| Promotion::new(u8::try_from(d).unwrap_or(0)))
        .transpose()?;

    Ok(ServiceCost {
        service_code: parse_service_code(row.try_get("service_code")?)?,
        service_name: row.try_get("service_name")?,
        category: row.try_get("category")?,
        cost: row.try_get("cost")?,
        active: row.try_get("active")?,
        promotion,
        updated_at: row.try_get("updated_at")?,
    })
}

fn discount_from_column(raw: Option<i16>) -> Option<u8> {
    raw.and_then(|d| u8::try_from(d).ok())
}

fn change_from_row(row: &PgRow) -> Result<ServiceCostChange> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("change_kind")?;
    let old_cost: Option<i64> = row.try_get("old_cost")?;
    let old_active: Option<bool> = row.try_get("old_active")?;

    let previous = match (old_cost, old_active) {
        (Some(cost), Some(active)) => Some(CostTerms {
            cost,
            active,
            discount_percent: discount_from_column(row.try_get("old_discount_percent")?),
        }),
        _ => None,
    };

    Ok(ServiceCostChange {
        id: id
            .parse::<ChangeId>()
            .map_err(|e| StoreError::Serialization(format!("change id {id:?}: {e}")))?,
        service_code: parse_service_code(row.try_get("service_code")?)?,
        service_name: row.try_get("service_name")?,
        kind: CostChangeKind::parse(&kind)
            .ok_or_else(|| StoreError::Serialization(format!("unknown change kind: {kind}")))?,
        previous,
        current: CostTerms {
            cost: row.try_get("new_cost")?,
            active: row.try_get("new_active")?,
            discount_percent: discount_from_column(row.try_get("new_discount_percent")?),
        },
        changed_by: row.try_get("changed_by")?,
        reason: row.try_get("reason")?,
        changed_at: row.try_get("changed_at")?,
    })
}

fn statistics_from_row(row: &PgRow) -> Result<ServiceStatistics> {
    let count = |column: &str| -> Result<u64> {
        let n: i64 = row.try_get(column)?;
        Ok(u64::try_from(n).unwrap_or(0))
    };

    Ok(ServiceStatistics {
        service_code: parse_service_code(row.try_get("service_code")?)?,
        invocations: count("invocations")?,
        completed: count("completed")?,
        refunded: count("refunded")?,
        rejected: count("rejected")?,
        pending: count("pending")?,
        credits_consumed: row.try_get("credits_consumed")?,
        unique_accounts: count("unique_accounts")?,
        last_used_at: row.try_get("last_used_at")?,
    })
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[async_trait]
impl Store for PgStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        sqlx::query("SELECT * FROM credit_accounts WHERE account_id = $1")
            .bind(*account_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(account_from_row)
            .transpose()
    }

    async fn ensure_account(&self, account_id: &AccountId) -> Result<Account> {
        let row = sqlx::query(
            r"
            INSERT INTO credit_accounts (account_id) VALUES ($1)
            ON CONFLICT (account_id) DO UPDATE SET account_id = EXCLUDED.account_id
            RETURNING *
            ",
        )
        .bind(*account_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;
        account_from_row(&row)
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    async fn debit(&self, request: &DebitRequest) -> Result<DebitReceipt> {
        let account_id = *request.account_id.as_uuid();
        let mut tx = self.pool.begin().await?;
        let balance = lock_account(&mut tx, account_id).await?;

        let existing = sqlx::query(
            "SELECT * FROM ledger_entries WHERE account_id = $1 AND idempotency_key = $2 AND kind = 'debit'",
        )
        .bind(account_id)
        .bind(*request.idempotency_key.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            let entry = entry_from_row(&row)?;
            tx.rollback().await?;
            return Ok(DebitReceipt {
                entry,
                balance,
                replayed: true,
            });
        }

        let entry = LedgerEntry::debit(
            request.account_id,
            request.service_code.clone(),
            request.amount,
            request.idempotency_key,
            balance - request.amount,
            request.metadata.clone(),
        )?;

        let updated: Option<i64> = sqlx::query_scalar(
            r"
            UPDATE credit_accounts
            SET balance = balance - $2, lifetime_used = lifetime_used + $2, updated_at = now()
            WHERE account_id = $1 AND balance >= $2
            RETURNING balance
            ",
        )
        .bind(account_id)
        .bind(request.amount)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(balance_after) = updated else {
            tx.rollback().await?;
            return Err(StoreError::InsufficientCredits {
                balance,
                required: request.amount,
            });
        };

        if let Err(err) = insert_entry(&mut tx, &entry).await {
            if is_unique_violation(&err) {
                drop(tx);
                return self.replay_debit(request).await;
            }
            return Err(err.into());
        }

        tx.commit().await.map_err(commit_error)?;

        tracing::debug!(
            account_id = %request.account_id,
            entry_id = %entry.id,
            amount = request.amount,
            balance = balance_after,
            "Debit committed"
        );

        Ok(DebitReceipt {
            entry,
            balance: balance_after,
            replayed: false,
        })
    }

    async fn refund(&self, debit_entry_id: &EntryId, reason: &str) -> Result<RefundReceipt> {
        let debit = self
            .get_entry(debit_entry_id)
            .await?
            .ok_or_else(|| StoreError::not_found("ledger entry", debit_entry_id))?;
        if debit.kind != EntryKind::Debit {
            return Err(CreditError::NotADebit { entry_id: debit.id }.into());
        }

        let account_id = *debit.account_id.as_uuid();
        let mut tx = self.pool.begin().await?;
        let balance = lock_account(&mut tx, account_id).await?;

        let existing = sqlx::query(
            "SELECT * FROM ledger_entries WHERE related_entry_id = $1 AND kind = 'refund'",
        )
        .bind(debit.id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            let entry = entry_from_row(&row)?;
            tx.rollback().await?;
            return Ok(RefundReceipt {
                entry,
                balance,
                replayed: true,
            });
        }

        let returned = debit.amount.checked_abs().ok_or(CreditError::Overflow {
            amount: debit.amount,
        })?;
        let refund = LedgerEntry::refund(
            &debit,
            add_to_balance(balance, returned)?,
            reason.to_string(),
        )?;

        sqlx::query(
            r"
            UPDATE credit_accounts
            SET balance = balance + $2, lifetime_refunded = lifetime_refunded + $2, updated_at = now()
            WHERE account_id = $1
            ",
        )
        .bind(account_id)
        .bind(refund.amount)
        .execute(&mut *tx)
        .await?;

        if let Err(err) = insert_entry(&mut tx, &refund).await {
            if is_unique_violation(&err) {
                drop(tx);
                return self.replay_refund(&debit).await;
            }
            return Err(err.into());
        }

        tx.commit().await.map_err(commit_error)?;

        Ok(RefundReceipt {
            balance: refund.balance_after,
            entry: refund,
            replayed: false,
        })
    }

    async fn credit(&self, request: &CreditRequest) -> Result<LedgerEntry> {
        let account_id = *request.account_id.as_uuid();
        let mut tx = self.pool.begin().await?;
        let balance = lock_account(&mut tx, account_id).await?;

        let entry = LedgerEntry::purchase(
            request.account_id,
            request.amount,
            add_to_balance(balance, request.amount)?,
            request.description.clone(),
        )?
        .with_metadata(request.metadata.clone());

        sqlx::query(
            r"
            UPDATE credit_accounts
            SET balance = balance + $2, lifetime_purchased = lifetime_purchased + $2, updated_at = now()
            WHERE account_id = $1
            ",
        )
        .bind(account_id)
        .bind(request.amount)
        .execute(&mut *tx)
        .await?;

        insert_entry(&mut tx, &entry).await?;
        tx.commit().await.map_err(commit_error)?;

        Ok(entry)
    }

    async fn get_entry(&self, entry_id: &EntryId) -> Result<Option<LedgerEntry>> {
        sqlx::query("SELECT * FROM ledger_entries WHERE id = $1")
            .bind(entry_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(entry_from_row)
            .transpose()
    }

    async fn find_debit(
        &self,
        account_id: &AccountId,
        idempotency_key: &InvocationId,
    ) -> Result<Option<LedgerEntry>> {
        sqlx::query(
            "SELECT * FROM ledger_entries WHERE account_id = $1 AND idempotency_key = $2 AND kind = 'debit'",
        )
        .bind(*account_id.as_uuid())
        .bind(*idempotency_key.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(entry_from_row)
        .transpose()
    }

    async fn find_refund(&self, debit_entry_id: &EntryId) -> Result<Option<LedgerEntry>> {
        sqlx::query("SELECT * FROM ledger_entries WHERE related_entry_id = $1 AND kind = 'refund'")
            .bind(debit_entry_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(entry_from_row)
            .transpose()
    }

    async fn list_entries(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM ledger_entries WHERE account_id = $1 ORDER BY id DESC LIMIT $2 OFFSET $3",
        )
        .bind(*account_id.as_uuid())
        .bind(to_i64(limit))
        .bind(to_i64(offset))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn all_entries(&self, account_id: &AccountId) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query("SELECT * FROM ledger_entries WHERE account_id = $1 ORDER BY id")
            .bind(*account_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(entry_from_row).collect()
    }

    // =========================================================================
    // Usage Operations
    // =========================================================================

    async fn put_usage(&self, record: &UsageRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO usage_records (
                invocation_id, account_id, service_code, state, cost, debit_entry_id,
                refund_entry_id, latency_ms, error, output, metadata, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (invocation_id) DO UPDATE SET
                state = EXCLUDED.state,
                cost = EXCLUDED.cost,
                debit_entry_id = EXCLUDED.debit_entry_id,
                refund_entry_id = EXCLUDED.refund_entry_id,
                latency_ms = EXCLUDED.latency_ms,
                error = EXCLUDED.error,
                output = EXCLUDED.output,
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(*record.invocation_id.as_uuid())
        .bind(*record.account_id.as_uuid())
        .bind(record.service_code.as_str())
        .bind(record.state.as_str())
        .bind(record.cost)
        .bind(record.debit_entry_id.map(|id| id.to_string()))
        .bind(record.refund_entry_id.map(|id| id.to_string()))
        .bind(record.latency_ms.map(|ms| i64::try_from(ms).unwrap_or(i64::MAX)))
        .bind(record.error.as_deref())
        .bind(record.output.as_ref())
        .bind(&record.metadata)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_usage(&self, invocation_id: &InvocationId) -> Result<Option<UsageRecord>> {
        sqlx::query("SELECT * FROM usage_records WHERE invocation_id = $1")
            .bind(*invocation_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(usage_from_row)
            .transpose()
    }

    async fn list_usage(&self, account_id: &AccountId, limit: usize) -> Result<Vec<UsageRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM usage_records WHERE account_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(*account_id.as_uuid())
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(usage_from_row).collect()
    }

    async fn list_stale_usage(
        &self,
        states: &[InvocationState],
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<UsageRecord>> {
        let states: Vec<String> = states.iter().map(|s| s.as_str().to_string()).collect();
        let rows = sqlx::query(
            r"
            SELECT * FROM usage_records
            WHERE state = ANY($1) AND updated_at < $2
            ORDER BY updated_at
            LIMIT $3
            ",
        )
        .bind(&states)
        .bind(older_than)
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(usage_from_row).collect()
    }

    async fn service_statistics(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ServiceStatistics>> {
        let rows = sqlx::query(
            r"
            SELECT
                service_code,
                COUNT(*) AS invocations,
                COUNT(*) FILTER (WHERE state = 'completed') AS completed,
                COUNT(*) FILTER (WHERE state = 'refunded') AS refunded,
                COUNT(*) FILTER (WHERE state = 'rejected') AS rejected,
                COUNT(*) FILTER (WHERE state IN ('requested', 'charged', 'failed')) AS pending,
                COALESCE(SUM(cost) FILTER (WHERE state = 'completed'), 0)::BIGINT
                    AS credits_consumed,
                COUNT(DISTINCT account_id) AS unique_accounts,
                MAX(created_at) FILTER (WHERE state = 'completed') AS last_used_at
            FROM usage_records
            WHERE $1::TIMESTAMPTZ IS NULL OR created_at >= $1
            GROUP BY service_code
            ORDER BY service_code
            ",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(statistics_from_row).collect()
    }

    // =========================================================================
    // Catalog Operations
    // =========================================================================

    async fn get_service_cost(&self, service_code: &ServiceCode) -> Result<Option<ServiceCost>> {
        sqlx::query("SELECT * FROM service_costs WHERE service_code = $1")
            .bind(service_code.as_str())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(service_cost_from_row)
            .transpose()
    }

    async fn list_service_costs(&self) -> Result<Vec<ServiceCost>> {
        let rows = sqlx::query("SELECT * FROM service_costs ORDER BY service_code")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(service_cost_from_row).collect()
    }

    async fn put_service_cost(
        &self,
        cost: &ServiceCost,
        changed_by: &str,
        reason: Option<&str>,
    ) -> Result<ServiceCostChange> {
        let mut tx = self.pool.begin().await?;

        // Serializes writers of one code, including the first insert.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(cost.service_code.as_str())
            .execute(&mut *tx)
            .await?;

        let previous = sqlx::query("SELECT * FROM service_costs WHERE service_code = $1")
            .bind(cost.service_code.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .as_ref()
            .map(service_cost_from_row)
            .transpose()?;
        let change = ServiceCostChange::between(
            previous.as_ref(),
            cost,
            changed_by,
            reason.map(str::to_string),
        );

        sqlx::query(
            r"
            INSERT INTO service_costs (
                service_code, service_name, category, cost, active, discount_percent, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (service_code) DO UPDATE SET
                service_name = EXCLUDED.service_name,
                category = EXCLUDED.category,
                cost = EXCLUDED.cost,
                active = EXCLUDED.active,
                discount_percent = EXCLUDED.discount_percent,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(cost.service_code.as_str())
        .bind(&cost.service_name)
        .bind(&cost.category)
        .bind(cost.cost)
        .bind(cost.active)
        .bind(cost.promotion.map(|p| i16::from(p.discount_percent)))
        .bind(cost.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            INSERT INTO service_cost_history (
                id, service_code, service_name, change_kind,
                old_cost, new_cost, old_active, new_active,
                old_discount_percent, new_discount_percent,
                changed_by, reason, changed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ",
        )
        .bind(change.id.to_string())
        .bind(change.service_code.as_str())
        .bind(&change.service_name)
        .bind(change.kind.as_str())
        .bind(change.previous.map(|t| t.cost))
        .bind(change.current.cost)
        .bind(change.previous.map(|t| t.active))
        .bind(change.current.active)
        .bind(change.previous.and_then(|t| t.discount_percent).map(i16::from))
        .bind(change.current.discount_percent.map(i16::from))
        .bind(&change.changed_by)
        .bind(change.reason.as_deref())
        .bind(change.changed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await.map_err(commit_error)?;
        Ok(change)
    }

    async fn list_cost_changes(
        &self,
        service_code: Option<&ServiceCode>,
        limit: usize,
    ) -> Result<Vec<ServiceCostChange>> {
        let rows = sqlx::query(
            r"
            SELECT * FROM service_cost_history
            WHERE $1::TEXT IS NULL OR service_code = $1
            ORDER BY id DESC
            LIMIT $2
            ",
        )
        .bind(service_code.map(ServiceCode::as_str))
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(change_from_row).collect()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
