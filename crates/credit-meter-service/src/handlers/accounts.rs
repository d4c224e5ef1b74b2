//! Account balance, history and purchase handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use credit_meter_core::{EntryKind, LedgerEntry, UsageRecord};
use credit_meter_gateway::BalanceCheck;

use super::{parse_account_id, parse_service_code};
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Largest page of ledger entries returned at once.
const MAX_PAGE_SIZE: usize = 100;

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// Account ID.
    pub account_id: String,
    /// Current balance in credits.
    pub balance: i64,
    /// Credits ever purchased or granted.
    pub lifetime_purchased: i64,
    /// Credits ever charged.
    pub lifetime_used: i64,
    /// Credits ever refunded.
    pub lifetime_refunded: i64,
}

/// Get the current balance. Unknown accounts start at zero.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(account_id): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let account = state.ledger.account(&account_id).await?;

    Ok(Json(BalanceResponse {
        account_id: account.account_id.to_string(),
        balance: account.balance,
        lifetime_purchased: account.lifetime_purchased,
        lifetime_used: account.lifetime_used,
        lifetime_refunded: account.lifetime_refunded,
    }))
}

/// Entry list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListEntriesQuery {
    /// Maximum number of entries to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// Ledger entry response.
#[derive(Debug, Serialize)]
pub struct EntryResponse {
    /// Entry ID.
    pub id: String,
    /// Entry kind.
    pub kind: EntryKind,
    /// Credits moved.
    pub amount: i64,
    /// Service charged, for debits and refunds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_code: Option<String>,
    /// Debit reversed by a refund.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_entry_id: Option<String>,
    /// Invocation the entry belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    /// Balance after this entry.
    pub balance_after: i64,
    /// Description.
    pub description: String,
    /// Timestamp.
    pub created_at: String,
}

impl From<&LedgerEntry> for EntryResponse {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            kind: entry.kind,
            amount: entry.amount,
            service_code: entry.service_code.as_ref().map(ToString::to_string),
            related_entry_id: entry.related_entry_id.as_ref().map(ToString::to_string),
            invocation_id: entry.idempotency_key.as_ref().map(ToString::to_string),
            balance_after: entry.balance_after,
            description: entry.description.clone(),
            created_at: entry.created_at.to_rfc3339(),
        }
    }
}

/// List entries response.
#[derive(Debug, Serialize)]
pub struct ListEntriesResponse {
    /// Entries (newest first).
    pub entries: Vec<EntryResponse>,
    /// Whether there are more entries.
    pub has_more: bool,
}

/// List ledger history.
pub async fn list_entries(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(account_id): Path<String>,
    Query(query): Query<ListEntriesQuery>,
) -> Result<Json<ListEntriesResponse>, ApiError> {
    let account_id = parse_account_id(&account_id)?;

    // Fetch one more than requested to determine has_more
    let limit = query.limit.min(MAX_PAGE_SIZE);
    let entries = state
        .ledger
        .entries(&account_id, limit + 1, query.offset)
        .await?;

    let has_more = entries.len() > limit;
    let entries = entries
        .iter()
        .take(limit)
        .map(EntryResponse::from)
        .collect();

    Ok(Json(ListEntriesResponse { entries, has_more }))
}

/// Usage history query parameters.
#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    /// Maximum number of records to return (default: 50).
    pub limit: Option<usize>,
}

/// Usage history response.
#[derive(Debug, Serialize)]
pub struct UsageHistoryResponse {
    /// Invocation records (newest first).
    pub usage: Vec<UsageRecord>,
}

/// List recent metered invocations.
pub async fn list_usage(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(account_id): Path<String>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<UsageHistoryResponse>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let limit = query.limit.map(|limit| limit.min(MAX_PAGE_SIZE));
    let usage = state.ledger.usage_history(&account_id, limit).await?;

    Ok(Json(UsageHistoryResponse { usage }))
}

/// Add credits request.
#[derive(Debug, Deserialize)]
pub struct AddCreditsRequest {
    /// Credits to add.
    pub amount: i64,
    /// Reason (e.g. "Starter pack purchase").
    pub reason: String,
    /// Payment reference and other metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Add credits response.
#[derive(Debug, Serialize)]
pub struct AddCreditsResponse {
    /// The purchase entry.
    pub entry: EntryResponse,
    /// New balance.
    pub balance: i64,
}

/// Record a purchase or grant.
pub async fn add_credits(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(account_id): Path<String>,
    Json(body): Json<AddCreditsRequest>,
) -> Result<Json<AddCreditsResponse>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    if body.amount <= 0 {
        return Err(ApiError::BadRequest("Amount must be positive".into()));
    }
    if body.reason.trim().is_empty() {
        return Err(ApiError::BadRequest("Reason is required".into()));
    }

    let entry = state
        .ledger
        .credit(&account_id, body.amount, body.reason, body.metadata)
        .await?;

    tracing::info!(
        service = %auth.service_name,
        account_id = %account_id,
        amount = %body.amount,
        balance = %entry.balance_after,
        "Credits added"
    );

    Ok(Json(AddCreditsResponse {
        balance: entry.balance_after,
        entry: EntryResponse::from(&entry),
    }))
}

/// Balance check request.
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    /// Service about to be used.
    pub service_code: String,
}

/// Balance check response.
#[derive(Debug, Serialize)]
pub struct CheckResponse {
    /// Service checked.
    pub service_code: String,
    /// Credits the service costs now.
    pub required: i64,
    /// Current balance.
    pub available: i64,
    /// Whether the balance covers the cost.
    pub sufficient: bool,
}

impl From<BalanceCheck> for CheckResponse {
    fn from(check: BalanceCheck) -> Self {
        Self {
            service_code: check.service_code.to_string(),
            required: check.required,
            available: check.available,
            sufficient: check.sufficient,
        }
    }
}

/// Check whether the account can pay for a service. Charges nothing.
pub async fn check_balance(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(account_id): Path<String>,
    Json(body): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let service_code = parse_service_code(&body.service_code)?;

    let check = state
        .gateway
        .check_sufficient(&account_id, &service_code)
        .await?;

    Ok(Json(check.into()))
}
