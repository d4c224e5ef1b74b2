//! Operator endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use credit_meter_core::{ServiceCost, ServiceCostChange, ServiceStatistics};
use credit_meter_gateway::{ProjectionCheck, ReconciliationReport};

use super::catalog::ServiceResponse;
use super::{parse_account_id, parse_service_code};
use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Run one reconciliation pass now.
pub async fn run_reconciliation(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
) -> Result<Json<ReconciliationReport>, ApiError> {
    let report = state.reconciler.run_once().await?;

    tracing::info!(
        admin_id = %auth.admin_id,
        scanned = report.scanned,
        refunded = report.refunded,
        rejected = report.rejected,
        failed = report.failed,
        "Manual reconciliation finished"
    );

    Ok(Json(report))
}

/// Compare an account's stored balance with its ledger.
pub async fn audit_account(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Path(account_id): Path<String>,
) -> Result<Json<ProjectionCheck>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let check = state.ledger.verify(&account_id).await?;

    if !check.consistent {
        tracing::error!(
            admin_id = %auth.admin_id,
            account_id = %account_id,
            balance = check.balance,
            projected = check.projected,
            "Balance does not match ledger"
        );
    }

    Ok(Json(check))
}

/// Service cost upsert request.
#[derive(Debug, Deserialize)]
pub struct PutServiceRequest {
    /// Display name.
    pub service_name: String,
    /// Category.
    pub category: String,
    /// List price in credits.
    pub cost: i64,
    /// Promotion discount, `1..=100`.
    pub discount_percent: Option<u8>,
    /// Whether the service can be invoked (default: true).
    #[serde(default = "default_active")]
    pub active: bool,
    /// Why the price changed, kept in the cost history.
    pub reason: Option<String>,
}

fn default_active() -> bool {
    true
}

/// Create or replace a service cost.
pub async fn put_service(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Path(service_code): Path<String>,
    Json(body): Json<PutServiceRequest>,
) -> Result<Json<ServiceResponse>, ApiError> {
    let service_code = parse_service_code(&service_code)?;

    let mut cost = ServiceCost::new(service_code, body.service_name, body.category, body.cost)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if let Some(discount) = body.discount_percent {
        cost = cost
            .with_promotion(discount)
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    }
    if !body.active {
        cost = cost.deactivated();
    }

    let change = state
        .catalog
        .set_cost(&cost, &auth.admin_id, body.reason.as_deref())
        .await?;

    tracing::info!(
        admin_id = %auth.admin_id,
        service_code = %cost.service_code,
        change_id = %change.id,
        "Service cost replaced by admin"
    );

    Ok(Json(ServiceResponse::from(&cost)))
}

// ============================================================================
// Cost history
// ============================================================================

/// Largest page of cost changes returned at once.
const MAX_HISTORY_LIMIT: usize = 200;

/// Cost history query parameters.
#[derive(Debug, Deserialize)]
pub struct CostHistoryQuery {
    /// Restrict to one service.
    pub service_code: Option<String>,
    /// Maximum number of changes to return (default: 50).
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    50
}

/// Cost history response.
#[derive(Debug, Serialize)]
pub struct CostHistoryResponse {
    /// Changes, newest first.
    pub changes: Vec<ServiceCostChange>,
}

/// Recorded cost changes, newest first.
pub async fn cost_history(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
    Query(query): Query<CostHistoryQuery>,
) -> Result<Json<CostHistoryResponse>, ApiError> {
    let service_code = query
        .service_code
        .as_deref()
        .map(parse_service_code)
        .transpose()?;
    let limit = query.limit.min(MAX_HISTORY_LIMIT);

    let changes = state.catalog.history(service_code.as_ref(), limit).await?;
    Ok(Json(CostHistoryResponse { changes }))
}

/// Cost history of one service, newest first.
pub async fn service_cost_history(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
    Path(service_code): Path<String>,
    Query(query): Query<CostHistoryQuery>,
) -> Result<Json<CostHistoryResponse>, ApiError> {
    let service_code = parse_service_code(&service_code)?;
    let limit = query.limit.min(MAX_HISTORY_LIMIT);

    let changes = state.catalog.history(Some(&service_code), limit).await?;
    if changes.is_empty() && state.catalog.get(&service_code).await?.is_none() {
        return Err(ApiError::NotFound(format!("Service not found: {service_code}")));
    }
    Ok(Json(CostHistoryResponse { changes }))
}

// ============================================================================
// Usage statistics
// ============================================================================

/// Statistics query parameters.
#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    /// Only count invocations created at or after this instant (RFC 3339).
    pub since: Option<DateTime<Utc>>,
}

/// Per-service usage response.
#[derive(Debug, Serialize)]
pub struct StatisticsResponse {
    /// Lower bound applied, if any.
    pub since: Option<DateTime<Utc>>,
    /// One row per service with at least one invocation.
    pub services: Vec<ServiceStatistics>,
    /// Credits consumed across all services.
    pub total_credits_consumed: i64,
}

/// Per-service invocation counts and credits consumed.
pub async fn usage_statistics(
    State(state): State<Arc<AppState>>,
    _auth: AdminAuth,
    Query(query): Query<StatisticsQuery>,
) -> Result<Json<StatisticsResponse>, ApiError> {
    let services = state.ledger.service_statistics(query.since).await?;
    let total_credits_consumed = services
        .iter()
        .fold(0_i64, |total, s| total.saturating_add(s.credits_consumed));

    Ok(Json(StatisticsResponse {
        since: query.since,
        services,
        total_credits_consumed,
    }))
}
