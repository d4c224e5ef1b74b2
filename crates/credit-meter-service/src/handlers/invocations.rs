//! Invocation lookup.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;

use credit_meter_core::UsageRecord;

use super::parse_invocation_id;
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Get the usage record of one invocation.
pub async fn get_invocation(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(invocation_id): Path<String>,
) -> Result<Json<UsageRecord>, ApiError> {
    let invocation_id = parse_invocation_id(&invocation_id)?;

    let record = state
        .store
        .get_usage(&invocation_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Invocation not found: {invocation_id}")))?;

    Ok(Json(record))
}
