//! API handlers.

pub mod accounts;
pub mod admin;
pub mod catalog;
pub mod health;
pub mod invocations;
pub mod matching;

use credit_meter_core::{AccountId, InvocationId, ServiceCode};

use crate::error::ApiError;

fn parse_account_id(raw: &str) -> Result<AccountId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest("Invalid account ID".into()))
}

fn parse_invocation_id(raw: &str) -> Result<InvocationId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest("Invalid invocation ID".into()))
}

fn parse_service_code(raw: &str) -> Result<ServiceCode, ApiError> {
    ServiceCode::new(raw).map_err(|e| ApiError::BadRequest(format!("Invalid service code: {e}")))
}
