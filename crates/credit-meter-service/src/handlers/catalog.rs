//! Service cost catalog handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use credit_meter_core::ServiceCost;
use credit_meter_gateway::Catalog;

use super::parse_service_code;
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Catalog item response.
#[derive(Debug, Serialize)]
pub struct ServiceResponse {
    /// Service code.
    pub service_code: String,
    /// Display name.
    pub service_name: String,
    /// Category.
    pub category: String,
    /// List price.
    pub base_cost: i64,
    /// Price charged now, after any promotion.
    pub cost: i64,
    /// Promotion discount, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_percent: Option<u8>,
    /// Whether the service can be invoked.
    pub active: bool,
}

impl From<&ServiceCost> for ServiceResponse {
    fn from(cost: &ServiceCost) -> Self {
        Self {
            service_code: cost.service_code.to_string(),
            service_name: cost.service_name.clone(),
            category: cost.category.clone(),
            base_cost: cost.cost,
            cost: cost.effective_cost(),
            discount_percent: cost.promotion.map(|p| p.discount_percent),
            active: cost.active,
        }
    }
}

/// Catalog response.
#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    /// Active services.
    pub services: Vec<ServiceResponse>,
}

/// List active services.
pub async fn list_services(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
) -> Result<Json<CatalogResponse>, ApiError> {
    let services = state.catalog.list_active().await?;

    Ok(Json(CatalogResponse {
        services: services.iter().map(ServiceResponse::from).collect(),
    }))
}

/// Get one active service.
pub async fn get_service(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(service_code): Path<String>,
) -> Result<Json<ServiceResponse>, ApiError> {
    let service_code = parse_service_code(&service_code)?;

    let cost = state
        .catalog
        .get(&service_code)
        .await?
        .filter(|cost| cost.active)
        .ok_or_else(|| ApiError::NotFound(format!("Service not found: {service_code}")))?;

    Ok(Json(ServiceResponse::from(&cost)))
}
