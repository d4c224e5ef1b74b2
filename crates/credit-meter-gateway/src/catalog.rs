//! Service cost catalog.
//!
//! Answers "what does this service cost right now". An unknown or inactive
//! service has no price: callers must treat `None` as "feature unavailable",
//! never as free. Read failures surface as [`CatalogError::Unavailable`].

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use credit_meter_core::{default_catalog, Price, ServiceCode, ServiceCost, ServiceCostChange};
use credit_meter_store::Store;
use tokio::time::Instant;

use crate::error::CatalogError;

/// Author recorded for cost rows written by [`seed_defaults`].
pub const SEED_AUTHOR: &str = "system";

/// How long [`StoreCatalog`] trusts a cached price.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Pricing lookups used by the gateway.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Current price of a service, or `None` if it is unknown or inactive.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Unavailable` if the pricing source cannot be read.
    async fn cost(&self, service_code: &ServiceCode) -> Result<Option<Price>, CatalogError>;

    /// Active services, sorted by category then name.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Unavailable` if the pricing source cannot be read.
    async fn list_active(&self) -> Result<Vec<ServiceCost>, CatalogError>;
}

fn sort_active(mut costs: Vec<ServiceCost>) -> Vec<ServiceCost> {
    costs.retain(|cost| cost.active);
    costs.sort_by(|a, b| {
        a.category
            .cmp(&b.category)
            .then_with(|| a.service_name.cmp(&b.service_name))
    });
    costs
}

// ============================================================================
// Store-backed catalog
// ============================================================================

/// Catalog reading `ServiceCost` rows through the [`Store`].
///
/// Prices are cached for `ttl`. Only found, active prices are cached, so a
/// newly activated service becomes visible on the next lookup.
pub struct StoreCatalog {
    store: Arc<dyn Store>,
    ttl: Duration,
    cache: RwLock<HashMap<ServiceCode, (Instant, Price)>>,
}

impl StoreCatalog {
    /// Create a catalog with the default cache TTL.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_ttl(store, DEFAULT_CACHE_TTL)
    }

    /// Create a catalog with a custom cache TTL. A zero TTL disables caching.
    #[must_use]
    pub fn with_ttl(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Drop the cached price of one service.
    pub fn invalidate(&self, service_code: &ServiceCode) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(service_code);
    }

    /// Drop every cached price.
    pub fn invalidate_all(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Write a service cost, record the change and drop its cached price.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Unavailable` if the store write fails.
    pub async fn set_cost(
        &self,
        cost: &ServiceCost,
        changed_by: &str,
        reason: Option<&str>,
    ) -> Result<ServiceCostChange, CatalogError> {
        let change = self.store.put_service_cost(cost, changed_by, reason).await?;
        self.invalidate(&cost.service_code);
        tracing::info!(
            service_code = %cost.service_code,
            change_id = %change.id,
            change_kind = change.kind.as_str(),
            previous_cost = ?change.previous.map(|t| t.cost),
            cost = %cost.cost,
            effective_cost = %cost.effective_cost(),
            active = %cost.active,
            changed_by = %changed_by,
            "Service cost updated"
        );
        Ok(change)
    }

    /// Recorded cost changes, newest first, for one service or all of them.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Unavailable` if the store read fails.
    pub async fn history(
        &self,
        service_code: Option<&ServiceCode>,
        limit: usize,
    ) -> Result<Vec<ServiceCostChange>, CatalogError> {
        Ok(self.store.list_cost_changes(service_code, limit).await?)
    }

    /// Full (active and inactive) cost row of a service, uncached.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Unavailable` if the store read fails.
    pub async fn get(&self, service_code: &ServiceCode) -> Result<Option<ServiceCost>, CatalogError> {
        Ok(self.store.get_service_cost(service_code).await?)
    }

    fn cached(&self, service_code: &ServiceCode) -> Option<Price> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache
            .get(service_code)
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, price)| price.clone())
    }
}

#[async_trait]
impl Catalog for StoreCatalog {
    async fn cost(&self, service_code: &ServiceCode) -> Result<Option<Price>, CatalogError> {
        if let Some(price) = self.cached(service_code) {
            return Ok(Some(price));
        }

        let price = self
            .store
            .get_service_cost(service_code)
            .await?
            .and_then(|cost| cost.price());

        if let Some(price) = &price {
            if !self.ttl.is_zero() {
                self.cache
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(service_code.clone(), (Instant::now(), price.clone()));
            }
        }

        Ok(price)
    }

    async fn list_active(&self) -> Result<Vec<ServiceCost>, CatalogError> {
        Ok(sort_active(self.store.list_service_costs().await?))
    }
}

/// Insert the default catalog entries that are missing from the store.
///
/// Existing rows (including admin edits) are left untouched. Each insert is
/// recorded in the cost history as made by `system`. Returns the number of
/// rows inserted.
///
/// # Errors
///
/// Returns `CatalogError::Unavailable` if the store cannot be read or written.
pub async fn seed_defaults(store: &dyn Store) -> Result<usize, CatalogError> {
    let mut inserted = 0;
    for cost in default_catalog() {
        if store.get_service_cost(&cost.service_code).await?.is_none() {
            store.put_service_cost(&cost, SEED_AUTHOR, None).await?;
            inserted += 1;
        }
    }

    if inserted > 0 {
        tracing::info!(inserted = %inserted, "Seeded default service costs");
    }
    Ok(inserted)
}

// ============================================================================
// Static catalog
// ============================================================================

/// Fixed in-process catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    costs: HashMap<ServiceCode, ServiceCost>,
}

impl StaticCatalog {
    /// Build a catalog from a list of costs. Later duplicates win.
    #[must_use]
    pub fn new(costs: impl IntoIterator<Item = ServiceCost>) -> Self {
        Self {
            costs: costs
                .into_iter()
                .map(|cost| (cost.service_code.clone(), cost))
                .collect(),
        }
    }

    /// The default catalog.
    #[must_use]
    pub fn defaults() -> Self {
        Self::new(default_catalog())
    }
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn cost(&self, service_code: &ServiceCode) -> Result<Option<Price>, CatalogError> {
        Ok(self.costs.get(service_code).and_then(ServiceCost::price))
    }

    async fn list_active(&self) -> Result<Vec<ServiceCost>, CatalogError> {
        Ok(sort_active(self.costs.values().cloned().collect()))
    }
}
