//! Application state.

use std::sync::Arc;

use credit_meter_gateway::{
    Gateway, GatewayConfig, Ledger, NoopNotifier, Notifier, ReconcileConfig, Reconciler,
    StoreCatalog, TracingAlertSink, WebhookNotifier,
};
use credit_meter_store::{PgStore, Store, StoreError};

use crate::config::ServiceConfig;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Credit ledger over `store`.
    pub ledger: Ledger,

    /// Cached service cost catalog.
    pub catalog: Arc<StoreCatalog>,

    /// Metering gateway for paid features.
    pub gateway: Gateway,

    /// Reconciliation of interrupted invocations.
    pub reconciler: Reconciler,

    /// Service configuration.
    pub config: ServiceConfig,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let ledger = Ledger::new(Arc::clone(&store));
        let catalog = Arc::new(StoreCatalog::with_ttl(
            Arc::clone(&store),
            config.catalog_cache_ttl(),
        ));

        // Create webhook notifier if configured
        let notifier: Arc<dyn Notifier> = match config.notify_webhook_url.as_ref() {
            Some(url) => match WebhookNotifier::new(url, config.notify_webhook_secret.clone()) {
                Ok(notifier) => {
                    tracing::info!(webhook_url = %url, "Ledger event webhook enabled");
                    Arc::new(notifier)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create webhook notifier");
                    Arc::new(NoopNotifier)
                }
            },
            None => {
                tracing::warn!("Webhook not configured - ledger events will not be delivered");
                Arc::new(NoopNotifier)
            }
        };

        let gateway = Gateway::with_collaborators(
            catalog.clone(),
            ledger.clone(),
            GatewayConfig {
                action_timeout: config.action_timeout(),
                ..GatewayConfig::default()
            },
            notifier,
            Arc::new(TracingAlertSink),
        );

        let reconciler = Reconciler::new(
            gateway.clone(),
            ReconcileConfig {
                stale_after: config.reconcile_stale_after(),
                ..ReconcileConfig::default()
            },
        );

        Self {
            store,
            ledger,
            catalog,
            gateway,
            reconciler,
            config,
        }
    }
}

/// Open the configured store.
///
/// PostgreSQL when `DATABASE_URL` is set (migrations are applied), `RocksDB`
/// in `DATA_DIR` when built with `rocksdb-backend`, memory otherwise.
///
/// # Errors
///
/// Returns a `StoreError` if the database cannot be opened or migrated.
pub async fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, StoreError> {
    if let Some(url) = config.database_url.as_deref() {
        tracing::info!(
            max_connections = config.database_max_connections,
            "Connecting to PostgreSQL store"
        );
        let store = PgStore::connect(url, config.database_max_connections).await?;
        store.migrate().await?;
        return Ok(Arc::new(store));
    }

    #[cfg(feature = "rocksdb-backend")]
    {
        tracing::info!(path = %config.data_dir, "Opening RocksDB store");
        let store = credit_meter_store::RocksStore::open(&config.data_dir)?;
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "rocksdb-backend"))]
    {
        tracing::warn!("DATABASE_URL not set - using in-memory store, data will not persist");
        Ok(Arc::new(credit_meter_store::MemoryStore::new()))
    }
}
