//! Metering gateway for credit-meter.
//!
//! This crate couples the credit ledger to the paid features it guards:
//!
//! - [`Catalog`]: what a service costs ([`StoreCatalog`], [`StaticCatalog`])
//! - [`Ledger`]: balances, debits, refunds and purchases over a `Store`
//! - [`Gateway`]: charge, run, then complete or refund one invocation
//! - [`Reconciler`]: settles invocations interrupted by a crash or outage
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use credit_meter_core::{AccountId, InvocationId, ServiceCode};
//! use credit_meter_gateway::{Gateway, GatewayConfig, InvocationRequest, Ledger, StaticCatalog};
//! use credit_meter_store::MemoryStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = Ledger::new(Arc::new(MemoryStore::new()));
//! let gateway = Gateway::new(Arc::new(StaticCatalog::defaults()), ledger, GatewayConfig::default());
//!
//! let account_id = AccountId::generate();
//! gateway.ledger().credit(&account_id, 100, "Starter pack", serde_json::Value::Null).await?;
//!
//! let receipt = gateway
//!     .invoke(
//!         InvocationRequest {
//!             account_id,
//!             service_code: ServiceCode::new("ai_matching")?,
//!             invocation_id: InvocationId::generate(),
//!             metadata: serde_json::json!({"job_id": "job-1"}),
//!         },
//!         || async { Ok::<_, String>("matched".to_string()) },
//!     )
//!     .await?;
//! assert_eq!(receipt.balance, 50);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod alert;
pub mod catalog;
pub mod crypto;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod notify;
pub mod reconcile;

pub use alert::{Alert, AlertSink, TracingAlertSink, ALERT_TARGET};
pub use catalog::{
    seed_defaults, Catalog, StaticCatalog, StoreCatalog, DEFAULT_CACHE_TTL, SEED_AUTHOR,
};
pub use error::{CatalogError, GatewayError, GatewayResult, LedgerError, LedgerResult};
pub use gateway::{
    BalanceCheck, Gateway, GatewayConfig, InvocationReceipt, InvocationRequest,
    DEFAULT_ACTION_TIMEOUT,
};
pub use ledger::{Ledger, ProjectionCheck, RetryPolicy, DEFAULT_USAGE_LIMIT};
pub use notify::{
    LedgerEvent, LedgerEventKind, NoopNotifier, Notifier, NotifyError, WebhookNotifier,
    SIGNATURE_HEADER,
};
pub use reconcile::{ReconcileConfig, Reconciler, ReconciliationReport};
