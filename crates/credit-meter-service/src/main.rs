//! credit-meter service - HTTP API for credits and metered features.

use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use credit_meter_gateway::seed_defaults;
use credit_meter_service::{create_router, open_store, AppState, ServiceConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,credit_meter=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting credit-meter service");

    // Load configuration from environment
    let config = ServiceConfig::from_env();
    config.validate()?;

    tracing::info!(
        listen_addr = %config.listen_addr,
        postgres = %config.database_url.is_some(),
        webhook_configured = %config.notify_webhook_url.is_some(),
        action_timeout_seconds = config.action_timeout_seconds,
        reconcile_interval_seconds = ?config.reconcile_interval_seconds,
        "Service configuration loaded"
    );

    let store = open_store(&config).await?;

    let seeded = seed_defaults(store.as_ref()).await?;
    if seeded > 0 {
        tracing::info!(seeded, "Seeded default service catalog");
    }

    let state = AppState::new(store, config.clone());

    if let Some(seconds) = config.reconcile_interval_seconds {
        tracing::info!(interval_seconds = seconds, "Starting reconciliation task");
        let _reconciler = state.reconciler.clone().spawn(Duration::from_secs(seconds));
    }

    // Create the router
    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
