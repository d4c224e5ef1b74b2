//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, admin, catalog, health, invocations, matching};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for metered endpoints.
/// Each one may hold a paid action for up to the action timeout.
const METERED_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Accounts (Service API key auth)
/// - `GET /v1/accounts/:id/balance` - Current balance
/// - `GET /v1/accounts/:id/entries` - Ledger history
/// - `GET /v1/accounts/:id/usage` - Metered invocation history
/// - `POST /v1/accounts/:id/credits` - Record a purchase or grant
/// - `POST /v1/accounts/:id/check` - Can the account pay for a service
///
/// ## Catalog (Service API key auth)
/// - `GET /v1/catalog` - Active services
/// - `GET /v1/catalog/:code` - One active service
///
/// ## Metered features (Service API key auth, own concurrency limit)
/// - `POST /v1/matching` - Score a candidate against a job
/// - `POST /v1/matching/batch` - Score several candidates against one job
/// - `GET /v1/invocations/:id` - Usage record of an invocation
///
/// ## Admin (Admin API key auth)
/// - `POST /v1/admin/reconcile` - One reconciliation pass
/// - `GET /v1/admin/accounts/:id/audit` - Balance vs ledger check
/// - `PUT /v1/admin/catalog/:code` - Replace a service cost
/// - `GET /v1/admin/catalog/:code/history` - Cost changes of one service
/// - `GET /v1/admin/cost-history` - Cost changes across services
/// - `GET /v1/admin/statistics` - Per-service usage and credits consumed
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let metered_routes = Router::new()
        .route("/matching", post(matching::run_matching))
        .route("/matching/batch", post(matching::run_batch_matching))
        .layer(ConcurrencyLimitLayer::new(METERED_MAX_CONCURRENT_REQUESTS));

    let admin_routes = Router::new()
        .route("/reconcile", post(admin::run_reconciliation))
        .route("/accounts/:id/audit", get(admin::audit_account))
        .route("/catalog/:code", put(admin::put_service))
        .route("/catalog/:code/history", get(admin::service_cost_history))
        .route("/cost-history", get(admin::cost_history))
        .route("/statistics", get(admin::usage_statistics));

    let api_routes = Router::new()
        // Accounts
        .route("/accounts/:id/balance", get(accounts::get_balance))
        .route("/accounts/:id/entries", get(accounts::list_entries))
        .route("/accounts/:id/usage", get(accounts::list_usage))
        .route("/accounts/:id/credits", post(accounts::add_credits))
        .route("/accounts/:id/check", post(accounts::check_balance))
        // Catalog
        .route("/catalog", get(catalog::list_services))
        .route("/catalog/:code", get(catalog::get_service))
        // Invocations
        .route("/invocations/:id", get(invocations::get_invocation))
        .nest("/admin", admin_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        // Metered routes (with their own concurrency limit)
        .merge(metered_routes);

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
