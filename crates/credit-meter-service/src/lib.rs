//! credit-meter HTTP API service.
//!
//! This crate exposes the credit ledger and metered features over HTTP:
//!
//! - Account balances, ledger history and purchases
//! - The service cost catalog
//! - Metered profile/job matching
//! - Operator reconciliation and audits
//!
//! # Authentication
//!
//! 1. **Service API keys** (`x-api-key`) - for every `/v1` route
//! 2. **Admin API keys** (`x-admin-key`) - for `/v1/admin` routes

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::{ConfigError, ServiceConfig};
pub use error::ApiError;
pub use routes::create_router;
pub use state::{open_store, AppState};
