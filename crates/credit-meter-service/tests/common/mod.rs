//! Common test utilities for credit-meter API integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum_test::{TestRequest, TestServer};
use serde_json::{json, Value};

use credit_meter_core::AccountId;
use credit_meter_gateway::seed_defaults;
use credit_meter_service::{create_router, AppState, ServiceConfig};
use credit_meter_store::MemoryStore;

pub const SERVICE_API_KEY: &str = "test-service-key";
pub const ADMIN_API_KEY: &str = "test-admin-key";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// State behind the server, for setup and direct assertions.
    pub state: AppState,
    /// A test account.
    pub account_id: AccountId,
}

impl TestHarness {
    /// Create a harness over a fresh in-memory store with the default catalog.
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        seed_defaults(store.as_ref())
            .await
            .expect("Failed to seed catalog");

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            service_api_key: Some(SERVICE_API_KEY.into()),
            admin_api_key: Some(ADMIN_API_KEY.into()),
            reconcile_interval_seconds: None,
            ..ServiceConfig::default()
        };

        let state = AppState::new(store, config);
        let server =
            TestServer::new(create_router(state.clone())).expect("Failed to create test server");

        Self {
            server,
            state,
            account_id: AccountId::generate(),
        }
    }

    /// GET with the service API key.
    pub fn get(&self, path: &str) -> TestRequest {
        with_service_key(self.server.get(path))
    }

    /// POST with the service API key.
    pub fn post(&self, path: &str) -> TestRequest {
        with_service_key(self.server.post(path))
    }

    /// POST with the admin API key.
    pub fn admin_post(&self, path: &str) -> TestRequest {
        with_admin_key(self.server.post(path))
    }

    /// GET with the admin API key.
    pub fn admin_get(&self, path: &str) -> TestRequest {
        with_admin_key(self.server.get(path))
    }

    /// PUT with the admin API key.
    pub fn admin_put(&self, path: &str) -> TestRequest {
        with_admin_key(self.server.put(path))
    }

    /// Path prefix of the test account.
    pub fn account_path(&self, suffix: &str) -> String {
        format!("/v1/accounts/{}/{suffix}", self.account_id)
    }

    /// Add credits to the test account through the API.
    pub async fn fund(&self, amount: i64) {
        self.post(&self.account_path("credits"))
            .json(&json!({ "amount": amount, "reason": "Test funding" }))
            .await
            .assert_status_ok();
    }

    /// Current balance of the test account through the API.
    pub async fn balance(&self) -> i64 {
        let response = self.get(&self.account_path("balance")).await;
        response.assert_status_ok();
        let body: Value = response.json();
        body["balance"].as_i64().expect("balance is a number")
    }

    /// Set the price of a service through the admin API.
    pub async fn set_price(&self, service_code: &str, cost: i64) {
        self.admin_put(&format!("/v1/admin/catalog/{service_code}"))
            .json(&json!({
                "service_name": "Profile / job matching",
                "category": "matching",
                "cost": cost
            }))
            .await
            .assert_status_ok();
    }
}

fn with_service_key(request: TestRequest) -> TestRequest {
    request
        .add_header(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_static(SERVICE_API_KEY),
        )
        .add_header(
            HeaderName::from_static("x-service-name"),
            HeaderValue::from_static("test-suite"),
        )
}

fn with_admin_key(request: TestRequest) -> TestRequest {
    request.add_header(
        HeaderName::from_static("x-admin-key"),
        HeaderValue::from_static(ADMIN_API_KEY),
    )
}

/// Build a header pair from arbitrary strings.
pub fn header(name: &'static str, value: &str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static(name),
        HeaderValue::from_str(value).expect("valid header value"),
    )
}

/// A candidate meeting every requirement of [`full_job`].
pub fn ideal_candidate() -> Value {
    json!({
        "skills": ["rust", "postgresql", "docker"],
        "experience_years": 8,
        "sector": "fintech",
        "education": { "level": "doctorate", "field": "computer science" },
        "location": { "city": "Lyon", "region": "Auvergne-Rhone-Alpes" },
        "availability": "immediate"
    })
}

/// A job with every dimension specified.
pub fn full_job() -> Value {
    json!({
        "required_skills": ["Rust", "PostgreSQL", "Docker"],
        "required_years": 5,
        "sector": "Fintech",
        "education": { "level": "master", "field": "Computer Science" },
        "location": { "city": "Lyon", "region": "Auvergne-Rhone-Alpes" }
    })
}
