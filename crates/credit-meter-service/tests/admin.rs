//! Admin endpoint integration tests.

mod common;

use axum::http::StatusCode;
use chrono::{Duration, SecondsFormat, Utc};
use common::{header, TestHarness};
use credit_meter_core::{InvocationId, ServiceCode, UsageRecord};
use serde_json::{json, Value};

fn stale(mut record: UsageRecord) -> UsageRecord {
    record.updated_at = Utc::now() - Duration::hours(1);
    record
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn service_key_cannot_reach_admin_routes() {
    let harness = TestHarness::new().await;

    let response = harness.post("/v1/admin/reconcile").await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn wrong_admin_key_is_rejected() {
    let harness = TestHarness::new().await;
    let (name, value) = header("x-admin-key", "guess");

    let response = harness
        .server
        .post("/v1/admin/reconcile")
        .add_header(name, value)
        .await;

    response.assert_status_unauthorized();
}

// ============================================================================
// Reconciliation
// ============================================================================

#[tokio::test]
async fn reconcile_with_nothing_to_do() {
    let harness = TestHarness::new().await;

    let response = harness.admin_post("/v1/admin/reconcile").await;

    response.assert_status_ok();
    let report: Value = response.json();
    assert_eq!(report["scanned"], 0);
    assert_eq!(report["refunded"], 0);
}

#[tokio::test]
async fn reconcile_settles_interrupted_invocations() {
    let harness = TestHarness::new().await;
    harness.fund(100).await;
    let code = ServiceCode::new("ai_matching").unwrap();
    let store = &harness.state.store;

    // Never charged: the process died before the debit.
    let never_charged = InvocationId::generate();
    let record = UsageRecord::requested(
        never_charged,
        harness.account_id,
        code.clone(),
        50,
        Value::Null,
    );
    store.put_usage(&stale(record)).await.unwrap();

    // Charged, then the process died before the action finished.
    let charged = InvocationId::generate();
    let receipt = harness
        .state
        .ledger
        .debit(&harness.account_id, &code, 50, charged, Value::Null)
        .await
        .unwrap();
    let mut record = UsageRecord::requested(charged, harness.account_id, code, 50, Value::Null);
    record.mark_charged(receipt.entry.id).unwrap();
    store.put_usage(&stale(record)).await.unwrap();
    assert_eq!(harness.balance().await, 50);

    let response = harness.admin_post("/v1/admin/reconcile").await;

    response.assert_status_ok();
    let report: Value = response.json();
    assert_eq!(report["scanned"], 2);
    assert_eq!(report["rejected"], 1);
    assert_eq!(report["refunded"], 1);
    assert_eq!(harness.balance().await, 100);

    let record: Value = harness
        .get(&format!("/v1/invocations/{charged}"))
        .await
        .json();
    assert_eq!(record["state"], "refunded");

    // A second pass finds nothing left.
    let report: Value = harness.admin_post("/v1/admin/reconcile").await.json();
    assert_eq!(report["scanned"], 0);
    assert_eq!(harness.balance().await, 100);
}

// ============================================================================
// Audit
// ============================================================================

#[tokio::test]
async fn audit_reports_consistent_projection() {
    let harness = TestHarness::new().await;
    harness.fund(100).await;
    harness
        .post("/v1/matching")
        .json(&json!({
            "account_id": harness.account_id.to_string(),
            "candidate": {},
            "job": {}
        }))
        .await
        .assert_status_ok();

    let response = harness
        .admin_get(&format!(
            "/v1/admin/accounts/{}/audit",
            harness.account_id
        ))
        .await;

    response.assert_status_ok();
    let check: Value = response.json();
    assert_eq!(check["balance"], 50);
    assert_eq!(check["projected"], 50);
    assert_eq!(check["entry_count"], 2);
    assert_eq!(check["consistent"], true);
}

#[tokio::test]
async fn audit_of_unknown_account_is_not_found() {
    let harness = TestHarness::new().await;

    let response = harness
        .admin_get(&format!(
            "/v1/admin/accounts/{}/audit",
            harness.account_id
        ))
        .await;

    response.assert_status_not_found();
}

// ============================================================================
// Catalog management
// ============================================================================

#[tokio::test]
async fn catalog_lists_active_services() {
    let harness = TestHarness::new().await;

    let response = harness.get("/v1/catalog").await;

    response.assert_status_ok();
    let body: Value = response.json();
    let services = body["services"].as_array().unwrap();
    assert_eq!(services.len(), 7);
    assert!(services
        .iter()
        .any(|s| s["service_code"] == "ai_matching" && s["cost"] == 50));
}

#[tokio::test]
async fn replaced_price_is_visible_immediately() {
    let harness = TestHarness::new().await;

    // Warm the price cache.
    harness
        .post(&harness.account_path("check"))
        .json(&json!({ "service_code": "ai_coach" }))
        .await
        .assert_status_ok();

    harness
        .admin_put("/v1/admin/catalog/ai_coach")
        .json(&json!({
            "service_name": "Interview simulation",
            "category": "coaching",
            "cost": 60,
            "discount_percent": 25
        }))
        .await
        .assert_status_ok();

    let service: Value = harness.get("/v1/catalog/ai_coach").await.json();
    assert_eq!(service["base_cost"], 60);
    assert_eq!(service["cost"], 45);
    assert_eq!(service["discount_percent"], 25);

    let check: Value = harness
        .post(&harness.account_path("check"))
        .json(&json!({ "service_code": "ai_coach" }))
        .await
        .json();
    assert_eq!(check["required"], 45);
}

#[tokio::test]
async fn deactivated_service_leaves_the_catalog() {
    let harness = TestHarness::new().await;

    harness
        .admin_put("/v1/admin/catalog/featured_application")
        .json(&json!({
            "service_name": "Featured application",
            "category": "visibility",
            "cost": 25,
            "active": false
        }))
        .await
        .assert_status_ok();

    harness
        .get("/v1/catalog/featured_application")
        .await
        .assert_status_not_found();

    let body: Value = harness.get("/v1/catalog").await.json();
    assert_eq!(body["services"].as_array().unwrap().len(), 6);
}

#[tokio::test]
async fn invalid_service_cost_is_rejected() {
    let harness = TestHarness::new().await;

    for body in [
        json!({ "service_name": "Free", "category": "misc", "cost": 0 }),
        json!({ "service_name": "Odd", "category": "misc", "cost": 10, "discount_percent": 0 }),
        json!({ "service_name": "Odd", "category": "misc", "cost": 10, "discount_percent": 101 }),
    ] {
        harness
            .admin_put("/v1/admin/catalog/ai_coach")
            .json(&body)
            .await
            .assert_status_bad_request();
    }
}

// ============================================================================
// Cost history
// ============================================================================

#[tokio::test]
async fn price_changes_are_recorded_with_author_and_reason() {
    let harness = TestHarness::new().await;
    let (name, value) = header("x-admin-id", "ops-42");

    harness
        .admin_put("/v1/admin/catalog/ai_coach")
        .add_header(name, value)
        .json(&json!({
            "service_name": "Interview simulation",
            "category": "coaching",
            "cost": 60,
            "reason": "longer sessions"
        }))
        .await
        .assert_status_ok();

    let response = harness
        .admin_get("/v1/admin/catalog/ai_coach/history")
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    let changes = body["changes"].as_array().unwrap();
    assert_eq!(changes.len(), 2);

    assert_eq!(changes[0]["kind"], "updated");
    assert_eq!(changes[0]["changed_by"], "ops-42");
    assert_eq!(changes[0]["reason"], "longer sessions");
    assert_eq!(changes[0]["previous"]["cost"], 40);
    assert_eq!(changes[0]["current"]["cost"], 60);

    assert_eq!(changes[1]["kind"], "created");
    assert_eq!(changes[1]["changed_by"], "system");
    assert_eq!(changes[1]["previous"], Value::Null);
}

#[tokio::test]
async fn cost_history_spans_services_and_filters() {
    let harness = TestHarness::new().await;
    harness.set_price("ai_matching", 55).await;

    let body: Value = harness.admin_get("/v1/admin/cost-history").await.json();
    let changes = body["changes"].as_array().unwrap();
    assert_eq!(changes.len(), 8);
    assert_eq!(changes[0]["service_code"], "ai_matching");
    assert_eq!(changes[0]["current"]["cost"], 55);

    let body: Value = harness
        .admin_get("/v1/admin/cost-history")
        .add_query_param("service_code", "ai_matching")
        .add_query_param("limit", 1)
        .await
        .json();
    let changes = body["changes"].as_array().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0]["kind"], "updated");

    harness
        .admin_get("/v1/admin/cost-history")
        .add_query_param("service_code", "Not A Code")
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn history_of_unknown_service_is_not_found() {
    let harness = TestHarness::new().await;

    harness
        .admin_get("/v1/admin/catalog/teleportation/history")
        .await
        .assert_status_not_found();

    harness
        .get("/v1/admin/catalog/ai_coach/history")
        .await
        .assert_status_unauthorized();
}

// ============================================================================
// Usage statistics
// ============================================================================

#[tokio::test]
async fn statistics_count_invocations_per_service() {
    let harness = TestHarness::new().await;
    harness.fund(120).await;
    let matching = json!({
        "account_id": harness.account_id.to_string(),
        "candidate": {},
        "job": {}
    });

    harness.post("/v1/matching").json(&matching).await.assert_status_ok();
    harness.post("/v1/matching").json(&matching).await.assert_status_ok();
    // 20 credits left: rejected before any charge.
    harness
        .post("/v1/matching")
        .json(&matching)
        .await
        .assert_status(StatusCode::PAYMENT_REQUIRED);

    let response = harness.admin_get("/v1/admin/statistics").await;

    response.assert_status_ok();
    let body: Value = response.json();
    let services = body["services"].as_array().unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0]["service_code"], "ai_matching");
    assert_eq!(services[0]["invocations"], 3);
    assert_eq!(services[0]["completed"], 2);
    assert_eq!(services[0]["rejected"], 1);
    assert_eq!(services[0]["credits_consumed"], 100);
    assert_eq!(services[0]["unique_accounts"], 1);
    assert_eq!(body["total_credits_consumed"], 100);
}

#[tokio::test]
async fn statistics_since_excludes_older_usage() {
    let harness = TestHarness::new().await;
    harness.fund(100).await;
    harness
        .post("/v1/matching")
        .json(&json!({
            "account_id": harness.account_id.to_string(),
            "candidate": {},
            "job": {}
        }))
        .await
        .assert_status_ok();

    let later = (Utc::now() + Duration::hours(1)).to_rfc3339_opts(SecondsFormat::Secs, true);
    let body: Value = harness
        .admin_get("/v1/admin/statistics")
        .add_query_param("since", &later)
        .await
        .json();

    assert_eq!(body["services"].as_array().unwrap().len(), 0);
    assert_eq!(body["total_credits_consumed"], 0);

    harness
        .get("/v1/admin/statistics")
        .await
        .assert_status_unauthorized();
}
