//! PostgreSQL backend tests.
//!
//! These run against a live database:
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/credit_meter_test cargo test -p credit-meter-store -- --ignored
//! ```

use std::sync::Arc;

use credit_meter_core::{
    default_catalog, projected_balance, AccountId, CostChangeKind, InvocationId, InvocationState,
    ServiceCode, ServiceCost, UsageRecord,
};
use credit_meter_store::{CreditRequest, DebitRequest, PgStore, Store, StoreError};

async fn store() -> PgStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let store = PgStore::connect(&url, 20).await.unwrap();
    store.migrate().await.unwrap();
    store
}

async fn funded(store: &PgStore, amount: i64) -> AccountId {
    let account_id = AccountId::generate();
    store
        .credit(&CreditRequest {
            account_id,
            amount,
            description: "Starter pack".into(),
            metadata: serde_json::json!({"payment_ref": "test"}),
        })
        .await
        .unwrap();
    account_id
}

fn debit_request(account_id: AccountId, amount: i64, key: InvocationId) -> DebitRequest {
    DebitRequest {
        account_id,
        service_code: ServiceCode::new("ai_matching").unwrap(),
        amount,
        idempotency_key: key,
        metadata: serde_json::json!({"job_id": "job-1"}),
    }
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn debit_and_refund_are_idempotent() {
    let store = store().await;
    let id = funded(&store, 100).await;
    let key = InvocationId::generate();

    let debit = store.debit(&debit_request(id, 40, key)).await.unwrap();
    assert_eq!(debit.balance, 60);
    let replay = store.debit(&debit_request(id, 40, key)).await.unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.entry.id, debit.entry.id);

    let refund = store.refund(&debit.entry.id, "action failed").await.unwrap();
    assert_eq!(refund.balance, 100);
    let again = store.refund(&debit.entry.id, "action failed").await.unwrap();
    assert!(again.replayed);

    let entries = store.all_entries(&id).await.unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(projected_balance(&entries), 100);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn insufficient_debit_is_rejected_without_mutation() {
    let store = store().await;
    let id = funded(&store, 30).await;

    let result = store
        .debit(&debit_request(id, 40, InvocationId::generate()))
        .await;
    assert!(matches!(
        result,
        Err(StoreError::InsufficientCredits {
            balance: 30,
            required: 40
        })
    ));

    let account = store.get_account(&id).await.unwrap().unwrap();
    assert_eq!(account.balance, 30);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn concurrent_debits_are_serialized() {
    let store = Arc::new(store().await);
    let id = funded(&store, 50).await;

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .debit(&debit_request(id, 40, InvocationId::generate()))
                    .await
            })
        })
        .collect();

    let mut ok = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            ok += 1;
        }
    }
    assert_eq!(ok, 1);

    let account = store.get_account(&id).await.unwrap().unwrap();
    assert_eq!(account.balance, 10);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn usage_records_upsert() {
    let store = store().await;
    let mut record = UsageRecord::requested(
        InvocationId::generate(),
        AccountId::generate(),
        ServiceCode::new("ai_matching").unwrap(),
        50,
        serde_json::Value::Null,
    );
    store.put_usage(&record).await.unwrap();

    record.mark_rejected("insufficient credits").unwrap();
    store.put_usage(&record).await.unwrap();

    let loaded = store.get_usage(&record.invocation_id).await.unwrap().unwrap();
    assert_eq!(loaded.state, InvocationState::Rejected);
    assert_eq!(loaded.error.as_deref(), Some("insufficient credits"));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn service_costs_upsert() {
    let store = store().await;
    for cost in default_catalog() {
        store.put_service_cost(&cost, "system", None).await.unwrap();
    }

    let code = ServiceCode::new("ai_matching").unwrap();
    let cost = store.get_service_cost(&code).await.unwrap().unwrap();
    assert_eq!(cost.cost, 50);

    let discounted = cost.with_promotion(20).unwrap();
    store
        .put_service_cost(&discounted, "admin-1", Some("promo"))
        .await
        .unwrap();
    let reloaded = store.get_service_cost(&code).await.unwrap().unwrap();
    assert_eq!(reloaded.effective_cost(), 40);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn cost_changes_are_appended() {
    let store = store().await;
    let suffix = AccountId::generate().to_string().replace('-', "");
    let code = ServiceCode::new(format!("svc_{}", &suffix[..12])).unwrap();

    let cost = ServiceCost::new(code.clone(), "Test service", "testing", 30).unwrap();
    let created = store.put_service_cost(&cost, "system", None).await.unwrap();
    assert_eq!(created.kind, CostChangeKind::Created);
    assert_eq!(created.previous, None);

    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let cheaper = ServiceCost::new(code.clone(), "Test service", "testing", 20)
        .unwrap()
        .with_promotion(10)
        .unwrap();
    let updated = store
        .put_service_cost(&cheaper, "admin-1", Some("launch"))
        .await
        .unwrap();
    assert_eq!(updated.kind, CostChangeKind::Updated);
    assert_eq!(updated.previous.map(|t| t.cost), Some(30));

    let history = store.list_cost_changes(Some(&code), 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, updated.id);
    assert_eq!(history[0].current.discount_percent, Some(10));
    assert_eq!(history[0].reason.as_deref(), Some("launch"));
    assert_eq!(history[1].id, created.id);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn statistics_aggregate_usage_by_service() {
    let store = store().await;
    let suffix = AccountId::generate().to_string().replace('-', "");
    let code = ServiceCode::new(format!("stat_{}", &suffix[..12])).unwrap();
    let since = chrono::Utc::now();

    let account_id = AccountId::generate();
    let mut done = UsageRecord::requested(
        InvocationId::generate(),
        account_id,
        code.clone(),
        25,
        serde_json::Value::Null,
    );
    done.mark_charged(credit_meter_core::EntryId::generate()).unwrap();
    done.mark_completed(12, serde_json::Value::Null).unwrap();
    store.put_usage(&done).await.unwrap();

    let mut rejected = UsageRecord::requested(
        InvocationId::generate(),
        account_id,
        code.clone(),
        25,
        serde_json::Value::Null,
    );
    rejected.mark_rejected("insufficient credits").unwrap();
    store.put_usage(&rejected).await.unwrap();

    let stats = store.service_statistics(Some(since)).await.unwrap();
    let ours = stats.iter().find(|s| s.service_code == code).unwrap();
    assert_eq!(ours.invocations, 2);
    assert_eq!(ours.completed, 1);
    assert_eq!(ours.rejected, 1);
    assert_eq!(ours.credits_consumed, 25);
    assert_eq!(ours.unique_accounts, 1);
    assert!(ours.last_used_at.is_some());
}
