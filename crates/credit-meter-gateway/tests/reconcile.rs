//! Reconciliation tests.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{code, request, Harness};
use credit_meter_core::{AccountId, InvocationId, InvocationState, UsageRecord};
use credit_meter_gateway::{ReconcileConfig, Reconciler};
use credit_meter_store::Store;

fn reconciler(h: &Harness) -> Reconciler {
    Reconciler::new(
        h.gateway.clone(),
        ReconcileConfig {
            stale_after: Duration::ZERO,
            batch_size: 100,
        },
    )
}

async fn requested(h: &Harness, account: AccountId) -> UsageRecord {
    let record = UsageRecord::requested(
        InvocationId::generate(),
        account,
        code(),
        40,
        serde_json::Value::Null,
    );
    h.store.inner.put_usage(&record).await.unwrap();
    record
}

async fn debit(h: &Harness, record: &UsageRecord) -> credit_meter_core::EntryId {
    h.gateway
        .ledger()
        .debit(
            &record.account_id,
            &record.service_code,
            record.cost,
            record.invocation_id,
            serde_json::Value::Null,
        )
        .await
        .unwrap()
        .entry
        .id
}

async fn settle_clock() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

#[tokio::test]
async fn requested_without_debit_is_rejected() {
    let h = Harness::new(40);
    let account = h.funded(100).await;
    let record = requested(&h, account).await;
    settle_clock().await;

    let report = reconciler(&h).run_once().await.unwrap();

    assert_eq!(report.scanned, 1);
    assert_eq!(report.rejected, 1);
    assert_eq!(h.state(&record.invocation_id).await, InvocationState::Rejected);
    assert_eq!(h.balance(&account), 100);
}

#[tokio::test]
async fn requested_with_committed_debit_is_refunded() {
    let h = Harness::new(40);
    let account = h.funded(100).await;
    let record = requested(&h, account).await;
    debit(&h, &record).await;
    assert_eq!(h.balance(&account), 60);
    settle_clock().await;

    let report = reconciler(&h).run_once().await.unwrap();

    assert_eq!(report.refunded, 1);
    assert_eq!(h.state(&record.invocation_id).await, InvocationState::Refunded);
    assert_eq!(h.balance(&account), 100);
}

#[tokio::test]
async fn charged_after_crash_is_refunded() {
    let h = Harness::new(40);
    let account = h.funded(100).await;
    let mut record = requested(&h, account).await;
    let entry_id = debit(&h, &record).await;
    record.mark_charged(entry_id).unwrap();
    h.store.inner.put_usage(&record).await.unwrap();
    settle_clock().await;

    let report = reconciler(&h).run_once().await.unwrap();

    assert_eq!(report.refunded, 1);
    let settled = h.store.inner.get_usage(&record.invocation_id).await.unwrap().unwrap();
    assert_eq!(settled.state, InvocationState::Refunded);
    assert!(settled.refund_entry_id.is_some());
    assert_eq!(h.balance(&account), 100);
}

#[tokio::test]
async fn outstanding_refund_is_retried() {
    let h = Harness::new(40);
    let account = h.funded(100).await;
    h.store.fail_refunds.store(true, Ordering::SeqCst);
    let invocation = InvocationId::generate();

    let _ = h
        .gateway
        .invoke(request(account, invocation), || async { Err::<(), _>("boom") })
        .await;
    assert_eq!(h.state(&invocation).await, InvocationState::Failed);
    settle_clock().await;

    // Still failing: alert again, stay Failed.
    let report = reconciler(&h).run_once().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(h.alerts.count(), 2);
    assert_eq!(h.state(&invocation).await, InvocationState::Failed);

    h.store.fail_refunds.store(false, Ordering::SeqCst);
    settle_clock().await;
    let report = reconciler(&h).run_once().await.unwrap();

    assert_eq!(report.refunded, 1);
    assert_eq!(h.state(&invocation).await, InvocationState::Refunded);
    assert_eq!(h.balance(&account), 100);
}

#[tokio::test]
async fn fresh_and_finished_records_are_left_alone() {
    let h = Harness::new(40);
    let account = h.funded(100).await;
    let record = requested(&h, account).await;
    h.gateway
        .invoke(request(account, InvocationId::generate()), || async {
            Ok::<_, String>(())
        })
        .await
        .unwrap();

    let patient = Reconciler::new(
        h.gateway.clone(),
        ReconcileConfig {
            stale_after: Duration::from_secs(3600),
            batch_size: 100,
        },
    );
    let report = patient.run_once().await.unwrap();
    assert_eq!(report.scanned, 0);
    assert_eq!(h.state(&record.invocation_id).await, InvocationState::Requested);

    settle_clock().await;
    let report = reconciler(&h).run_once().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(h.balance(&account), 60);
}

#[tokio::test]
async fn refunds_are_never_doubled() {
    let h = Harness::new(40);
    let account = h.funded(100).await;
    let mut record = requested(&h, account).await;
    let entry_id = debit(&h, &record).await;
    record.mark_charged(entry_id).unwrap();
    h.store.inner.put_usage(&record).await.unwrap();
    settle_clock().await;

    reconciler(&h).run_once().await.unwrap();
    settle_clock().await;
    let report = reconciler(&h).run_once().await.unwrap();

    assert_eq!(report.scanned, 0);
    assert_eq!(h.balance(&account), 100);
    assert_eq!(h.store.inner.all_entries(&account).await.unwrap().len(), 3);
}
