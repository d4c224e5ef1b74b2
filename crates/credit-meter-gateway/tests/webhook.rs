//! Webhook notifier tests against a mock receiver.

use std::time::Duration;

use chrono::Utc;
use credit_meter_core::{AccountId, EntryId, InvocationId, ServiceCode};
use credit_meter_gateway::crypto::verify_signature_header;
use credit_meter_gateway::{
    LedgerEvent, LedgerEventKind, Notifier, NotifyError, RetryPolicy, WebhookNotifier,
    SIGNATURE_HEADER,
};
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn event() -> LedgerEvent {
    LedgerEvent {
        kind: LedgerEventKind::Charged,
        invocation_id: InvocationId::generate(),
        account_id: AccountId::generate(),
        service_code: ServiceCode::new("ai_matching").unwrap(),
        entry_id: EntryId::generate(),
        amount: 40,
        balance: 60,
        occurred_at: Utc::now(),
    }
}

fn quick() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    }
}

#[tokio::test]
async fn signed_event_is_delivered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/credits"))
        .and(header_exists(SIGNATURE_HEADER))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let notifier =
        WebhookNotifier::new(format!("{}/hooks/credits", server.uri()), Some("whsec".into()))
            .unwrap();
    let event = event();
    notifier.notify(&event).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];
    let signature = request.headers[SIGNATURE_HEADER].to_str().unwrap();
    assert!(verify_signature_header("whsec", signature, &request.body));

    let body: LedgerEvent = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body, event);
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(server.uri(), None)
        .unwrap()
        .with_retry(quick());
    let result = notifier.notify(&event()).await;

    assert!(matches!(result, Err(NotifyError::Status(503))));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(server.uri(), None)
        .unwrap()
        .with_retry(quick());
    let result = notifier.notify(&event()).await;

    assert!(matches!(result, Err(NotifyError::Status(400))));
}
