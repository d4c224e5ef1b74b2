//! Ledger event notifications.
//!
//! Notifications are fire-and-forget: the gateway spawns them after a charge
//! or refund has committed and only logs failures.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credit_meter_core::{AccountId, EntryId, InvocationId, ServiceCode};
use serde::{Deserialize, Serialize};

use crate::crypto::signature_header;
use crate::ledger::RetryPolicy;

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "x-credit-meter-signature";

/// Per-request timeout of the webhook notifier.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from a [`Notifier`].
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The request could not be sent.
    #[error("notification request failed: {0}")]
    Http(String),

    /// The receiver answered with a non-success status.
    #[error("notification rejected with status {0}")]
    Status(u16),

    /// The event could not be encoded or signed.
    #[error("notification encoding failed: {0}")]
    Encoding(String),
}

impl NotifyError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status(status) => *status >= 500 || *status == 429,
            Self::Encoding(_) => false,
        }
    }
}

/// What happened to the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventKind {
    /// Credits were debited for an invocation.
    Charged,
    /// A debit was refunded.
    Refunded,
}

/// Payload sent to notification receivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Event kind.
    #[serde(rename = "event")]
    pub kind: LedgerEventKind,
    /// The invocation that caused the entry.
    pub invocation_id: InvocationId,
    /// The affected account.
    pub account_id: AccountId,
    /// The service paid for.
    pub service_code: ServiceCode,
    /// The ledger entry.
    pub entry_id: EntryId,
    /// Credits moved (always positive).
    pub amount: i64,
    /// Balance after the entry.
    pub balance: i64,
    /// When the entry was written.
    pub occurred_at: DateTime<Utc>,
}

/// Receives ledger events.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one event.
    ///
    /// # Errors
    ///
    /// Returns a `NotifyError` if delivery failed; the caller only logs it.
    async fn notify(&self, event: &LedgerEvent) -> Result<(), NotifyError>;
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _event: &LedgerEvent) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// POSTs events as JSON to a webhook URL.
///
/// With a secret configured each request carries an HMAC-SHA256 signature
/// in [`SIGNATURE_HEADER`] (`t=<unix seconds>,v1=<hex>` over `"{t}.{body}"`).
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
    retry: RetryPolicy,
}

impl WebhookNotifier {
    /// Create a notifier for `url`.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::Http` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, secret: Option<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| NotifyError::Http(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            secret,
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn send(&self, body: &[u8]) -> Result<(), NotifyError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec());

        if let Some(secret) = &self.secret {
            let signature = signature_header(secret, Utc::now().timestamp(), body)
                .ok_or_else(|| NotifyError::Encoding("signing failed".into()))?;
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Status(status.as_u16()))
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &LedgerEvent) -> Result<(), NotifyError> {
        let body = serde_json::to_vec(event).map_err(|e| NotifyError::Encoding(e.to_string()))?;

        self.retry
            .run("webhook", NotifyError::is_retryable, || self.send(&body))
            .await?;

        tracing::debug!(
            invocation_id = %event.invocation_id,
            event = ?event.kind,
            "Notification delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_event_name() {
        let event = LedgerEvent {
            kind: LedgerEventKind::Refunded,
            invocation_id: InvocationId::generate(),
            account_id: AccountId::generate(),
            service_code: ServiceCode::new("ai_matching").unwrap(),
            entry_id: EntryId::generate(),
            amount: 40,
            balance: 100,
            occurred_at: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "refunded");
        assert_eq!(json["service_code"], "ai_matching");
        assert_eq!(json["amount"], 40);
    }

    #[test]
    fn client_errors_are_not_retried() {
        assert!(!NotifyError::Status(400).is_retryable());
        assert!(NotifyError::Status(503).is_retryable());
        assert!(NotifyError::Status(429).is_retryable());
        assert!(NotifyError::Http("connection refused".into()).is_retryable());
    }
}
