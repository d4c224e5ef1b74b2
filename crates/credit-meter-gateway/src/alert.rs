//! Operator alerts.

use credit_meter_core::{AccountId, EntryId, InvocationId};
use serde::Serialize;

/// Log target for operator alerts.
pub const ALERT_TARGET: &str = "credit_meter::alert";

/// A condition that needs a human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Alert {
    /// A debit could not be refunded after the action failed.
    RefundFailed {
        /// The invocation that failed.
        invocation_id: InvocationId,
        /// The charged account.
        account_id: AccountId,
        /// The debit still owed back.
        debit_entry_id: EntryId,
        /// Credits owed.
        amount: i64,
        /// Last refund error.
        error: String,
    },
}

/// Receives operator alerts.
pub trait AlertSink: Send + Sync {
    /// Raise an alert. Must not block.
    fn raise(&self, alert: &Alert);
}

/// Logs alerts at error level on [`ALERT_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn raise(&self, alert: &Alert) {
        match alert {
            Alert::RefundFailed {
                invocation_id,
                account_id,
                debit_entry_id,
                amount,
                error,
            } => tracing::error!(
                target: ALERT_TARGET,
                invocation_id = %invocation_id,
                account_id = %account_id,
                debit_entry_id = %debit_entry_id,
                amount = %amount,
                error = %error,
                "Refund failed; credits owed to account"
            ),
        }
    }
}
