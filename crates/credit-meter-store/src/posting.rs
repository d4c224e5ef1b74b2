//! Balance checks and entry construction shared by the lock-based backends.
//!
//! Each function takes the account as read under its lock and returns the
//! updated account together with the entry to append. Nothing is written here;
//! the caller persists both in one step before releasing the lock.

use credit_meter_core::{Account, CreditError, LedgerEntry};

use crate::error::{Result, StoreError};
use crate::{CreditRequest, DebitRequest};

/// Check the balance covers `request.amount` and build the debit.
///
/// # Errors
///
/// `StoreError::InsufficientCredits` if the balance is too low (a missing
/// account has a zero balance); `StoreError::Domain` for a non-positive amount.
pub(crate) fn post_debit(
    account: Option<Account>,
    request: &DebitRequest,
) -> Result<(Account, LedgerEntry)> {
    let mut account = account.unwrap_or_else(|| Account::new(request.account_id));

    if !account.has_sufficient_credits(request.amount) {
        return Err(StoreError::InsufficientCredits {
            balance: account.balance,
            required: request.amount,
        });
    }

    let entry = LedgerEntry::debit(
        request.account_id,
        request.service_code.clone(),
        request.amount,
        request.idempotency_key,
        account.balance - request.amount,
        request.metadata.clone(),
    )?;
    account.apply(&entry)?;

    Ok((account, entry))
}

/// Build the refund reversing `debit`.
///
/// # Errors
///
/// `StoreError::Domain` if `debit` is not a debit entry or the refund would
/// overflow the balance.
pub(crate) fn post_refund(
    account: Option<Account>,
    debit: &LedgerEntry,
    reason: &str,
) -> Result<(Account, LedgerEntry)> {
    let mut account = account.unwrap_or_else(|| Account::new(debit.account_id));

    let returned = debit.amount.checked_abs().ok_or(CreditError::Overflow {
        amount: debit.amount,
    })?;
    let refund = LedgerEntry::refund(
        debit,
        add_to_balance(account.balance, returned)?,
        reason.to_string(),
    )?;
    account.apply(&refund)?;

    Ok((account, refund))
}

/// Build a purchase entry.
///
/// # Errors
///
/// `StoreError::Domain` for a non-positive amount or one that would overflow
/// the balance.
pub(crate) fn post_credit(
    account: Option<Account>,
    request: &CreditRequest,
) -> Result<(Account, LedgerEntry)> {
    let mut account = account.unwrap_or_else(|| Account::new(request.account_id));

    let entry = LedgerEntry::purchase(
        request.account_id,
        request.amount,
        add_to_balance(account.balance, request.amount)?,
        request.description.clone(),
    )?
    .with_metadata(request.metadata.clone());
    account.apply(&entry)?;

    Ok((account, entry))
}

/// The balance after adding `amount`.
///
/// # Errors
///
/// `StoreError::Domain` if the sum leaves the `i64` range.
pub(crate) fn add_to_balance(balance: i64, amount: i64) -> Result<i64> {
    balance
        .checked_add(amount)
        .ok_or(StoreError::Domain(CreditError::Overflow { amount }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use credit_meter_core::{AccountId, InvocationId, ServiceCode};

    fn debit_request(account_id: AccountId, amount: i64) -> DebitRequest {
        DebitRequest {
            account_id,
            service_code: ServiceCode::new("ai_matching").unwrap(),
            amount,
            idempotency_key: InvocationId::generate(),
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn debit_on_missing_account_is_insufficient() {
        let id = AccountId::generate();
        let result = post_debit(None, &debit_request(id, 10));
        assert!(matches!(
            result,
            Err(StoreError::InsufficientCredits {
                balance: 0,
                required: 10
            })
        ));
    }

    #[test]
    fn exact_balance_can_be_spent() {
        let id = AccountId::generate();
        let mut account = Account::new(id);
        account.balance = 40;

        let (account, entry) = post_debit(Some(account), &debit_request(id, 40)).unwrap();
        assert_eq!(account.balance, 0);
        assert_eq!(entry.balance_after, 0);
        assert_eq!(entry.amount, -40);
    }

    #[test]
    fn refund_restores_balance() {
        let id = AccountId::generate();
        let mut account = Account::new(id);
        account.balance = 100;

        let (account, debit) = post_debit(Some(account), &debit_request(id, 40)).unwrap();
        let (account, refund) = post_refund(Some(account), &debit, "failed").unwrap();

        assert_eq!(account.balance, 100);
        assert_eq!(refund.balance_after, 100);
        assert_eq!(refund.related_entry_id, Some(debit.id));
    }

    #[test]
    fn credit_rejects_zero() {
        let request = CreditRequest {
            account_id: AccountId::generate(),
            amount: 0,
            description: "nothing".into(),
            metadata: serde_json::Value::Null,
        };
        assert!(matches!(
            post_credit(None, &request),
            Err(StoreError::Domain(CreditError::InvalidAmount(0)))
        ));
    }

    #[test]
    fn credit_past_i64_range_is_rejected() {
        let id = AccountId::generate();
        let mut account = Account::new(id);
        account.balance = i64::MAX;

        let request = CreditRequest {
            account_id: id,
            amount: 1,
            description: "grant".into(),
            metadata: serde_json::Value::Null,
        };
        assert!(matches!(
            post_credit(Some(account), &request),
            Err(StoreError::Domain(CreditError::Overflow { amount: 1 }))
        ));
    }

    #[test]
    fn refund_past_i64_range_is_rejected() {
        let id = AccountId::generate();
        let mut account = Account::new(id);
        account.balance = 100;

        let (mut account, debit) = post_debit(Some(account), &debit_request(id, 40)).unwrap();
        account.balance = i64::MAX - 10;

        assert!(matches!(
            post_refund(Some(account), &debit, "failed"),
            Err(StoreError::Domain(CreditError::Overflow { amount: 40 }))
        ));
    }
}
