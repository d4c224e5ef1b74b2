//! Account types.
//!
//! An account holds the cached projection of its ledger entries. It is only
//! ever mutated by applying a committed [`LedgerEntry`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CreditError, Result};
use crate::ledger::{EntryKind, LedgerEntry};
use crate::AccountId;

/// A credit account for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// The account ID (from the identity collaborator).
    pub account_id: AccountId,

    /// Current credit balance. Never negative.
    pub balance: i64,

    /// Lifetime credits purchased or granted.
    pub lifetime_purchased: i64,

    /// Lifetime credits debited for services.
    pub lifetime_used: i64,

    /// Lifetime credits returned by refunds.
    pub lifetime_refunded: i64,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with zero balance.
    #[must_use]
    pub fn new(account_id: AccountId) -> Self {
        let now = Utc::now();
        Self {
            account_id,
            balance: 0,
            lifetime_purchased: 0,
            lifetime_used: 0,
            lifetime_refunded: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the account has sufficient credits for a deduction.
    #[must_use]
    pub fn has_sufficient_credits(&self, amount: i64) -> bool {
        self.balance >= amount
    }

    /// Fold a committed entry into the projection.
    ///
    /// Callers must have checked that a debit is covered; the store does this
    /// under the account lock before calling. The account is left untouched
    /// when the entry is rejected.
    ///
    /// # Errors
    ///
    /// Returns `CreditError::Overflow` if the balance or a lifetime counter
    /// would leave the `i64` range.
    pub fn apply(&mut self, entry: &LedgerEntry) -> Result<()> {
        let overflow = || CreditError::Overflow {
            amount: entry.amount,
        };

        let balance = self.balance.checked_add(entry.amount).ok_or_else(overflow)?;
        let (counter, delta) = match entry.kind {
            EntryKind::Purchase => (&mut self.lifetime_purchased, entry.amount),
            EntryKind::Debit => {
                let used = entry.amount.checked_abs().ok_or_else(overflow)?;
                (&mut self.lifetime_used, used)
            }
            EntryKind::Refund => (&mut self.lifetime_refunded, entry.amount),
        };
        *counter = counter.checked_add(delta).ok_or_else(overflow)?;

        self.balance = balance;
        self.updated_at = entry.created_at;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServiceCode;

    #[test]
    fn new_account_has_zero_balance() {
        let account = Account::new(AccountId::generate());
        assert_eq!(account.balance, 0);
        assert_eq!(account.lifetime_purchased, 0);
        assert_eq!(account.lifetime_used, 0);
    }

    #[test]
    fn account_sufficient_credits() {
        let mut account = Account::new(AccountId::generate());
        account.balance = 40;

        assert!(account.has_sufficient_credits(40));
        assert!(!account.has_sufficient_credits(41));
    }

    #[test]
    fn apply_tracks_lifetime_counters() {
        let id = AccountId::generate();
        let mut account = Account::new(id);
        let code = ServiceCode::new("ai_matching").unwrap();

        let purchase = LedgerEntry::purchase(id, 100, 100, "pack".into()).unwrap();
        account.apply(&purchase).unwrap();

        let debit = LedgerEntry::debit(
            id,
            code,
            40,
            crate::InvocationId::generate(),
            60,
            serde_json::Value::Null,
        )
        .unwrap();
        account.apply(&debit).unwrap();

        let refund = LedgerEntry::refund(&debit, 100, "action failed".into()).unwrap();
        account.apply(&refund).unwrap();

        assert_eq!(account.balance, 100);
        assert_eq!(account.lifetime_purchased, 100);
        assert_eq!(account.lifetime_used, 40);
        assert_eq!(account.lifetime_refunded, 40);
    }

    #[test]
    fn apply_rejects_overflow_and_keeps_state() {
        let id = AccountId::generate();
        let mut account = Account::new(id);

        let first = LedgerEntry::purchase(id, i64::MAX, i64::MAX, "grant".into()).unwrap();
        account.apply(&first).unwrap();

        let second = LedgerEntry::purchase(id, 1, i64::MAX, "grant".into()).unwrap();
        assert!(matches!(
            account.apply(&second),
            Err(CreditError::Overflow { amount: 1 })
        ));
        assert_eq!(account.balance, i64::MAX);
        assert_eq!(account.lifetime_purchased, i64::MAX);
    }
}
