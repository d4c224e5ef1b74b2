//! Core types for credit-meter.
//!
//! This crate provides the domain types shared by the store, the gateway and
//! the HTTP service:
//!
//! - **Identifiers**: `AccountId`, `InvocationId`, `EntryId`, `ServiceCode`
//! - **Accounts**: `Account`, the projection of an account's ledger
//! - **Ledger**: `LedgerEntry`, `EntryKind`, receipts
//! - **Catalog**: `ServiceCost`, `Promotion`, `Price`, the `ServiceCostChange` history
//! - **Usage**: `UsageRecord`, the `InvocationState` machine, per-service statistics
//! - **Matching**: the candidate/job compatibility scorer
//!
//! # Credits
//!
//! **1 credit is the smallest chargeable unit.**
//!
//! - Buying a pack of 100 credits appends a +100 `purchase` entry
//! - Running a matching analysis priced at 50 appends a -50 `debit` entry
//! - Stored as `i64` and never fractional; promotions round the discount down

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod catalog;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod matching;
pub mod usage;

pub use account::Account;
pub use catalog::{
    default_catalog, services, CostChangeKind, CostTerms, Price, Promotion, ServiceCost,
    ServiceCostChange,
};
pub use error::{CreditError, Result};
pub use ids::{
    AccountId, ChangeId, EntryId, IdError, InvocationId, ServiceCode, MAX_SERVICE_CODE_LEN,
};
pub use ledger::{projected_balance, DebitReceipt, EntryKind, LedgerEntry, RefundReceipt};
pub use matching::{score, summarize, CandidateProfile, JobTarget, MatchAnalysis, MatchSummary};
pub use usage::{service_statistics, InvocationState, ServiceStatistics, UsageRecord};
