//! Column families of the `RocksDB` backend.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Account projections, keyed by `account_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Ledger entries, keyed by `entry_id` (ULID).
    pub const ENTRIES: &str = "entries";

    /// Index: entries by account, keyed by `account_id || entry_id`.
    /// Value is empty (index only).
    pub const ENTRIES_BY_ACCOUNT: &str = "entries_by_account";

    /// Index: debit per invocation, keyed by `account_id || invocation_id`.
    /// Value is the debit's `entry_id`.
    pub const DEBIT_KEYS: &str = "debit_keys";

    /// Index: refund per debit, keyed by the debit's `entry_id`.
    /// Value is the refund's `entry_id`.
    pub const REFUNDS: &str = "refunds";

    /// Usage records, keyed by `invocation_id`.
    pub const USAGE: &str = "usage";

    /// Service costs, keyed by service code.
    pub const SERVICE_COSTS: &str = "service_costs";

    /// Service cost changes, keyed by `change_id` (ULID).
    pub const COST_HISTORY: &str = "cost_history";

    /// Index: changes by service, keyed by `service_code || 0x00 || change_id`.
    /// Value is empty (index only).
    pub const COST_HISTORY_BY_SERVICE: &str = "cost_history_by_service";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::ENTRIES,
        cf::ENTRIES_BY_ACCOUNT,
        cf::DEBIT_KEYS,
        cf::REFUNDS,
        cf::USAGE,
        cf::SERVICE_COSTS,
        cf::COST_HISTORY,
        cf::COST_HISTORY_BY_SERVICE,
    ]
}
