//! Key encoding for the `RocksDB` column families.

use credit_meter_core::{AccountId, ChangeId, EntryId, InvocationId, ServiceCode};

/// Create an account key.
#[must_use]
pub fn account_key(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Create an entry key.
#[must_use]
pub fn entry_key(entry_id: &EntryId) -> Vec<u8> {
    entry_id.to_bytes().to_vec()
}

/// Create an account-entry index key.
///
/// Format: `account_id (16 bytes) || entry_id (16 bytes)`
///
/// Since ULIDs are time-ordered, an account's entries sort by time.
#[must_use]
pub fn account_entry_key(account_id: &AccountId, entry_id: &EntryId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(&entry_id.to_bytes());
    key
}

/// Create a prefix for iterating all entries of an account.
#[must_use]
pub fn account_entries_prefix(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Extract the entry ID from an account-entry index key.
///
/// Returns `None` if the key is shorter than 32 bytes.
#[must_use]
pub fn entry_id_from_account_key(key: &[u8]) -> Option<EntryId> {
    decode_entry_id(key.get(16..32)?)
}

/// Decode a 16-byte entry ID value.
#[must_use]
pub fn decode_entry_id(bytes: &[u8]) -> Option<EntryId> {
    let bytes: [u8; 16] = bytes.try_into().ok()?;
    Some(EntryId::from_bytes(bytes))
}

/// Create a debit-index key.
///
/// Format: `account_id (16 bytes) || invocation_id (16 bytes)`
#[must_use]
pub fn debit_key(account_id: &AccountId, invocation_id: &InvocationId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(invocation_id.as_bytes());
    key
}

/// Create a usage record key.
#[must_use]
pub fn usage_key(invocation_id: &InvocationId) -> Vec<u8> {
    invocation_id.as_bytes().to_vec()
}

/// Create a service cost key.
#[must_use]
pub fn service_key(service_code: &ServiceCode) -> Vec<u8> {
    service_code.as_str().as_bytes().to_vec()
}

/// Create a cost change key.
#[must_use]
pub fn change_key(change_id: &ChangeId) -> Vec<u8> {
    change_id.to_bytes().to_vec()
}

/// Create a prefix for iterating the changes of one service.
///
/// Format: `service_code || 0x00`. Service codes never contain a zero byte,
/// so one code's prefix cannot match a longer code.
#[must_use]
pub fn service_changes_prefix(service_code: &ServiceCode) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(service_code.as_str().len() + 1);
    prefix.extend_from_slice(service_code.as_str().as_bytes());
    prefix.push(0);
    prefix
}

/// Create a service-change index key.
///
/// Format: `service_code || 0x00 || change_id (16 bytes)`
#[must_use]
pub fn service_change_key(service_code: &ServiceCode, change_id: &ChangeId) -> Vec<u8> {
    let mut key = service_changes_prefix(service_code);
    key.extend_from_slice(&change_id.to_bytes());
    key
}

/// Extract the change ID from the last 16 bytes of a service-change key.
#[must_use]
pub fn change_id_from_service_key(key: &[u8]) -> Option<ChangeId> {
    let start = key.len().checked_sub(16)?;
    let bytes: [u8; 16] = key.get(start..)?.try_into().ok()?;
    Some(ChangeId::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_entry_key_format() {
        let account_id = AccountId::generate();
        let entry_id = EntryId::generate();
        let key = account_entry_key(&account_id, &entry_id);

        assert_eq!(key.len(), 32);
        assert_eq!(&key[..16], account_id.as_bytes());
        assert_eq!(&key[16..], entry_id.to_bytes());
        assert_eq!(entry_id_from_account_key(&key), Some(entry_id));
    }

    #[test]
    fn short_keys_are_rejected() {
        assert_eq!(entry_id_from_account_key(&[0u8; 20]), None);
        assert_eq!(decode_entry_id(&[0u8; 3]), None);
    }

    #[test]
    fn debit_keys_differ_per_account() {
        let invocation = InvocationId::generate();
        let a = debit_key(&AccountId::generate(), &invocation);
        let b = debit_key(&AccountId::generate(), &invocation);
        assert_ne!(a, b);
    }

    #[test]
    fn service_change_prefixes_do_not_overlap() {
        let short = ServiceCode::new("ai").unwrap();
        let long = ServiceCode::new("ai_coach").unwrap();
        let change = ChangeId::generate();

        let key = service_change_key(&long, &change);
        assert!(!key.starts_with(&service_changes_prefix(&short)));
        assert!(key.starts_with(&service_changes_prefix(&long)));
        assert_eq!(change_id_from_service_key(&key), Some(change));
        assert_eq!(change_id_from_service_key(&[1, 2, 3]), None);
    }
}
