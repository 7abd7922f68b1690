//! Key encoding utilities for `RocksDB`.
//!
//! This module provides functions for encoding and decoding keys used in
//! column families.

use entitle_core::{AccountId, PlanId, UsageEventId};

/// Create an account key from an account ID.
#[must_use]
pub fn account_key(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Create a plan key from a plan ID.
#[must_use]
pub fn plan_key(plan_id: &PlanId) -> Vec<u8> {
    plan_id.as_bytes().to_vec()
}

/// Create a usage event key from a usage event ID.
#[must_use]
pub fn usage_event_key(event_id: &UsageEventId) -> Vec<u8> {
    event_id.to_bytes().to_vec()
}

/// Create an account-usage index key.
///
/// Format: `account_id (16 bytes) || usage_event_id (16 bytes)`
///
/// Since ULIDs are time-ordered, usage events for an account sort by time.
#[must_use]
pub fn account_usage_key(account_id: &AccountId, event_id: &UsageEventId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(&event_id.to_bytes());
    key
}

/// Create a prefix for iterating all usage events for an account.
#[must_use]
pub fn account_usage_prefix(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Extract the usage event ID from an account-usage index key.
///
/// # Panics
///
/// Panics if the key is not at least 32 bytes.
#[must_use]
pub fn extract_usage_event_id(key: &[u8]) -> UsageEventId {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&key[16..32]);
    UsageEventId::from_bytes(bytes).expect("valid ULID bytes")
}

/// Create a provider event key from a provider event ID.
#[must_use]
pub fn provider_event_key(event_id: &str) -> Vec<u8> {
    event_id.as_bytes().to_vec()
}

/// Create an idempotency-guard key from a provider transaction ID.
#[must_use]
pub fn provider_txn_key(transaction_id: &str) -> Vec<u8> {
    transaction_id.as_bytes().to_vec()
}

/// Create an index key from a provider subscription or customer ID.
#[must_use]
pub fn provider_ref_key(provider_id: &str) -> Vec<u8> {
    provider_id.as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_key_length() {
        let account_id = AccountId::generate();
        let key = account_key(&account_id);
        assert_eq!(key.len(), 16);
    }

    #[test]
    fn account_usage_key_format() {
        let account_id = AccountId::generate();
        let event_id = UsageEventId::generate();
        let key = account_usage_key(&account_id, &event_id);

        assert_eq!(key.len(), 32);
        assert_eq!(&key[..16], account_id.as_bytes());
        assert_eq!(&key[16..], event_id.to_bytes());
    }

    #[test]
    fn extract_usage_event_id_roundtrip() {
        let account_id = AccountId::generate();
        let event_id = UsageEventId::generate();
        let key = account_usage_key(&account_id, &event_id);

        let extracted = extract_usage_event_id(&key);
        assert_eq!(extracted, event_id);
    }
}
