//! Per-account entry hash chain (spec §4.4, §8 invariant 3).

use serde::Serialize;
use uuid::Uuid;

use ledger_core::{Amount, Currency, EntryType, Version};

use crate::canonical::canonical_bytes;
use crate::hash::keyed_hash;

/// The fields hashed for a single entry (spec §4.4 "entry_core").
///
/// For hot (system-account) entries, `balance_before`/`balance_after` are
/// omitted and `is_hot` is set, per spec: "entry_core omits
/// balance_before/after and sets an isHot marker".
#[derive(Serialize)]
pub struct EntryCore<'a> {
    pub transfer_id: Uuid,
    pub account_id: Uuid,
    pub entry_type: EntryType,
    pub amount: Amount,
    pub currency: &'a Currency,
    pub balance_before: Option<Amount>,
    pub balance_after: Option<Amount>,
    pub account_version: Version,
    pub is_hot: bool,
}

/// Compute the hash for the next entry in an account's chain.
///
/// `hash = H(prev_hash ‖ canonical(entry_core))`. The first entry on an
/// account passes `prev_hash = None` (spec E2: "first entry's prev_hash = ∅").
pub fn next_entry_hash(secret: Option<&[u8]>, prev_hash: Option<&str>, core: &EntryCore<'_>) -> String {
    let payload = canonical_bytes(core);
    keyed_hash(secret, prev_hash, &payload)
}

/// Verify that a chain of (prev_hash, core, hash) triples is internally
/// consistent: recomputing each hash from `prev_hash ‖ canonical(core)`
/// reproduces the stored value, and each link's `prev_hash` matches the
/// previous link's `hash` (spec §8 invariant 3).
pub fn verify_chain(secret: Option<&[u8]>, chain: &[(Option<String>, EntryCore<'_>, String)]) -> Result<(), String> {
    let mut expected_prev: Option<String> = None;
    for (i, (prev_hash, core, hash)) in chain.iter().enumerate() {
        if *prev_hash != expected_prev {
            return Err(format!(
                "entry {i}: prev_hash does not match previous entry's hash"
            ));
        }
        let recomputed = next_entry_hash(secret, prev_hash.as_deref(), core);
        if &recomputed != hash {
            return Err(format!("entry {i}: stored hash does not match recomputed hash"));
        }
        expected_prev = Some(hash.clone());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core(account_version: Version, is_hot: bool) -> EntryCore<'static> {
        static USD: std::sync::OnceLock<Currency> = std::sync::OnceLock::new();
        let currency = USD.get_or_init(|| Currency::new("USD").unwrap());
        EntryCore {
            transfer_id: Uuid::nil(),
            account_id: Uuid::nil(),
            entry_type: EntryType::Credit,
            amount: 100,
            currency,
            balance_before: if is_hot { None } else { Some(0) },
            balance_after: if is_hot { None } else { Some(100) },
            account_version,
            is_hot,
        }
    }

    #[test]
    fn first_entry_has_no_prev_hash_and_chain_verifies() {
        let h0 = next_entry_hash(Some(b"key"), None, &core(1, false));
        let h1 = next_entry_hash(Some(b"key"), Some(&h0), &core(2, false));

        let chain = vec![
            (None, core(1, false), h0.clone()),
            (Some(h0), core(2, false), h1),
        ];
        assert!(verify_chain(Some(b"key"), &chain).is_ok());
    }

    #[test]
    fn tampered_link_fails_verification() {
        let h0 = next_entry_hash(Some(b"key"), None, &core(1, false));
        let chain = vec![(None, core(1, false), format!("{h0}ff"))];
        assert!(verify_chain(Some(b"key"), &chain).is_err());
    }

    #[test]
    fn broken_prev_hash_link_fails_verification() {
        let h0 = next_entry_hash(Some(b"key"), None, &core(1, false));
        let h1 = next_entry_hash(Some(b"key"), Some(&h0), &core(2, false));
        // second entry claims no prev_hash even though it has one
        let chain = vec![
            (None, core(1, false), h0),
            (None, core(2, false), h1),
        ];
        assert!(verify_chain(Some(b"key"), &chain).is_err());
    }

    #[test]
    fn hot_entries_hash_without_balance_fields() {
        let hot = next_entry_hash(Some(b"key"), None, &core(1, true));
        let cold = next_entry_hash(Some(b"key"), None, &core(1, false));
        assert_ne!(hot, cold);
    }
}
