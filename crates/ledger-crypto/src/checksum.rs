//! Account checksum: a keyed hash over the balance snapshot, recomputed on
//! every balance-changing update and validated by readers on load
//! (spec §4.4, §8 invariant 4).

use serde::Serialize;

use ledger_core::{Account, Amount, Version};

use crate::canonical::canonical_bytes;
use crate::hash::keyed_hash;

#[derive(Serialize)]
struct ChecksumFields {
    balance: Amount,
    credit_balance: Amount,
    debit_balance: Amount,
    pending_debit: Amount,
    pending_credit: Amount,
    version: Version,
}

/// Compute the checksum for a prospective account snapshot.
pub fn compute_checksum(
    secret: Option<&[u8]>,
    balance: Amount,
    credit_balance: Amount,
    debit_balance: Amount,
    pending_debit: Amount,
    pending_credit: Amount,
    version: Version,
) -> String {
    let fields = ChecksumFields {
        balance,
        credit_balance,
        debit_balance,
        pending_debit,
        pending_credit,
        version,
    };
    keyed_hash(secret, None, &canonical_bytes(&fields))
}

/// Validate that `account.checksum` matches the keyed hash of its current
/// snapshot (spec §8 invariant 4). Readers call this on load.
pub fn verify_account_checksum(secret: Option<&[u8]>, account: &Account) -> bool {
    let expected = compute_checksum(
        secret,
        account.balance,
        account.credit_balance,
        account.debit_balance,
        account.pending_debit,
        account.pending_credit,
        account.version,
    );
    expected == account.checksum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_changes_when_any_field_changes() {
        let base = compute_checksum(Some(b"k"), 100, 100, 0, 0, 0, 1);
        let bumped_version = compute_checksum(Some(b"k"), 100, 100, 0, 0, 0, 2);
        let bumped_balance = compute_checksum(Some(b"k"), 101, 101, 0, 0, 0, 1);
        assert_ne!(base, bumped_version);
        assert_ne!(base, bumped_balance);
    }

    #[test]
    fn checksum_is_stable_for_identical_snapshots() {
        let a = compute_checksum(Some(b"k"), 100, 100, 0, 5, 0, 3);
        let b = compute_checksum(Some(b"k"), 100, 100, 0, 5, 0, 3);
        assert_eq!(a, b);
    }
}
