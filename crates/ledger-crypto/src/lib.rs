//! `ledger-crypto` — hash chain, checksum, and canonical encoding primitives.

pub mod canonical;
pub mod chain;
pub mod checksum;
pub mod hash;

pub use canonical::canonical_bytes;
pub use chain::{next_entry_hash, verify_chain, EntryCore};
pub use checksum::{compute_checksum, verify_account_checksum};
pub use hash::keyed_hash;
