//! Keyed hash function used by the entry hash chain and the account checksum
//! (spec §4.4, §6).
//!
//! `H(prev_hash ‖ canonical(entry_core))` where `H` is HMAC-SHA-256 keyed by
//! `options.advanced.hmac_secret`. When no secret is configured the core
//! falls back to plain SHA-256 over the same preimage — this weakens
//! auditability (anyone can forge a chain without the key) but is documented
//! as an explicit trade-off rather than refusing to run (spec §6).

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Compute the keyed (or, absent a key, plain) hash over `prev ‖ payload`.
pub fn keyed_hash(secret: Option<&[u8]>, prev: Option<&str>, payload: &[u8]) -> String {
    let mut preimage = Vec::with_capacity(payload.len() + 64);
    if let Some(prev) = prev {
        preimage.extend_from_slice(prev.as_bytes());
    }
    preimage.extend_from_slice(payload);

    let digest = match secret {
        Some(key) => {
            let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
            mac.update(&preimage);
            mac.finalize().into_bytes().to_vec()
        }
        None => Sha256::digest(&preimage).to_vec(),
    };
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_produce_same_hash() {
        let a = keyed_hash(Some(b"secret"), Some("prevhash"), b"payload");
        let b = keyed_hash(Some(b"secret"), Some("prevhash"), b"payload");
        assert_eq!(a, b);
    }

    #[test]
    fn different_keys_produce_different_hashes() {
        let a = keyed_hash(Some(b"secret-a"), None, b"payload");
        let b = keyed_hash(Some(b"secret-b"), None, b"payload");
        assert_ne!(a, b);
    }

    #[test]
    fn missing_key_falls_back_to_plain_sha256() {
        let keyed = keyed_hash(None, None, b"payload");
        let direct = hex::encode(Sha256::digest(b"payload"));
        assert_eq!(keyed, direct);
    }

    #[test]
    fn prev_hash_is_mixed_into_the_preimage() {
        let no_prev = keyed_hash(Some(b"k"), None, b"payload");
        let with_prev = keyed_hash(Some(b"k"), Some("abc"), b"payload");
        assert_ne!(no_prev, with_prev);
    }
}
