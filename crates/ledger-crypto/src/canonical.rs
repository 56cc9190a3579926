//! Deterministic canonical encoding used as the preimage for hashes and
//! checksums (spec §6, "Hash & checksum encoding").
//!
//! Canonical encoding is: sorted keys, compact separators, no whitespace.
//! `serde_json::Value`'s object representation is a `BTreeMap` (this crate
//! does not enable serde_json's `preserve_order` feature), so round-tripping
//! any `Serialize` value through `serde_json::to_value` before encoding
//! guarantees key order is deterministic regardless of struct field order.

use serde::Serialize;
use serde_json::Value;

/// Encode `value` into its canonical byte representation.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    let as_value: Value = serde_json::to_value(value).expect("canonical value is always representable as JSON");
    serde_json::to_vec(&as_value).expect("canonical JSON serialization is infallible for a Value")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Unordered {
        z: i32,
        a: i32,
        m: i32,
    }

    #[test]
    fn field_order_does_not_affect_encoding() {
        #[derive(Serialize)]
        struct Reordered {
            a: i32,
            m: i32,
            z: i32,
        }

        let left = canonical_bytes(&Unordered { z: 1, a: 2, m: 3 });
        let right = canonical_bytes(&Reordered { a: 2, m: 3, z: 1 });
        assert_eq!(left, right);
    }

    #[test]
    fn encoding_has_no_whitespace() {
        let bytes = canonical_bytes(&Unordered { z: 1, a: 2, m: 3 });
        let s = String::from_utf8(bytes).unwrap();
        assert!(!s.contains(' '));
        assert!(!s.contains('\n'));
    }
}
