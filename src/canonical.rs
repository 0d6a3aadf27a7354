//! Canonical serialization for deterministic hashing.
//!
//! Used to fingerprint analytics configuration and computed outputs, so two
//! replays of the same revisions can be compared by a single hex string.
//!
//! ## Determinism Guarantees
//!
//! - Stable field order: Struct fields serialize in declaration order
//! - Stable Vec order: Vectors serialize in index order
//! - No HashMap allowed: Use BTreeMap for maps in hashed data

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

/// Serialize a value to canonical JSON bytes for hashing.
///
/// Only call this with plain data types (structs, vectors, string-keyed
/// maps); those always serialize.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("canonical serialization of plain data")
}

/// Compute canonical hash of a serializable value.
pub fn canonical_hash<T: Serialize>(value: &T) -> u64 {
    xxh64(&to_canonical_bytes(value), 0)
}

/// Compute canonical hash and return as hex string.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> String {
    format!("{:016x}", canonical_hash(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    struct Edge {
        source: String,
        target: String,
        weight: f64,
    }

    #[test]
    fn test_determinism() {
        let e = Edge {
            source: "a.1".to_string(),
            target: "a.2".to_string(),
            weight: 0.6,
        };
        assert_eq!(canonical_hash(&e), canonical_hash(&e));
        assert_eq!(canonical_hash_hex(&e).len(), 16);
    }

    #[test]
    fn test_btreemap_order_is_insertion_independent() {
        let mut m1 = BTreeMap::new();
        m1.insert("b", 1);
        m1.insert("a", 2);
        let mut m2 = BTreeMap::new();
        m2.insert("a", 2);
        m2.insert("b", 1);
        assert_eq!(canonical_hash(&m1), canonical_hash(&m2));
    }
}
