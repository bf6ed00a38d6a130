//! Unique identifiers for Strand entities.
//!
//! Strongly-typed UUID identifiers built on
//! [`domain-key`](https://crates.io/crates/domain-key) `Uuid<D>` wrappers.
//! Each identifier type is parameterized by a unique domain marker, so
//! different ID kinds can never be mixed at compile time.
//!
//! All ID types are `Copy` (16 bytes, stack-allocated) and support:
//! - `v4()` for random UUID generation
//! - `nil()` for zero-valued default
//! - `parse(&str)` for string parsing
//! - Full serde support (serializes as UUID string)
//! - `Display`, `FromStr`, `Eq`, `Ord`, `Hash`

use domain_key::define_uuid;

// Re-export for downstream parse error handling
pub use domain_key::UuidParseError;

// Entity identifiers — UUID-based, Copy, 16 bytes each
define_uuid!(pub InstanceIdDomain => InstanceId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_id_v4_creates_non_nil_uuid() {
        let id = InstanceId::v4();
        assert!(!id.is_nil());
    }

    #[test]
    fn instance_id_nil_creates_zero_valued_uuid() {
        let id = InstanceId::nil();
        assert!(id.is_nil());
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn instance_id_parse_valid_uuid_string_succeeds() {
        let id = InstanceId::parse("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert!(!id.is_nil());
        assert_eq!(id.to_string(), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn instance_id_parse_invalid_string_returns_error() {
        let result = InstanceId::parse("not-a-uuid");
        assert!(result.is_err());
    }

    #[test]
    fn instance_id_copy_semantics_both_copies_usable() {
        let id1 = InstanceId::v4();
        let id2 = id1; // Copy, not move
        assert_eq!(id1, id2);
    }

    #[test]
    fn instance_id_serde_json_roundtrip() {
        let id = InstanceId::v4();
        let json = serde_json::to_string(&id).unwrap();
        let deserialized: InstanceId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }

    #[test]
    fn instance_id_hash_is_consistent() {
        use std::collections::HashSet;
        let id = InstanceId::v4();
        let mut set = HashSet::new();
        set.insert(id);
        assert!(set.contains(&id));
    }
}
