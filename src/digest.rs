/***************************************************************************************************
Deterministic block hashing.
***************************************************************************************************/

use sha2::{Digest, Sha256};

/// Hashes `data ‖ previous_hash ‖ str(height)` with no separators, matching the canonical
/// concatenation the whole replica group must agree on bit-for-bit.
pub fn hash_block(data: &str, previous_hash: &str, height: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hasher.update(previous_hash.as_bytes());
    hasher.update(height.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Deterministic but wrong digest used by the `wrong_hash` fault-injection mode. Derived from
/// the real digest so it is stable across repeated emission of the same message, but will never
/// collide with it.
pub fn corrupt_digest(real_digest: &str) -> String {
    hash_block(real_digest, "corrupted", 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_hash_identically() {
        assert_eq!(hash_block("hello", "abc", 1), hash_block("hello", "abc", 1));
    }

    #[test]
    fn different_height_changes_digest() {
        assert_ne!(hash_block("hello", "abc", 1), hash_block("hello", "abc", 2));
    }

    #[test]
    fn no_separator_means_boundary_shifts_collide_in_principle_but_not_here() {
        // "ab" + "c" + "1"  vs  "a" + "bc" + "1" would hash identically if we hashed a plain
        // concatenated String; we don't guard against this (matches the source behavior), but
        // the two fields we actually exercise in tests are distinguishable.
        assert_ne!(hash_block("ab", "c", 1), hash_block("a", "bc1", 0));
    }

    #[test]
    fn digest_is_lowercase_hex() {
        let d = hash_block("x", "y", 3);
        assert!(d.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(d.len(), 64);
    }

    #[test]
    fn corrupt_digest_never_matches_real_one() {
        let real = hash_block("z", "", 1);
        assert_ne!(real, corrupt_digest(&real));
    }
}
