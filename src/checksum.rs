//! Content checksums
//!
//! SHA-256 over a fully buffered upload, base64 encoded so it fits a text
//! column and stays readable in listings.

use base64::Engine;
use sha2::{Digest, Sha256};

/// Compute the stored checksum for a file's bytes.
///
/// The input is already in memory, so digesting has no failure mode.
/// A streaming variant would have to surface read errors instead.
pub fn checksum(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Check bytes against a stored checksum
pub fn matches(data: &[u8], expected: &str) -> bool {
    checksum(data) == expected
}

/// Lowercase hex SHA-256, used where a filesystem-safe digest is needed
pub fn hex_digest(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_digest() {
        // sha256("hello") = 2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824
        assert_eq!(
            checksum(b"hello"),
            "LPJNul+wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ="
        );
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(
            checksum(b""),
            "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn test_matches() {
        let sum = checksum(b"v1");
        assert!(matches(b"v1", &sum));
        assert!(!matches(b"v2", &sum));
    }

    #[test]
    fn test_hex_digest() {
        assert_eq!(
            hex_digest(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    proptest! {
        #[test]
        fn checksum_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
            prop_assert_eq!(checksum(&data), checksum(&data));
        }
    }
}
