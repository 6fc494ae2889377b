//! Bundle checksums

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a bundle
pub fn checksum(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    format!("{:x}", digest)
}

/// Check bytes against an expected checksum.
///
/// Returns the actual checksum on mismatch.
pub fn verify(data: &[u8], expected: &str) -> std::result::Result<(), String> {
    let actual = checksum(data);
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(actual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_single_byte_flip_fails() {
        let bundle = b"export function h() {}".to_vec();
        let sum = checksum(&bundle);
        assert!(verify(&bundle, &sum).is_ok());
        assert!(verify(&bundle, &sum.to_uppercase()).is_ok());

        let mut corrupted = bundle.clone();
        corrupted[3] ^= 0x01;
        let actual = verify(&corrupted, &sum).unwrap_err();
        assert_ne!(actual, sum);
    }
}
