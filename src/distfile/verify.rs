//! BLAKE2b distfile verification.
//!
//! The digest size is implied by the expected checksum: every hex pair is
//! one byte of output, so a 64-character checksum selects BLAKE2b-256.

use anyhow::{bail, Result};
use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;

use crate::error::BuildError;

/// Largest BLAKE2b output in bytes.
pub const MAX_DIGEST_BYTES: usize = 64;

/// Check that `checksum` is usable as a BLAKE2b digest.
///
/// Returns the digest size in bytes.
pub fn digest_size(checksum: &str) -> Result<usize, String> {
    if checksum.is_empty() {
        return Err("checksum is empty".to_string());
    }
    if checksum.len() % 2 != 0 {
        return Err(format!("checksum has odd length {}", checksum.len()));
    }
    if !checksum.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("checksum is not hexadecimal".to_string());
    }
    let size = checksum.len() / 2;
    if size > MAX_DIGEST_BYTES {
        return Err(format!(
            "checksum is {size} bytes, blake2b supports at most {MAX_DIGEST_BYTES}"
        ));
    }
    Ok(size)
}

/// Hex-encoded BLAKE2b digest of `data` with `size` bytes of output.
pub fn blake2b_hex(data: &[u8], size: usize) -> Result<String> {
    let mut hasher = Blake2bVar::new(size)
        .map_err(|_| anyhow::anyhow!("unsupported blake2b digest size {size}"))?;
    hasher.update(data);
    let mut digest = vec![0u8; size];
    hasher
        .finalize_variable(&mut digest)
        .map_err(|_| anyhow::anyhow!("blake2b output buffer has wrong size"))?;
    Ok(hex::encode(digest))
}

/// Verify `data` against the expected checksum of the distfile `name`.
///
/// Comparison is case-insensitive. A mismatch is raised as
/// [`BuildError::ChecksumMismatch`] carrying both digests.
pub fn verify(name: &str, expected: &str, data: &[u8]) -> Result<()> {
    let size = match digest_size(expected) {
        Ok(size) => size,
        Err(reason) => bail!(BuildError::InvalidDistfile {
            uri: name.to_string(),
            reason,
        }),
    };
    let actual = blake2b_hex(data, size)?;
    let expected = expected.to_ascii_lowercase();
    if actual != expected {
        bail!(BuildError::ChecksumMismatch {
            name: name.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::build_error;

    #[test]
    fn test_known_blake2b_256_digest() {
        // b2sum -l 256 of the empty input
        let empty = "0e5751c026e543b2e8ab2eb06099daa1d1e5df47778f7787faab45cdf12fe3a8";
        assert_eq!(blake2b_hex(b"", 32).unwrap(), empty);
        verify("empty", empty, b"").unwrap();
    }

    #[test]
    fn test_verify_accepts_every_digest_size() {
        let data = b"adamantite distfile contents";
        for size in [1, 16, 20, 32, 48, 64] {
            let digest = blake2b_hex(data, size).unwrap();
            assert_eq!(digest.len(), size * 2);
            verify("file", &digest, data).unwrap();
        }
    }

    #[test]
    fn test_verify_is_case_insensitive() {
        let data = b"hello";
        let digest = blake2b_hex(data, 32).unwrap().to_ascii_uppercase();
        verify("hello", &digest, data).unwrap();
    }

    #[test]
    fn test_verify_rejects_modified_data() {
        let digest = blake2b_hex(b"original", 32).unwrap();
        let err = verify("file.tar.gz", &digest, b"originaL").unwrap_err();

        match build_error(&err) {
            Some(BuildError::ChecksumMismatch {
                name,
                expected,
                actual,
            }) => {
                assert_eq!(name, "file.tar.gz");
                assert_eq!(expected, &digest);
                assert_eq!(actual, &blake2b_hex(b"originaL", 32).unwrap());
            }
            other => panic!("expected checksum mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_verify_rejects_truncated_data() {
        let data = b"0123456789abcdef";
        let digest = blake2b_hex(data, 64).unwrap();
        let err = verify("file", &digest, &data[..8]).unwrap_err();
        assert!(matches!(
            build_error(&err),
            Some(BuildError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_digest_size_validation() {
        assert_eq!(digest_size("ab12").unwrap(), 2);
        assert!(digest_size("").is_err());
        assert!(digest_size("abc").is_err());
        assert!(digest_size("zz").is_err());
        assert!(digest_size(&"a".repeat(130)).is_err());
    }
}
