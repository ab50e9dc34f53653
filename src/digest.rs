//! Content digest utilities
//!
//! Digests are the only identity a blob has, and they end up in URLs and file
//! names, so everything that takes one from a manifest validates it first.

use crate::error::{RegistryError, Result};
use sha2::Digest;
use std::path::Path;
use tokio::io::AsyncReadExt;

pub const SHA256_PREFIX: &str = "sha256:";

/// Utilities for working with `algorithm:hex` content digests
pub struct DigestUtils;

impl DigestUtils {
    /// Compute SHA256 hex from byte data
    pub fn compute_sha256(data: &[u8]) -> String {
        let mut hasher = sha2::Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Compute full digest (with sha256: prefix) from byte data
    pub fn compute_docker_digest(data: &[u8]) -> String {
        format!("{}{}", SHA256_PREFIX, Self::compute_sha256(data))
    }

    /// Stream a file through SHA256 and return the full digest
    pub async fn compute_file_digest(path: &Path) -> Result<String> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| RegistryError::storage("open file for hashing", path, e))?;
        let mut hasher = sha2::Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| RegistryError::storage("read file for hashing", path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(format!("{}{}", SHA256_PREFIX, hex::encode(hasher.finalize())))
    }

    /// Validate SHA256 hex string (64 characters, all hex)
    pub fn is_valid_sha256_hex(digest: &str) -> bool {
        digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit())
    }

    /// Check the `algorithm:encoded` grammar of the distribution API.
    ///
    /// algorithm: lowercase alphanumerics separated by one of `+._-`;
    /// encoded: `[a-zA-Z0-9=_-]+`. sha256 additionally requires 64 hex chars.
    pub fn validate(digest: &str) -> Result<()> {
        let (algorithm, encoded) = digest
            .split_once(':')
            .ok_or_else(|| RegistryError::Validation(format!("Digest missing algorithm prefix: {:?}", digest)))?;

        let algorithm_ok = !algorithm.is_empty()
            && algorithm
                .split(['+', '.', '_', '-'])
                .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        if !algorithm_ok {
            return Err(RegistryError::Validation(format!("Invalid digest algorithm in {:?}", digest)));
        }

        let encoded_ok = !encoded.is_empty()
            && encoded
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '=' || c == '_' || c == '-');
        if !encoded_ok {
            return Err(RegistryError::Validation(format!("Invalid digest encoding in {:?}", digest)));
        }

        if algorithm == "sha256" && !Self::is_valid_sha256_hex(encoded) {
            return Err(RegistryError::Validation(format!(
                "Invalid SHA256 digest: expected 64 hex characters in {:?}",
                digest
            )));
        }

        Ok(())
    }

    /// Verify that a file on disk hashes to `expected`.
    ///
    /// Only sha256 digests are checked; other algorithms pass through.
    pub async fn verify_file(path: &Path, expected: &str) -> Result<()> {
        if !expected.starts_with(SHA256_PREFIX) {
            return Ok(());
        }
        let actual = Self::compute_file_digest(path).await?;
        if actual != expected {
            return Err(RegistryError::Validation(format!(
                "Data integrity check failed: expected {}, computed {}",
                expected, actual
            )));
        }
        Ok(())
    }

    /// Short form for display: the first 12 characters of the encoded part
    pub fn short(digest: &str) -> &str {
        let encoded = digest.split_once(':').map(|(_, e)| e).unwrap_or(digest);
        match encoded.char_indices().nth(12) {
            Some((idx, _)) => &encoded[..idx],
            None => encoded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_compute_docker_digest() {
        assert_eq!(DigestUtils::compute_docker_digest(b"hello world"), HELLO);
    }

    #[test]
    fn test_validate_digest() {
        assert!(DigestUtils::validate(HELLO).is_ok());
        assert!(DigestUtils::validate("sha512+b64u:LCa0a2j_xo_5m0U8HTBBNBNCLXBkg7-g-YpeiGJm564").is_ok());
        assert!(DigestUtils::validate("sha256:invalid").is_err());
        assert!(DigestUtils::validate("b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9").is_err());
        assert!(DigestUtils::validate("sha256:../../etc/passwd").is_err());
        assert!(DigestUtils::validate("SHA256:abc").is_err());
        assert!(DigestUtils::validate(":abc").is_err());
    }

    #[test]
    fn test_short() {
        assert_eq!(DigestUtils::short(HELLO), "b94d27b9934d");
        assert_eq!(DigestUtils::short("sha256:abc"), "abc");
    }

    #[tokio::test]
    async fn test_verify_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"hello world").unwrap();

        assert!(DigestUtils::verify_file(&path, HELLO).await.is_ok());
        let wrong = "sha256:0000000000000000000000000000000000000000000000000000000000000000";
        assert!(DigestUtils::verify_file(&path, wrong).await.is_err());
    }
}
