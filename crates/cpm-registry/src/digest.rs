use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};

lazy_static! {
    /// A registry content digest anywhere in free-form helper output.
    static ref DIGEST_TOKEN: Regex = Regex::new(r"sha256:[a-f0-9]{64}").unwrap();
    /// A string that is exactly one registry content digest.
    static ref DIGEST_EXACT: Regex = Regex::new(r"^sha256:[a-f0-9]{64}$").unwrap();
}

pub(crate) fn sha256_hex_bytes(bytes: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(bytes))
}

/// First `sha256:<64 hex>` token in `text`, if any.
pub(crate) fn extract_digest(text: &str) -> Option<String> {
    DIGEST_TOKEN.find(text).map(|m| m.as_str().to_string())
}

/// Whether `value` is exactly a `sha256:<64 lowercase hex>` digest.
pub fn is_sha256_digest(value: &str) -> bool {
    DIGEST_EXACT.is_match(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_empty_input() {
        assert_eq!(
            sha256_hex_bytes(b""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn extract_digest_from_noisy_output() {
        let digest = format!("sha256:{}", "a".repeat(64));
        let output = format!("Pushed [registry] reg.local/team/demo:1.0.0\nDigest: {}\n", digest);
        assert_eq!(extract_digest(&output), Some(digest));
        assert_eq!(extract_digest("pushed"), None);
        assert_eq!(extract_digest(&format!("sha256:{}", "a".repeat(63))), None);
    }

    #[test]
    fn exact_digest_shape() {
        assert!(is_sha256_digest(&format!("sha256:{}", "0f".repeat(32))));
        assert!(!is_sha256_digest(&format!("sha256:{}", "A".repeat(64))));
        assert!(!is_sha256_digest(&format!("sha256:{} ", "a".repeat(64))));
        assert!(!is_sha256_digest("sha512:abc"));
    }
}
