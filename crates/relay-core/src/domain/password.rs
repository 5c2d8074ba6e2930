//! One-way password digests.
//!
//! The broker never stores or compares clear-text passwords.  Every password
//! (space password, server password, connect password) goes through
//! [`PasswordDigest::of`] first, and only digests are kept and compared.
//!
//! # Why SHA-256?
//!
//! The digest must be deterministic (the same password always produces the
//! same digest, so a stored digest can be checked later) and one-way (the
//! digest does not reveal the password).  SHA-256 gives both with a fixed
//! 32-byte output.  Brute-force guessing over the network is throttled
//! separately by the broker's login delay.

use std::fmt;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// A SHA-256 digest of a clear-text password.
///
/// `Debug` prints only a short prefix so digests do not end up in logs in
/// full.  [`PasswordDigest::to_hex`] renders the complete value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PasswordDigest([u8; 32]);

impl PasswordDigest {
    /// Digests a clear-text password.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use relay_core::PasswordDigest;
    ///
    /// let a = PasswordDigest::of("hunter2");
    /// let b = PasswordDigest::of("hunter2");
    /// assert!(a.matches(&b));
    /// ```
    pub fn of(clear: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(clear.as_bytes());
        Self(hasher.finalize().into())
    }

    /// Compares two digests in constant time.
    pub fn matches(&self, other: &PasswordDigest) -> bool {
        self.0.ct_eq(&other.0).into()
    }

    /// Digests `offered` and compares it against `self`.
    pub fn verify(&self, offered: &str) -> bool {
        self.matches(&PasswordDigest::of(offered))
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering of the full digest.
    pub fn to_hex(&self) -> String {
        use fmt::Write;

        let mut out = String::with_capacity(64);
        for byte in self.0 {
            // Writing into a String cannot fail.
            let _ = write!(out, "{byte:02x}");
        }
        out
    }
}

impl fmt::Debug for PasswordDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "PasswordDigest({}…)", &hex[..8])
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_of_empty_string_matches_known_vector() {
        assert_eq!(
            PasswordDigest::of("").to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_digest_of_asdf_matches_known_vector() {
        assert_eq!(
            PasswordDigest::of("asdf").to_hex(),
            "f0e4c2f76c58916ec258f246851bea091d14d4247a2fc3e18694461b1816e13b"
        );
    }

    #[test]
    fn test_digest_is_deterministic_across_calls() {
        for password in ["", "a", "test123", "pässwörd", "  spaced  "] {
            assert_eq!(PasswordDigest::of(password), PasswordDigest::of(password));
        }
    }

    #[test]
    fn test_distinct_inputs_produce_distinct_digests() {
        let inputs = ["", "a", "A", "test123", "test124", "test123 ", "cam1", "ghost"];
        let digests: Vec<_> = inputs.iter().map(|p| PasswordDigest::of(p)).collect();
        for (i, a) in digests.iter().enumerate() {
            for b in &digests[i + 1..] {
                assert_ne!(a, b, "no collision expected between distinct inputs");
            }
        }
    }

    #[test]
    fn test_verify_accepts_correct_and_rejects_wrong_password() {
        let stored = PasswordDigest::of("test123");
        assert!(stored.verify("test123"));
        assert!(!stored.verify("test1234"));
        assert!(!stored.verify(""));
    }

    #[test]
    fn test_debug_output_does_not_contain_full_digest() {
        let digest = PasswordDigest::of("secret");
        let debug = format!("{digest:?}");
        assert!(!debug.contains(&digest.to_hex()));
        assert!(debug.starts_with("PasswordDigest("));
    }

    #[test]
    fn test_hex_rendering_is_64_lowercase_chars() {
        let hex = PasswordDigest::of("x").to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_raw_bytes_agree_with_hex_rendering() {
        let digest = PasswordDigest::of("asdf");
        let bytes = digest.as_bytes();
        assert_eq!(bytes.len(), 32);
        assert_eq!(bytes[0], 0xf0);
        assert_eq!(bytes[31], 0x3b);
    }
}
