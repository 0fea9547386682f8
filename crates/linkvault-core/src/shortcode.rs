use crate::error::ShortenerError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use smol_str::SmolStr;
use std::fmt::Display;

/// Number of digest bytes that make up a short code.
const CODE_BYTES: usize = 8;
const MAX_LENGTH: usize = 64;

/// The full SHA-256 fingerprint of a target URL.
///
/// Persistent backends put their uniqueness constraint on this value rather
/// than on the short code, since the code is only a prefix of it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Hashes the raw bytes of `target`.
    pub fn of(target: &str) -> Self {
        Self(Sha256::digest(target.as_bytes()).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derives the fixed-width short code for this fingerprint.
    pub fn short_code(&self) -> ShortCode {
        let mut encoded = String::with_capacity(CODE_BYTES * 2);
        for byte in &self.0[..CODE_BYTES] {
            encoded.push_str(&format!("{byte:02x}"));
        }
        ShortCode(SmolStr::new(encoded))
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Fingerprint")
            .field(&self.short_code().as_str())
            .finish()
    }
}

/// A content-addressed identifier for a shortened URL.
///
/// Codes produced by [`ShortCode::for_target`] are 16 lowercase hex
/// characters; the same target always yields the same code.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShortCode(SmolStr);

impl ShortCode {
    /// Derives the short code for a target URL.
    pub fn for_target(target: &str) -> Self {
        Fingerprint::of(target).short_code()
    }

    /// Validates a code supplied by a caller (e.g. from a redirect path).
    ///
    /// Valid codes are 1-64 characters of `[a-zA-Z0-9_-]`.
    pub fn parse(code: impl AsRef<str>) -> std::result::Result<Self, ShortenerError> {
        let code = code.as_ref();
        if code.is_empty() || code.len() > MAX_LENGTH {
            return Err(ShortenerError::InvalidShortCode(format!(
                "length must be between 1 and {}, got {}",
                MAX_LENGTH,
                code.len()
            )));
        }

        if !code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ShortenerError::InvalidShortCode(format!(
                "must contain only alphanumeric characters, hyphens, or underscores: '{}'",
                code
            )));
        }

        Ok(Self(SmolStr::new(code)))
    }

    /// Creates a `ShortCode` without validation.
    ///
    /// Use this only for codes read back from a backend that stored them.
    pub fn new_unchecked(code: impl AsRef<str>) -> Self {
        Self(SmolStr::new(code))
    }

    /// Generates the full shortened URL based on the provided base URL.
    pub fn to_url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ShortCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
