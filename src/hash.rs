//! Content addressing for text snapshots.
//!
//! Hashes are only ever compared for equality, so a fast non-cryptographic
//! 128-bit digest (xxh3) is enough to tell two snapshots apart without
//! comparing them byte by byte.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_128;

/// Number of hex characters shown when a hash is reported to callers.
pub const PREFIX_LEN: usize = 12;

/// Length of a full digest in hex characters.
pub const HASH_LEN: usize = 32;

/// Hex-encoded xxh3-128 digest of a text's UTF-8 bytes.
///
/// Deserializing accepts only [`HASH_LEN`] lowercase hex characters, so a
/// damaged record fails to load instead of carrying a bogus hash around.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid content hash {0:?}: expected {HASH_LEN} lowercase hex characters")]
pub struct InvalidHash(String);

impl TryFrom<String> for ContentHash {
    type Error = InvalidHash;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let well_formed = value.len() == HASH_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if well_formed {
            Ok(ContentHash(value))
        } else {
            Err(InvalidHash(value))
        }
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

impl ContentHash {
    /// Hash the UTF-8 bytes of `text`.
    pub fn of(text: &str) -> Self {
        Self::of_bytes(text.as_bytes())
    }

    /// Hash raw bytes, used for on-disk content that may not be UTF-8.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        ContentHash(format!("{:032x}", xxh3_128(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for status reports.
    pub fn prefix(&self) -> &str {
        self.0.get(..PREFIX_LEN).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(ContentHash::of("hello"), ContentHash::of("hello"));
        assert_ne!(ContentHash::of("hello"), ContentHash::of("hello\n"));
    }

    #[test]
    fn hash_is_fixed_width_hex() {
        let hash = ContentHash::of("");
        assert_eq!(hash.as_str().len(), 32);
        assert!(hash.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash.prefix().len(), PREFIX_LEN);
    }

    #[test]
    fn deserialize_rejects_malformed_digests() {
        let good = ContentHash::of("x");
        let json = serde_json::to_string(&good).unwrap();
        assert_eq!(serde_json::from_str::<ContentHash>(&json).unwrap(), good);

        let uppercase = format!("\"{}\"", "A".repeat(HASH_LEN));
        for bad in ["\"aééééééé\"", "\"abc\"", uppercase.as_str()] {
            assert!(serde_json::from_str::<ContentHash>(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn text_and_bytes_agree() {
        assert_eq!(ContentHash::of("fn main() {}"), ContentHash::of_bytes(b"fn main() {}"));
    }
}
