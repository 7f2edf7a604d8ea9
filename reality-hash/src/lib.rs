//! Deterministic content fingerprinting.
//!
//! A [`ContentHash`] is an opaque fingerprint over any serializable value.
//! Two values that serialize to the same bytes produce the same hash;
//! writers compute one before calling into `reality-store` so the node
//! store can distinguish "version bumped, content unchanged" from an
//! actual content change.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(thiserror::Error, Debug)]
pub enum HashError {
    #[error("failed to serialize value for hashing: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Opaque fingerprint, rendered as a lowercase hex string on the wire.
///
/// `PartialEq` compares the underlying bytes, not the formatted string, so
/// two `ContentHash` values are equal iff their inputs hashed identically.
#[derive(Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub const EMPTY: ContentHash = ContentHash([0u8; 32]);

    /// Hashes a serializable value. `serde_json` serializes maps via a
    /// `BTreeMap`, so key order never affects the result.
    pub fn of<T: Serialize>(value: &T) -> Result<Self, HashError> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self::of_bytes(&bytes))
    }

    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        ContentHash(out)
    }

    /// Combines two hashes into one, order-sensitive. Useful when a caller
    /// wants a single fingerprint over several independently-hashed parts
    /// without re-serializing the whole thing.
    pub fn combine(&self, other: &ContentHash) -> ContentHash {
        let mut hasher = Sha256::new();
        hasher.update(self.0);
        hasher.update(other.0);
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        ContentHash(out)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    /// Renders as hex, except the sentinel [`ContentHash::EMPTY`] which
    /// renders as the empty string (the "unknown key" sentinel in
    /// `SyncResponse`, per the data model's NodeMeta §3/I5).
    pub fn to_hex(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        hex_encode(&self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<ContentHash> for String {
    fn from(h: ContentHash) -> Self {
        h.to_hex()
    }
}

impl TryFrom<String> for ContentHash {
    type Error = HashParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s.is_empty() {
            return Ok(ContentHash::EMPTY);
        }
        let bytes = hex_decode(&s).ok_or(HashParseError::InvalidHex)?;
        if bytes.len() != 32 {
            return Err(HashParseError::WrongLength(bytes.len()));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(ContentHash(out))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum HashParseError {
    #[error("hash is not valid hex")]
    InvalidHex,
    #[error("hash has wrong length: {0} bytes, expected 32")]
    WrongLength(usize),
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Payload {
        a: u32,
        b: String,
    }

    #[test]
    fn same_content_same_hash() {
        let p1 = Payload { a: 1, b: "x".into() };
        let p2 = Payload { a: 1, b: "x".into() };
        assert_eq!(ContentHash::of(&p1).unwrap(), ContentHash::of(&p2).unwrap());
    }

    #[test]
    fn different_content_different_hash() {
        let p1 = Payload { a: 1, b: "x".into() };
        let p2 = Payload { a: 2, b: "x".into() };
        assert_ne!(ContentHash::of(&p1).unwrap(), ContentHash::of(&p2).unwrap());
    }

    #[test]
    fn key_order_does_not_matter() {
        let v1 = serde_json::json!({"a": 1, "b": 2});
        let v2 = serde_json::json!({"b": 2, "a": 1});
        assert_eq!(ContentHash::of(&v1).unwrap(), ContentHash::of(&v2).unwrap());
    }

    #[test]
    fn hex_round_trip() {
        let h = ContentHash::of(&"hello").unwrap();
        let hex = h.to_hex();
        let back: ContentHash = hex.try_into().unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn empty_is_sentinel() {
        assert!(ContentHash::EMPTY.is_empty());
        assert_eq!(ContentHash::EMPTY.to_hex(), String::new());
    }

    #[test]
    fn combine_is_order_sensitive() {
        let a = ContentHash::of(&"a").unwrap();
        let b = ContentHash::of(&"b").unwrap();
        assert_ne!(a.combine(&b), b.combine(&a));
    }
}
