//! Content digests: `sha256:<hex>` identifiers for blobs and manifest bodies.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::{RegistryError, Result};

/// A SHA-256 content digest, rendered as `sha256:<64 lowercase hex chars>`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; 32]);

impl Digest {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Digest(bytes)
    }

    /// Computes the digest of `data`.
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let out = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&out);
        Digest(bytes)
    }

    /// Parses `sha256:<hex>` or bare `<hex>`.
    pub fn from_str_loose(s: &str) -> Result<Self> {
        let hex_part = s.strip_prefix("sha256:").unwrap_or(s);
        if hex_part.len() != 64 {
            return Err(RegistryError::ClientValidation(format!(
                "invalid digest length: {s}"
            )));
        }
        let bytes = hex::decode(hex_part)
            .map_err(|e| RegistryError::ClientValidation(format!("invalid digest hex: {e}")))?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Digest(out))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Verifies this digest equals `sha256(data)`.
    pub fn verify(&self, data: &[u8]) -> bool {
        *self == Digest::of(data)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self)
    }
}

impl FromStr for Digest {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        Digest::from_str_loose(s)
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Digest::from_str_loose(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn of_known_vector() {
        // sha256("") = e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855
        let d = Digest::of(b"");
        assert_eq!(
            d.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            d.to_string(),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn parses_with_and_without_prefix() {
        let d1 = Digest::of(b"hello");
        let s = d1.to_string();
        let d2 = Digest::from_str_loose(&s).unwrap();
        let d3 = Digest::from_str_loose(&d1.to_hex()).unwrap();
        assert_eq!(d1, d2);
        assert_eq!(d1, d3);
    }

    #[test]
    fn rejects_bad_hex() {
        assert!(Digest::from_str_loose("sha256:nothex").is_err());
        assert!(Digest::from_str_loose("sha256:abcd").is_err());
    }

    #[test]
    fn verify_roundtrip() {
        let data = b"manifest body bytes";
        let d = Digest::of(data);
        assert!(d.verify(data));
        assert!(!d.verify(b"other bytes"));
    }

    #[test]
    fn serde_roundtrip() {
        let d = Digest::of(b"abc");
        let json = serde_json::to_string(&d).unwrap();
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(d, back);
    }
}
