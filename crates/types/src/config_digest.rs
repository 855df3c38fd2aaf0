//! Configuration digest and signature timestamps.
//!
//! A [`ConfigDigest`] identifies one oracle configuration. Every offchain
//! signature is scoped to a [`Timestamp`], the pair of config digest and
//! epoch, so signatures cannot be replayed across configurations or epochs.

use crate::{Epoch, Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Size of a config digest in bytes
pub const CONFIG_DIGEST_SIZE: usize = 32;

/// A 32-byte configuration digest.
///
/// # Example
///
/// ```rust
/// use ocr3_types::ConfigDigest;
///
/// let digest = ConfigDigest::new([1u8; 32]);
/// let parsed: ConfigDigest = digest.to_hex().parse().unwrap();
/// assert_eq!(digest, parsed);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ConfigDigest([u8; CONFIG_DIGEST_SIZE]);

impl ConfigDigest {
    /// Creates a new digest from a 32-byte array.
    #[inline]
    pub const fn new(bytes: [u8; CONFIG_DIGEST_SIZE]) -> Self {
        Self(bytes)
    }

    /// Creates a digest from a slice.
    ///
    /// Returns an error if the slice length is not exactly 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != CONFIG_DIGEST_SIZE {
            return Err(Error::InvalidLength {
                expected: CONFIG_DIGEST_SIZE,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; CONFIG_DIGEST_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Returns the digest as a byte slice.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the digest as a fixed-size byte array.
    #[inline]
    pub const fn as_fixed_bytes(&self) -> &[u8; CONFIG_DIGEST_SIZE] {
        &self.0
    }

    /// Creates a digest from its hex representation.
    ///
    /// The input can optionally have a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        if s.len() != 2 * CONFIG_DIGEST_SIZE {
            return Err(Error::InvalidDigest(format!(
                "expected 64 hex characters, got {}",
                s.len()
            )));
        }
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }

    /// Returns the hex representation without prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ConfigDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigDigest({})", hex::encode(self.0))
    }
}

impl fmt::Display for ConfigDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for ConfigDigest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl From<[u8; CONFIG_DIGEST_SIZE]> for ConfigDigest {
    fn from(bytes: [u8; CONFIG_DIGEST_SIZE]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for ConfigDigest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for ConfigDigest {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ConfigDigest {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Scope of an offchain signature: one configuration, one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Configuration the signature belongs to
    pub config_digest: ConfigDigest,
    /// Epoch the signature belongs to
    pub epoch: Epoch,
}

impl Timestamp {
    /// Create a timestamp.
    pub fn new(config_digest: ConfigDigest, epoch: Epoch) -> Self {
        Self {
            config_digest,
            epoch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let digest = ConfigDigest::new([0xab; 32]);
        assert_eq!(ConfigDigest::from_hex(&digest.to_hex()).unwrap(), digest);
        assert_eq!(
            ConfigDigest::from_hex(&format!("0x{}", digest.to_hex())).unwrap(),
            digest
        );
    }

    #[test]
    fn test_from_hex_wrong_length() {
        assert!(matches!(
            ConfigDigest::from_hex("abcd"),
            Err(Error::InvalidDigest(_))
        ));
    }

    #[test]
    fn test_from_slice_wrong_length() {
        assert!(matches!(
            ConfigDigest::from_slice(&[0u8; 31]),
            Err(Error::InvalidLength {
                expected: 32,
                actual: 31
            })
        ));
    }

    #[test]
    fn test_serde_as_hex_string() {
        let digest = ConfigDigest::new([1u8; 32]);
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(32)));
        let back: ConfigDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
    }
}
