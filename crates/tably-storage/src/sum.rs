//! Content sums using truncated BLAKE3.

use crate::{Result, StorageError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A 16-byte content sum, the sole identifier of every stored object.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sum([u8; 16]);

impl Sum {
    /// The length of a sum in bytes.
    pub const LEN: usize = 16;

    /// Length of the hex representation.
    pub const HEX_LEN: usize = 32;

    /// Computes the sum of the given canonical encoding.
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&hash.as_bytes()[..Self::LEN]);
        Self(bytes)
    }

    /// Creates a sum from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Creates a sum from a byte slice of exactly [`Sum::LEN`] bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let bytes: [u8; 16] = slice.try_into().map_err(|_| {
            StorageError::InvalidSum(format!("expected {} bytes, got {}", Self::LEN, slice.len()))
        })?;
        Ok(Self(bytes))
    }

    /// Returns the raw bytes of this sum.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Returns the sum as a lowercase hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a sum from its hex representation.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != Self::HEX_LEN {
            return Err(StorageError::InvalidSum(format!(
                "invalid sum length: {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| StorageError::InvalidSum(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Parses the wire form of an optional sum, where all zeros means nil.
    pub fn from_hex_optional(s: &str) -> Result<Option<Self>> {
        let sum = Self::from_hex(s)?;
        Ok((sum.0 != [0u8; 16]).then_some(sum))
    }

    /// Formats an optional sum for the wire, writing nil as all zeros.
    #[must_use]
    pub fn to_hex_optional(sum: Option<&Sum>) -> String {
        match sum {
            Some(sum) => sum.to_hex(),
            None => "0".repeat(Self::HEX_LEN),
        }
    }
}

impl Serialize for Sum {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Sum {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Sum::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl fmt::Debug for Sum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sum({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for Sum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_deterministic() {
        let data = b"Hello, world!";
        assert_eq!(Sum::compute(data), Sum::compute(data));
    }

    #[test]
    fn sum_different_data() {
        assert_ne!(Sum::compute(b"Hello"), Sum::compute(b"World"));
    }

    #[test]
    fn sum_hex_roundtrip() {
        let sum = Sum::compute(b"test");
        let hex = sum.to_hex();
        assert_eq!(hex.len(), Sum::HEX_LEN);
        assert_eq!(Sum::from_hex(&hex).unwrap(), sum);
    }

    #[test]
    fn sum_invalid_hex() {
        assert!(Sum::from_hex("abc").is_err());
        assert!(Sum::from_hex(&"z".repeat(32)).is_err());
        assert!(Sum::from_hex(&"a".repeat(34)).is_err());
    }

    #[test]
    fn sum_optional_wire_form() {
        let zeros = "0".repeat(32);
        assert_eq!(Sum::from_hex_optional(&zeros).unwrap(), None);
        assert_eq!(Sum::to_hex_optional(None), zeros);

        let sum = Sum::compute(b"x");
        assert_eq!(Sum::from_hex_optional(&sum.to_hex()).unwrap(), Some(sum));
        assert_eq!(Sum::to_hex_optional(Some(&sum)), sum.to_hex());
    }

    #[test]
    fn sum_from_slice() {
        let sum = Sum::compute(b"slice");
        assert_eq!(Sum::from_slice(sum.as_bytes()).unwrap(), sum);
        assert!(Sum::from_slice(&[1, 2, 3]).is_err());
    }

    #[test]
    fn sum_serialization() {
        let sum = Sum::from_bytes([0xab; 16]);
        let json = serde_json::to_string(&sum).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(16)));
        let parsed: Sum = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, sum);
    }

    #[test]
    fn sum_debug_is_abbreviated() {
        let debug = format!("{:?}", Sum::from_bytes([0u8; 16]));
        assert_eq!(debug, "Sum(000000000000)");
    }
}
