//! 96-bit Row Identifiers
//!
//! Source rows are keyed by a 96-bit identifier rendered as exactly 24
//! lowercase hex digits, the canonical form used in artifact rows, range
//! predicates, and keyset cursors.
//!
//! The reduce engine partitions the identifier space arithmetically, so
//! `RowId` converts losslessly to and from `u128`. Reconstruction always
//! masks to the low 96 bits and pads back to 24 digits.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CoreError, Result};

/// Number of hex digits in the canonical rendering.
pub const HEX_LEN: usize = 24;

const LOW_96_MASK: u128 = (1u128 << 96) - 1;

/// A 96-bit source-row identifier.
///
/// Ordered bytewise, which matches both the numeric order of the
/// identifier and the lexicographic order of its hex rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowId([u8; 12]);

impl RowId {
    pub const MIN: RowId = RowId([0u8; 12]);
    pub const MAX: RowId = RowId([0xff; 12]);

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// Parse the canonical 24-hex-digit rendering.
    pub fn parse_str(s: &str) -> Result<Self> {
        if s.len() != HEX_LEN {
            return Err(CoreError::InvalidRowId(s.to_string()));
        }
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| CoreError::InvalidRowId(s.to_string()))?;
        Ok(Self(bytes))
    }

    /// Canonical 24-digit lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Widen to a `u128` for range arithmetic. The top 32 bits are zero.
    pub fn to_u128(&self) -> u128 {
        let mut wide = [0u8; 16];
        wide[4..].copy_from_slice(&self.0);
        u128::from_be_bytes(wide)
    }

    /// Reconstruct from a `u128`, masking to the low 96 bits.
    pub fn from_u128(value: u128) -> Self {
        let masked = value & LOW_96_MASK;
        let wide = masked.to_be_bytes();
        let mut bytes = [0u8; 12];
        bytes.copy_from_slice(&wide[4..]);
        Self(bytes)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for RowId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_str(s)
    }
}

impl Serialize for RowId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for RowId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse_str(&s).map_err(serde::de::Error::custom)
    }
}
