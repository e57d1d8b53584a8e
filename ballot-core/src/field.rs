//! Elements of the BN254 scalar field.

use std::{fmt, str::FromStr};

use alloy_primitives::{B256, U256};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Order of the BN254 scalar field.
pub const MODULUS: U256 = U256::from_limbs([
    0x43e1f593f0000001,
    0x2833e84879b97091,
    0xb85045b68181585d,
    0x30644e72e131a029,
]);

const BYTE_RADIX: U256 = U256::from_limbs([256, 0, 0, 0]);

/// A reduced field element. The inner value is always `< MODULUS`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Field(U256);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FieldParseError {
    #[error("invalid field literal: {0}")]
    Malformed(String),
    #[error("value is not below the field modulus")]
    OutOfRange,
}

impl Field {
    pub const ZERO: Field = Field(U256::ZERO);

    /// Interprets `bytes` as a big-endian integer and reduces it, one byte at a
    /// time, so the accumulator never exceeds `256 * MODULUS`.
    pub fn from_be_bytes_mod_order(bytes: &[u8]) -> Self {
        let acc = bytes.iter().fold(U256::ZERO, |acc, &byte| {
            acc.mul_mod(BYTE_RADIX, MODULUS)
                .add_mod(U256::from(byte), MODULUS)
        });
        Field(acc)
    }

    /// Reduces a full 256-bit word.
    pub fn from_word(word: B256) -> Self {
        Field(U256::from_be_bytes(word.0).reduce_mod(MODULUS))
    }

    pub fn to_be_bytes(&self) -> [u8; 32] {
        self.0.to_be_bytes::<32>()
    }

    pub fn to_word(&self) -> B256 {
        B256::from(self.to_be_bytes())
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<u64> for Field {
    fn from(value: u64) -> Self {
        Field(U256::from(value))
    }
}

impl TryFrom<U256> for Field {
    type Error = FieldParseError;

    fn try_from(value: U256) -> Result<Self, Self::Error> {
        if value >= MODULUS {
            return Err(FieldParseError::OutOfRange);
        }
        Ok(Field(value))
    }
}

impl FromStr for Field {
    type Err = FieldParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(digits) => U256::from_str_radix(digits, 16),
            None => U256::from_str_radix(s, 10),
        }
        .map_err(|_| FieldParseError::Malformed(s.to_string()))?;
        Field::try_from(parsed)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.to_be_bytes()))
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}
