//! Address parsing rules for manifests and link values.
//!
//! The address type itself is `alloy_primitives::Address`. Manifests spell
//! addresses as `0x`-prefixed hex: all-lowercase and all-uppercase
//! spellings are accepted, a mixed-case spelling is an EIP-55 checksum and
//! must verify. Serialized addresses are always checksummed.

use thiserror::Error;

pub use alloy_primitives::Address;

/// Width of an address in bytes.
pub const ADDRESS_LENGTH: usize = 20;

/// Errors produced when parsing an address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address must be 0x-prefixed: {0}")]
    MissingPrefix(String),

    #[error("address must be {expected} hex characters, got {actual}: {value}")]
    InvalidLength {
        value: String,
        expected: usize,
        actual: usize,
    },

    #[error("address contains non-hex characters: {0}")]
    InvalidHex(String),

    #[error("address fails EIP-55 checksum: {0}")]
    BadChecksum(String),
}

/// Parse a `0x`-prefixed hex address.
pub fn parse_address(value: &str) -> Result<Address, AddressError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| AddressError::MissingPrefix(value.to_string()))?;

    if digits.len() != ADDRESS_LENGTH * 2 {
        return Err(AddressError::InvalidLength {
            value: value.to_string(),
            expected: ADDRESS_LENGTH * 2,
            actual: digits.len(),
        });
    }
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AddressError::InvalidHex(value.to_string()));
    }

    let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        return Address::parse_checksummed(format!("0x{}", digits), None)
            .map_err(|_| AddressError::BadChecksum(value.to_string()));
    }

    let mut bytes = [0u8; ADDRESS_LENGTH];
    hex::decode_to_slice(digits, &mut bytes)
        .map_err(|_| AddressError::InvalidHex(value.to_string()))?;
    Ok(Address::new(bytes))
}

/// Whether `value` is spelled as a literal address (`0x` + 40 hex).
pub fn is_literal_address(value: &str) -> bool {
    value
        .strip_prefix("0x")
        .map(|d| d.len() == ADDRESS_LENGTH * 2 && d.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false)
}

/// Whether `value` is an address spelled in valid EIP-55 checksum form.
pub fn is_checksum_address(value: &str) -> bool {
    match parse_address(value) {
        Ok(address) => address.to_checksum(None) == value,
        Err(_) => false,
    }
}

/// Serde adapter: checksummed on output, [`parse_address`] rules on input.
pub mod checksummed {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{parse_address, Address};

    pub fn serialize<S: Serializer>(address: &Address, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&address.to_checksum(None))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Address, D::Error> {
        let value = String::deserialize(deserializer)?;
        parse_address(&value).map_err(serde::de::Error::custom)
    }
}
