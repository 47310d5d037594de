//! Fixed-point amount and address helpers
//!
//! Both chains use 18 decimals. Amounts travel as `BigDecimal` inside the
//! service and become integer base units only at the chain boundary.

use std::str::FromStr;

use alloy::primitives::U256;
use bigdecimal::num_bigint::{BigInt, Sign};
use bigdecimal::BigDecimal;

use crate::error::ChainError;

pub const DECIMALS: i64 = 18;

/// Convert a decimal amount into 18-decimal base units, truncating dust
pub fn to_base_units(amount: &BigDecimal) -> Result<BigInt, ChainError> {
    let scaled = amount * BigDecimal::new(BigInt::from(1), -DECIMALS);
    let (units, exponent) = scaled.with_scale(0).into_bigint_and_exponent();
    debug_assert_eq!(exponent, 0);
    if units.sign() == Sign::Minus {
        return Err(ChainError::Decode(format!("negative amount: {}", amount)));
    }
    Ok(units)
}

/// Big-endian bytes of the base-unit amount; zero encodes as an empty slice
pub fn to_base_unit_bytes(amount: &BigDecimal) -> Result<Vec<u8>, ChainError> {
    let units = to_base_units(amount)?;
    if units.sign() == Sign::NoSign {
        return Ok(Vec::new());
    }
    Ok(units.to_bytes_be().1)
}

pub fn to_wei(amount: &BigDecimal) -> Result<U256, ChainError> {
    let units = to_base_units(amount)?;
    U256::from_str_radix(&units.to_string(), 10)
        .map_err(|e| ChainError::Decode(format!("amount {} out of range: {}", amount, e)))
}

pub fn from_wei(value: U256) -> BigDecimal {
    // U256 decimal strings always parse as a BigInt
    let units = BigInt::from_str(&value.to_string()).unwrap_or_default();
    BigDecimal::new(units, DECIMALS)
}

/// Lower-case an address and drop a leading `0x` so the two chains' spellings compare equal
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    let stripped = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    stripped.to_lowercase()
}

pub fn same_address(a: &str, b: &str) -> bool {
    normalize_address(a) == normalize_address(b)
}

/// True for `0x` followed by exactly 40 hex digits
pub fn is_hex_address(address: &str) -> bool {
    is_prefixed_hex(address, 40)
}

/// True for `0x` followed by exactly 64 hex digits
pub fn is_tx_hash(hash: &str) -> bool {
    is_prefixed_hex(hash, 64)
}

fn is_prefixed_hex(value: &str, digits: usize) -> bool {
    match value.strip_prefix("0x") {
        Some(body) => body.len() == digits && body.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}
