//! Fixed-point helpers.
//!
//! Quantities and currency amounts are stored as integers scaled by
//! 1,000,000 ("micros") so share counts like 0.123456 survive every
//! round-trip through the database without floating point drift.

use crate::error::{Error, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Scale factor for all quantity and amount columns (10^6)
pub const MICROS_SCALE: i64 = 1_000_000;

/// Parse a decimal string ("12.5", "-3", "0.000001") into micros.
///
/// Digits beyond the sixth decimal place are truncated toward zero.
pub fn parse_micros(input: &str) -> Result<i64> {
    let trimmed = input.trim().replace(',', "");
    let value = Decimal::from_str(&trimmed)
        .map_err(|e| Error::InvalidInput(format!("'{}' is not a decimal number: {}", input, e)))?;

    value
        .checked_mul(Decimal::from(MICROS_SCALE))
        .and_then(|scaled| scaled.trunc().to_i64())
        .ok_or_else(|| Error::InvalidInput(format!("'{}' is out of range", input)))
}

/// Render micros as a decimal with the given number of fractional digits.
pub fn format_micros(micros: i64, decimals: u32) -> String {
    let value = Decimal::new(micros, 6).round_dp(decimals);
    format!("{:.*}", decimals as usize, value)
}
