//! Lossless conversion between the decimal currency representation used on
//! the wire and the integer minor-unit (cents) representation stored in the
//! ledger.
//!
//! All internal arithmetic happens on `u64` minor units; decimals only appear
//! at the edges (accrual responses, user-facing amounts).

use thiserror::Error;

/// Minor units per major unit.
pub const SCALE: u64 = 100;

/// Largest decimal amount that still fits `u64` after scaling.
pub const MAX_DECIMAL: f64 = (u64::MAX / SCALE) as f64;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MoneyError {
    /// The scaled value would not fit the minor-unit integer range.
    #[error("money conversion overflow")]
    Overflow,
}

/// Convert minor units to the decimal representation (exact division by 100).
pub fn minor_units_to_decimal(minor: u64) -> f64 {
    minor as f64 / SCALE as f64
}

/// Convert a trusted, non-negative decimal amount to minor units.
///
/// Rounds half-up: `f64::round` rounds halves away from zero, which for the
/// non-negative amounts handled here is round-half-up (0.005 -> 1 minor unit).
pub fn decimal_to_minor_units(decimal: f64) -> u64 {
    (decimal * SCALE as f64).round() as u64
}

/// Convert a decimal amount received from the accrual service to minor units,
/// failing with [`MoneyError::Overflow`] when the value would not fit.
///
/// The bound is checked against `u64::MAX / SCALE` *before* multiplying, so
/// the multiplication itself can never wrap. Negative and non-finite inputs
/// are rejected the same way.
pub fn external_to_minor_units(decimal: f64) -> Result<u64, MoneyError> {
    if !decimal.is_finite() || decimal < 0.0 || decimal > MAX_DECIMAL {
        return Err(MoneyError::Overflow);
    }
    Ok(decimal_to_minor_units(decimal))
}

/// Render minor units as a two-decimal string ("1505" -> "15.05").
pub fn format_decimal(minor: u64) -> String {
    format!("{:.2}", minor_units_to_decimal(minor))
}
