//! Money Conversion Module
//!
//! Fixed-point arithmetic for every amount that moves through the engine.
//! Conversion between the internal u64 representation and client-facing
//! string/Decimal representation MUST go through this module.
//!
//! ## Internal Representation
//! - All amounts are stored as `u64` scaled by `10^decimals`
//!   (e.g. 10^8 for BTC = satoshi, 10^6 for USDT)
//! - A price is the quote amount (in quote units) paid for ONE whole base unit
//! - `quote = price * qty / qty_unit`, truncated, through a u128 intermediate
//!
//! ## Rounding
//! Every division truncates toward zero. Reservations are computed at the
//! order's own limit price, so truncated per-fill costs always sum to at most
//! the truncated reservation.

use rust_decimal::prelude::*;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Money conversion errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Largest scale whose unit still fits in a u64 (10^19 < 2^64)
pub const MAX_DECIMALS: u32 = 19;

/// Scale factor for `decimals` (10^decimals); callers keep `decimals <= MAX_DECIMALS`
#[inline]
pub fn unit_amount(decimals: u32) -> u64 {
    10u64.pow(decimals)
}

// ============================================================================
// Arithmetic: the only place prices and quantities are multiplied
// ============================================================================

/// Quote value of `qty` base units at `price`.
///
/// # Formula
/// `price × qty / qty_unit`, truncated.
///
/// # Example (BTC/USDT with base_decimals=8, quote_decimals=6)
/// ```text
/// Buy 0.1 BTC @ 40000 USDT:
///   price = 40000_000000, qty = 10_000000, qty_unit = 10^8
///   quote = 40000_000000 * 10_000000 / 10^8 = 4000_000000 (4000 USDT)
/// ```
///
/// # Errors
/// `MoneyError::Overflow` if the result exceeds u64::MAX
#[inline]
pub fn quote_amount(price: u64, qty: u64, qty_unit: u64) -> Result<u64, MoneyError> {
    if qty_unit == 0 {
        return Err(MoneyError::InvalidAmount);
    }
    let value = (price as u128) * (qty as u128) / (qty_unit as u128);
    u64::try_from(value).map_err(|_| MoneyError::Overflow)
}

/// Raise `price` by `bps` basis points, rounding up.
///
/// Used to derive the protection (cap) price of a market buy.
#[inline]
pub fn apply_bps_ceil(price: u64, bps: u32) -> Result<u64, MoneyError> {
    let numerator = (price as u128) * (10_000u128 + bps as u128);
    let value = numerator.div_ceil(10_000);
    u64::try_from(value).map_err(|_| MoneyError::Overflow)
}

// ============================================================================
// Parse: Client → Internal (String/Decimal → u64)
// ============================================================================

/// Convert client string amount to internal u64 representation
///
/// # Errors
/// * `PrecisionOverflow` - If input has more decimal places than allowed
/// * `InvalidAmount` - If amount is zero or negative
/// * `Overflow` - If result would overflow u64
/// * `InvalidFormat` - If string format is invalid
pub fn parse_amount(amount_str: &str, decimals: u32) -> Result<u64, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }
    if amount_str.starts_with('-') || amount_str.starts_with('+') {
        return Err(MoneyError::InvalidAmount);
    }

    let (whole, frac) = match amount_str.split_once('.') {
        None => (amount_str, ""),
        Some((whole, frac)) => {
            if whole.is_empty() || frac.is_empty() || frac.contains('.') {
                return Err(MoneyError::InvalidFormat(amount_str.to_string()));
            }
            (whole, frac)
        }
    };

    // No silent truncation
    if frac.len() > decimals as usize {
        return Err(MoneyError::PrecisionOverflow {
            provided: frac.len() as u32,
            max: decimals,
        });
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(amount_str.to_string()));
    }

    let whole_num: u64 = whole.parse().map_err(|_| MoneyError::Overflow)?;
    let frac_num: u64 = if frac.is_empty() {
        0
    } else {
        format!("{:0<width$}", frac, width = decimals as usize)
            .parse()
            .map_err(|_| MoneyError::InvalidFormat(amount_str.to_string()))?
    };

    let amount = whole_num
        .checked_mul(unit_amount(decimals))
        .and_then(|v| v.checked_add(frac_num))
        .ok_or(MoneyError::Overflow)?;

    if amount == 0 {
        return Err(MoneyError::InvalidAmount);
    }
    Ok(amount)
}

/// Convert Decimal to internal u64 representation
///
/// Used at the API boundary where callers hold `rust_decimal::Decimal`.
pub fn parse_decimal(decimal: Decimal, decimals: u32) -> Result<u64, MoneyError> {
    if decimal.is_sign_negative() || decimal.is_zero() {
        return Err(MoneyError::InvalidAmount);
    }
    let normalized = decimal.normalize();
    if normalized.scale() > decimals {
        return Err(MoneyError::PrecisionOverflow {
            provided: normalized.scale(),
            max: decimals,
        });
    }
    let result = normalized
        .checked_mul(Decimal::from(unit_amount(decimals)))
        .ok_or(MoneyError::Overflow)?;
    result.to_u64().ok_or(MoneyError::Overflow)
}

// ============================================================================
// Format: Internal → Client (u64 → Decimal/String)
// ============================================================================

/// Convert internal u64 to an exact Decimal
pub fn to_decimal(value: u64, decimals: u32) -> Decimal {
    Decimal::from_i128_with_scale(value as i128, decimals)
}

/// Convert internal u64 to display string, truncated to `display_decimals`
pub fn format_amount(value: u64, decimals: u32, display_decimals: u32) -> String {
    let shown = to_decimal(value, decimals).trunc_with_scale(display_decimals.min(decimals));
    format!("{:.prec$}", shown, prec = display_decimals as usize)
}

/// Full precision string (for CSV output and storage)
pub fn format_amount_full(value: u64, decimals: u32) -> String {
    format_amount(value, decimals, decimals)
}
