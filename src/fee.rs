//! Fee calculation utilities
//!
//! All fee rates use 10^6 precision: 1000 = 0.10%
//!
//! Policy: the fee is charged in the quote asset and deducted from the
//! seller's proceeds. The seller pays the maker rate when its order was
//! resting and the taker rate when it was the incoming order.

use serde::{Deserialize, Serialize};

/// Fee rate precision (10^6 = 1,000,000)
pub const FEE_PRECISION: u64 = 1_000_000;

/// Default maker fee rate (1000 = 0.10%)
pub const DEFAULT_MAKER_FEE: u64 = 1000;

/// Default taker fee rate (1000 = 0.10%)
pub const DEFAULT_TAKER_FEE: u64 = 1000;

/// Calculate fee from amount and rate.
///
/// Uses u128 intermediate to prevent overflow. Never exceeds `amount`.
///
/// # Example
/// ```
/// use spot_engine::fee::calculate_fee;
/// // 4000 USDT (6 decimals) * 0.10% = 4 USDT
/// assert_eq!(calculate_fee(4_000_000_000, 1000), 4_000_000);
/// ```
#[inline]
pub fn calculate_fee(amount: u64, rate: u64) -> u64 {
    let fee = ((amount as u128 * rate as u128) / FEE_PRECISION as u128).min(amount as u128);
    // Minimum fee is 1 if amount > 0 and rate > 0
    if fee == 0 && amount > 0 && rate > 0 {
        1
    } else {
        fee as u64
    }
}

/// Per-symbol fee schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub maker_rate: u64,
    pub taker_rate: u64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            maker_rate: DEFAULT_MAKER_FEE,
            taker_rate: DEFAULT_TAKER_FEE,
        }
    }
}

impl FeeSchedule {
    /// Fee owed by the seller on `quote_amount` of proceeds
    #[inline]
    pub fn seller_fee(&self, quote_amount: u64, seller_is_taker: bool) -> u64 {
        let rate = if seller_is_taker {
            self.taker_rate
        } else {
            self.maker_rate
        };
        calculate_fee(quote_amount, rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_fee_basic() {
        // 40000 USDT * 0.10% = 40 USDT
        assert_eq!(calculate_fee(40_000_000_000, 1000), 40_000_000);
        // 0.20%
        assert_eq!(calculate_fee(100_000_000, 2000), 200_000);
    }

    #[test]
    fn test_calculate_fee_small_amount() {
        // Would round to 0 -> minimum fee is 1
        assert_eq!(calculate_fee(100, 1000), 1);
        assert_eq!(calculate_fee(1, 1000), 1);
    }

    #[test]
    fn test_calculate_fee_zero() {
        assert_eq!(calculate_fee(0, 1000), 0);
        assert_eq!(calculate_fee(100_000, 0), 0);
    }

    #[test]
    fn test_fee_never_exceeds_amount() {
        // 200% rate is clamped to the amount itself
        assert_eq!(calculate_fee(50, 2_000_000), 50);
    }

    #[test]
    fn test_no_overflow() {
        let large_amount: u64 = 10_000_000_000_000_000_000; // 10^19
        assert_eq!(calculate_fee(large_amount, 2000), 20_000_000_000_000_000);
    }

    #[test]
    fn test_seller_fee_uses_role_rate() {
        let schedule = FeeSchedule {
            maker_rate: 500,
            taker_rate: 2000,
        };
        assert_eq!(schedule.seller_fee(1_000_000, false), 500);
        assert_eq!(schedule.seller_fee(1_000_000, true), 2000);
    }
}
