//! One `(user, asset)` balance: spendable funds plus funds reserved for
//! open orders.
//!
//! The halves are private and every mutation is checked, so no code path can
//! drive either side negative or silently wrap. Each successful mutation
//! bumps `version`. A failed mutation leaves the balance untouched.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Balance arithmetic failures
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BalanceError {
    #[error("insufficient available funds: available {available}, required {required}")]
    InsufficientAvailable { available: u64, required: u64 },

    #[error("insufficient locked funds: locked {locked}, required {required}")]
    InsufficientLocked { locked: u64, required: u64 },

    #[error("balance overflow")]
    Overflow,
}

/// Balance for a single (user, asset) pair
///
/// # Invariants (ENFORCED by private fields):
/// - avail >= 0 and frozen >= 0 (unsigned, never clamped)
/// - avail + frozen changes only through deposit/withdraw/spend_frozen
/// - lock/unlock move value between the two halves without changing the total
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Balance {
    avail: u64,   // PRIVATE - spendable
    frozen: u64,  // PRIVATE - reserved against open orders
    version: u64, // PRIVATE - incremented on every mutation
}

impl Balance {
    // ============================================================
    // READ-ONLY GETTERS
    // ============================================================

    #[inline(always)]
    pub const fn avail(&self) -> u64 {
        self.avail
    }

    #[inline(always)]
    pub const fn frozen(&self) -> u64 {
        self.frozen
    }

    /// Total balance (avail + frozen).
    /// Returns None on overflow (indicates data corruption)
    #[inline(always)]
    pub const fn total(&self) -> Option<u64> {
        self.avail.checked_add(self.frozen)
    }

    #[inline(always)]
    pub const fn version(&self) -> u64 {
        self.version
    }

    // ============================================================
    // PRE-CHECKS (no mutation)
    // ============================================================

    /// Check that `amount` can be moved out of `avail`
    #[inline]
    pub fn check_avail(&self, amount: u64) -> Result<(), BalanceError> {
        if self.avail < amount {
            return Err(BalanceError::InsufficientAvailable {
                available: self.avail,
                required: amount,
            });
        }
        Ok(())
    }

    /// Check that `amount` can be taken out of `frozen`
    #[inline]
    pub fn check_frozen(&self, amount: u64) -> Result<(), BalanceError> {
        if self.frozen < amount {
            return Err(BalanceError::InsufficientLocked {
                locked: self.frozen,
                required: amount,
            });
        }
        Ok(())
    }

    // ============================================================
    // VALIDATED MUTATIONS
    // ============================================================

    /// Credit available balance
    pub fn deposit(&mut self, amount: u64) -> Result<(), BalanceError> {
        self.avail = self
            .avail
            .checked_add(amount)
            .ok_or(BalanceError::Overflow)?;
        self.bump();
        Ok(())
    }

    /// Debit available balance
    pub fn withdraw(&mut self, amount: u64) -> Result<(), BalanceError> {
        self.check_avail(amount)?;
        self.avail -= amount;
        self.bump();
        Ok(())
    }

    /// Lock funds (move from available to frozen). No partial lock.
    pub fn lock(&mut self, amount: u64) -> Result<(), BalanceError> {
        self.check_avail(amount)?;
        let frozen = self
            .frozen
            .checked_add(amount)
            .ok_or(BalanceError::Overflow)?;
        self.avail -= amount;
        self.frozen = frozen;
        self.bump();
        Ok(())
    }

    /// Unlock funds (move from frozen back to available)
    pub fn unlock(&mut self, amount: u64) -> Result<(), BalanceError> {
        self.check_frozen(amount)?;
        let avail = self
            .avail
            .checked_add(amount)
            .ok_or(BalanceError::Overflow)?;
        self.frozen -= amount;
        self.avail = avail;
        self.bump();
        Ok(())
    }

    /// Spend frozen funds (remove from frozen without adding to available).
    /// Used for trade settlement.
    pub fn spend_frozen(&mut self, amount: u64) -> Result<(), BalanceError> {
        self.check_frozen(amount)?;
        self.frozen -= amount;
        self.bump();
        Ok(())
    }

    /// Rebuild a balance from persisted halves (snapshot restore)
    pub(crate) fn from_parts(avail: u64, frozen: u64) -> Result<Self, BalanceError> {
        avail.checked_add(frozen).ok_or(BalanceError::Overflow)?;
        Ok(Self {
            avail,
            frozen,
            version: 0,
        })
    }

    #[inline(always)]
    fn bump(&mut self) {
        self.version = self.version.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funded(amount: u64) -> Balance {
        let mut bal = Balance::default();
        bal.deposit(amount).unwrap();
        bal
    }

    #[test]
    fn test_every_mutation_bumps_version() {
        let mut bal = funded(100);
        bal.lock(30).unwrap();
        bal.unlock(10).unwrap();
        bal.spend_frozen(5).unwrap();
        bal.withdraw(1).unwrap();
        assert_eq!(bal.version(), 5);
        assert_eq!((bal.avail(), bal.frozen()), (79, 15));
    }

    #[test]
    fn test_credit_overflow_is_rejected() {
        let mut bal = funded(u64::MAX - 5);
        assert_eq!(bal.deposit(6), Err(BalanceError::Overflow));
        assert_eq!(bal.avail(), u64::MAX - 5);
        assert_eq!(bal.version(), 1);
    }

    #[test]
    fn test_reservation_is_all_or_nothing() {
        let mut bal = funded(4_000);
        let before = bal;
        assert_eq!(
            bal.lock(4_001),
            Err(BalanceError::InsufficientAvailable {
                available: 4_000,
                required: 4_001
            })
        );
        assert_eq!(bal, before);

        bal.lock(4_000).unwrap();
        assert_eq!((bal.avail(), bal.frozen()), (0, 4_000));
        assert!(bal.withdraw(1).is_err());
    }

    #[test]
    fn test_release_and_spend_bounded_by_frozen() {
        let mut bal = funded(500);
        bal.lock(200).unwrap();
        assert_eq!(
            bal.unlock(201),
            Err(BalanceError::InsufficientLocked {
                locked: 200,
                required: 201
            })
        );
        assert!(bal.spend_frozen(201).is_err());
        assert_eq!(bal.frozen(), 200);
    }

    #[test]
    fn test_fill_then_cancel_lifecycle() {
        // reserve 400, fill spends 150, price improvement returns 50,
        // cancel returns the rest
        let mut bal = funded(1_000);
        bal.lock(400).unwrap();
        bal.spend_frozen(150).unwrap();
        bal.unlock(50).unwrap();
        assert_eq!(bal.total(), Some(850));
        bal.unlock(bal.frozen()).unwrap();
        assert_eq!((bal.avail(), bal.frozen()), (850, 0));
    }

    #[test]
    fn test_from_parts_rejects_overflowing_total() {
        assert_eq!(Balance::from_parts(u64::MAX, 1), Err(BalanceError::Overflow));
        let bal = Balance::from_parts(7, 3).unwrap();
        assert_eq!((bal.avail(), bal.frozen(), bal.version()), (7, 3, 0));
    }
}
