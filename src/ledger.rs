//! Ledger - per-user, per-asset balance store
//!
//! The source of truth for funds. Every `(user, asset)` slot sits behind its
//! own mutex so symbols that share an asset settle independently of the
//! per-symbol matching lock.
//!
//! Multi-slot operations go through [`Ledger::transact`]:
//! 1. collect the distinct slots, sorted by `(user_id, asset_id)`
//! 2. lock them in that order (each slot exactly once)
//! 3. apply the mutation to copies of the balances
//! 4. write the copies back only if every step succeeded
//!
//! so no intermediate state is observable and a failed precondition leaves
//! nothing behind.

use crate::balance::{Balance, BalanceError};
use crate::core_types::{AssetId, FEE_ACCOUNT_ID, UserId};
use crate::error::LedgerError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::error;

type SlotKey = (UserId, AssetId);

/// One trade's worth of balance movement.
///
/// `quote_amount` is computed once by the matching engine and used for both
/// legs: the buyer's debit equals the seller's credit plus `fee`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub buyer: UserId,
    pub seller: UserId,
    pub base_asset: AssetId,
    pub quote_asset: AssetId,
    pub base_amount: u64,
    pub quote_amount: u64,
    pub fee: u64,
}

/// Persisted form of one balance slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub user_id: UserId,
    pub asset_id: AssetId,
    pub avail: u64,
    pub frozen: u64,
}

/// Working copies of the locked slots inside a transaction
pub struct Working {
    balances: BTreeMap<SlotKey, Balance>,
}

impl Working {
    fn get_mut(&mut self, user_id: UserId, asset_id: AssetId) -> &mut Balance {
        // Slots are pre-populated by transact for every key it was given
        self.balances.entry((user_id, asset_id)).or_default()
    }

    /// Apply a balance step, classifying its failure
    fn step(
        &mut self,
        user_id: UserId,
        asset_id: AssetId,
        kind: StepKind,
        f: impl FnOnce(&mut Balance) -> Result<(), BalanceError>,
    ) -> Result<(), LedgerError> {
        f(self.get_mut(user_id, asset_id)).map_err(|source| match (kind, source) {
            (_, BalanceError::Overflow) => LedgerError::Overflow { user_id, asset_id },
            (StepKind::User, BalanceError::InsufficientAvailable { available, required }) => {
                LedgerError::InsufficientFunds {
                    user_id,
                    asset_id,
                    available,
                    required,
                }
            }
            (_, source) => LedgerError::InternalInconsistency {
                user_id,
                asset_id,
                source,
            },
        })
    }
}

/// Whether a failed precondition is the caller's fault or a bookkeeping bug
#[derive(Clone, Copy)]
enum StepKind {
    User,
    Internal,
}

pub struct Ledger {
    slots: DashMap<SlotKey, Arc<Mutex<Balance>>>,
    fee_account: UserId,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(FEE_ACCOUNT_ID)
    }
}

impl Ledger {
    pub fn new(fee_account: UserId) -> Self {
        Self {
            slots: DashMap::new(),
            fee_account,
        }
    }

    #[inline]
    pub fn fee_account(&self) -> UserId {
        self.fee_account
    }

    fn slot(&self, key: SlotKey) -> Arc<Mutex<Balance>> {
        // Clone the Arc so no shard guard is held while the mutex is taken
        self.slots.entry(key).or_default().clone()
    }

    fn lock(slot: &Mutex<Balance>) -> MutexGuard<'_, Balance> {
        slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the given slots as one indivisible unit.
    pub fn transact<F>(&self, keys: &[SlotKey], f: F) -> Result<(), LedgerError>
    where
        F: FnOnce(&mut Working) -> Result<(), LedgerError>,
    {
        // BTreeMap keeps the global (user, asset) lock order and dedups keys
        let slots: BTreeMap<SlotKey, Arc<Mutex<Balance>>> =
            keys.iter().map(|&k| (k, self.slot(k))).collect();
        let mut guards: Vec<(SlotKey, MutexGuard<'_, Balance>)> = slots
            .iter()
            .map(|(&k, slot)| (k, Self::lock(slot)))
            .collect();

        let mut working = Working {
            balances: guards.iter().map(|(k, g)| (*k, **g)).collect(),
        };
        if let Err(e) = f(&mut working) {
            if e.is_internal() {
                error!(error = %e, "ledger invariant violated, no balance changed");
            }
            return Err(e);
        }

        for (key, guard) in guards.iter_mut() {
            if let Some(updated) = working.balances.get(key) {
                **guard = *updated;
            }
        }
        Ok(())
    }

    /// Credit available balance (deposit collaborator)
    pub fn deposit(&self, user_id: UserId, asset_id: AssetId, amount: u64) -> Result<(), LedgerError> {
        self.transact(&[(user_id, asset_id)], |w| {
            w.step(user_id, asset_id, StepKind::User, |b| b.deposit(amount))
        })
    }

    /// Debit available balance (withdrawal collaborator)
    pub fn withdraw(&self, user_id: UserId, asset_id: AssetId, amount: u64) -> Result<(), LedgerError> {
        self.transact(&[(user_id, asset_id)], |w| {
            w.step(user_id, asset_id, StepKind::User, |b| b.withdraw(amount))
        })
    }

    /// Move `amount` from available to locked. No partial reservation.
    pub fn reserve(&self, user_id: UserId, asset_id: AssetId, amount: u64) -> Result<(), LedgerError> {
        self.transact(&[(user_id, asset_id)], |w| {
            w.step(user_id, asset_id, StepKind::User, |b| b.lock(amount))
        })
    }

    /// Move `amount` from locked back to available.
    ///
    /// `locked < amount` is an `InternalInconsistency`.
    pub fn release(&self, user_id: UserId, asset_id: AssetId, amount: u64) -> Result<(), LedgerError> {
        if amount == 0 {
            return Ok(());
        }
        self.transact(&[(user_id, asset_id)], |w| {
            w.step(user_id, asset_id, StepKind::Internal, |b| b.unlock(amount))
        })
    }

    /// Settle one trade atomically:
    /// - buyer: locked quote -= quote_amount, available base += base_amount
    /// - seller: locked base -= base_amount, available quote += quote_amount - fee
    /// - fee account: available quote += fee
    pub fn settle(&self, s: &Settlement) -> Result<(), LedgerError> {
        let keys = [
            (s.buyer, s.quote_asset),
            (s.buyer, s.base_asset),
            (s.seller, s.base_asset),
            (s.seller, s.quote_asset),
            (self.fee_account, s.quote_asset),
        ];
        let fee_account = self.fee_account;
        self.transact(&keys, |w| {
            let proceeds = s.quote_amount.checked_sub(s.fee).ok_or(
                LedgerError::InternalInconsistency {
                    user_id: s.seller,
                    asset_id: s.quote_asset,
                    source: BalanceError::InsufficientAvailable {
                        available: s.quote_amount,
                        required: s.fee,
                    },
                },
            )?;
            w.step(s.buyer, s.quote_asset, StepKind::Internal, |b| {
                b.spend_frozen(s.quote_amount)
            })?;
            w.step(s.seller, s.base_asset, StepKind::Internal, |b| {
                b.spend_frozen(s.base_amount)
            })?;
            w.step(s.buyer, s.base_asset, StepKind::Internal, |b| {
                b.deposit(s.base_amount)
            })?;
            w.step(s.seller, s.quote_asset, StepKind::Internal, |b| {
                b.deposit(proceeds)
            })?;
            if s.fee > 0 {
                w.step(fee_account, s.quote_asset, StepKind::Internal, |b| {
                    b.deposit(s.fee)
                })?;
            }
            Ok(())
        })
    }

    /// Read-only `(available, locked)` snapshot; unknown slots are zero
    pub fn balance_of(&self, user_id: UserId, asset_id: AssetId) -> (u64, u64) {
        let Some(slot) = self.slots.get(&(user_id, asset_id)).map(|s| s.clone()) else {
            return (0, 0);
        };
        let b = Self::lock(&slot);
        (b.avail(), b.frozen())
    }

    /// Sum of `available + locked` for `asset` over every account
    pub fn totals(&self, asset_id: AssetId) -> u128 {
        self.records()
            .iter()
            .filter(|r| r.asset_id == asset_id)
            .map(|r| r.avail as u128 + r.frozen as u128)
            .sum()
    }

    /// All non-empty slots, sorted by `(user_id, asset_id)`
    pub fn records(&self) -> Vec<BalanceRecord> {
        let slots: Vec<(SlotKey, Arc<Mutex<Balance>>)> = self
            .slots
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        let mut records: Vec<BalanceRecord> = slots
            .into_iter()
            .map(|((user_id, asset_id), slot)| {
                let b = Self::lock(&slot);
                BalanceRecord {
                    user_id,
                    asset_id,
                    avail: b.avail(),
                    frozen: b.frozen(),
                }
            })
            // Failed operations may leave empty slots behind
            .filter(|r| r.avail > 0 || r.frozen > 0)
            .collect();
        records.sort_by_key(|r| (r.user_id, r.asset_id));
        records
    }

    /// Replace every slot with the given records
    pub fn restore(&self, records: &[BalanceRecord]) -> Result<(), LedgerError> {
        self.slots.clear();
        for r in records {
            let balance = Balance::from_parts(r.avail, r.frozen).map_err(|_| LedgerError::Overflow {
                user_id: r.user_id,
                asset_id: r.asset_id,
            })?;
            self.slots
                .insert((r.user_id, r.asset_id), Arc::new(Mutex::new(balance)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BTC: AssetId = 1;
    const USDT: AssetId = 2;

    fn settlement(buyer: UserId, seller: UserId, base: u64, quote: u64, fee: u64) -> Settlement {
        Settlement {
            buyer,
            seller,
            base_asset: BTC,
            quote_asset: USDT,
            base_amount: base,
            quote_amount: quote,
            fee,
        }
    }

    #[test]
    fn test_reserve_and_release() {
        let ledger = Ledger::default();
        ledger.deposit(1, USDT, 10_000).unwrap();
        ledger.reserve(1, USDT, 4_000).unwrap();
        assert_eq!(ledger.balance_of(1, USDT), (6_000, 4_000));

        ledger.release(1, USDT, 4_000).unwrap();
        assert_eq!(ledger.balance_of(1, USDT), (10_000, 0));
    }

    #[test]
    fn test_reserve_insufficient_has_no_effect() {
        let ledger = Ledger::default();
        ledger.deposit(1, USDT, 100).unwrap();
        assert_eq!(
            ledger.reserve(1, USDT, 101),
            Err(LedgerError::InsufficientFunds {
                user_id: 1,
                asset_id: USDT,
                available: 100,
                required: 101
            })
        );
        assert_eq!(ledger.balance_of(1, USDT), (100, 0));
        assert!(ledger.reserve(7, USDT, 1).is_err());
    }

    #[test]
    fn test_release_more_than_locked_is_internal() {
        let ledger = Ledger::default();
        ledger.deposit(1, USDT, 100).unwrap();
        ledger.reserve(1, USDT, 10).unwrap();
        let err = ledger.release(1, USDT, 11).unwrap_err();
        assert!(err.is_internal());
        assert_eq!(ledger.balance_of(1, USDT), (90, 10));
    }

    #[test]
    fn test_withdraw() {
        let ledger = Ledger::default();
        ledger.deposit(1, BTC, 50).unwrap();
        assert!(matches!(
            ledger.withdraw(1, BTC, 51),
            Err(LedgerError::InsufficientFunds { .. })
        ));
        ledger.withdraw(1, BTC, 20).unwrap();
        assert_eq!(ledger.balance_of(1, BTC), (30, 0));
    }

    #[test]
    fn test_settle_moves_both_legs_and_fee() {
        let ledger = Ledger::default();
        ledger.deposit(1, USDT, 10_000).unwrap();
        ledger.deposit(2, BTC, 100).unwrap();
        ledger.reserve(1, USDT, 4_000).unwrap();
        ledger.reserve(2, BTC, 10).unwrap();

        ledger.settle(&settlement(1, 2, 10, 4_000, 4)).unwrap();

        assert_eq!(ledger.balance_of(1, USDT), (6_000, 0));
        assert_eq!(ledger.balance_of(1, BTC), (10, 0));
        assert_eq!(ledger.balance_of(2, BTC), (90, 0));
        assert_eq!(ledger.balance_of(2, USDT), (3_996, 0));
        assert_eq!(ledger.balance_of(FEE_ACCOUNT_ID, USDT), (4, 0));
        assert_eq!(ledger.totals(USDT), 10_000);
        assert_eq!(ledger.totals(BTC), 100);
    }

    #[test]
    fn test_settle_self_trade() {
        let ledger = Ledger::default();
        ledger.deposit(1, USDT, 1_000).unwrap();
        ledger.deposit(1, BTC, 10).unwrap();
        ledger.reserve(1, USDT, 500).unwrap();
        ledger.reserve(1, BTC, 5).unwrap();

        ledger.settle(&settlement(1, 1, 5, 500, 1)).unwrap();

        assert_eq!(ledger.balance_of(1, USDT), (999, 0));
        assert_eq!(ledger.balance_of(1, BTC), (10, 0));
        assert_eq!(ledger.totals(USDT), 1_000);
    }

    #[test]
    fn test_settle_failure_is_atomic() {
        let ledger = Ledger::default();
        ledger.deposit(1, USDT, 1_000).unwrap();
        ledger.deposit(2, BTC, 10).unwrap();
        ledger.reserve(1, USDT, 500).unwrap();
        // seller never reserved
        let err = ledger.settle(&settlement(1, 2, 5, 500, 1)).unwrap_err();
        assert!(err.is_internal());

        assert_eq!(ledger.balance_of(1, USDT), (500, 500));
        assert_eq!(ledger.balance_of(1, BTC), (0, 0));
        assert_eq!(ledger.balance_of(2, BTC), (10, 0));
        assert_eq!(ledger.balance_of(FEE_ACCOUNT_ID, USDT), (0, 0));
    }

    #[test]
    fn test_records_and_restore() {
        let ledger = Ledger::default();
        ledger.deposit(2, BTC, 7).unwrap();
        ledger.deposit(1, USDT, 9).unwrap();
        ledger.reserve(1, USDT, 4).unwrap();

        let records = ledger.records();
        assert_eq!(records[0].user_id, 1);
        assert_eq!(records[1].user_id, 2);

        let restored = Ledger::default();
        restored.restore(&records).unwrap();
        assert_eq!(restored.balance_of(1, USDT), (5, 4));
        assert_eq!(restored.balance_of(2, BTC), (7, 0));
    }

    #[test]
    fn test_concurrent_settles_do_not_deadlock() {
        let ledger = Arc::new(Ledger::default());
        for user in [1, 2] {
            ledger.deposit(user, USDT, 1_000_000).unwrap();
            ledger.deposit(user, BTC, 1_000_000).unwrap();
        }

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    let (buyer, seller) = if i % 2 == 0 { (1, 2) } else { (2, 1) };
                    for _ in 0..500 {
                        ledger.reserve(buyer, USDT, 10).unwrap();
                        ledger.reserve(seller, BTC, 1).unwrap();
                        ledger.settle(&settlement(buyer, seller, 1, 10, 1)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(ledger.totals(USDT), 2_000_000);
        assert_eq!(ledger.totals(BTC), 2_000_000);
        assert_eq!(ledger.balance_of(FEE_ACCOUNT_ID, USDT), (2_000, 0));
    }
}
