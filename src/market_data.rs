//! Market data seams
//!
//! - [`ReferencePriceSource`]: external price hint used only to bound
//!   market-buy reservations, never to price a trade.
//! - [`DepthCache`]: last published depth per symbol, served to readers
//!   without touching the matching lock.

use crate::core_types::SymbolId;
use crate::orderbook::DepthSnapshot;
use dashmap::DashMap;
use std::sync::{PoisonError, RwLock};

/// Supplies a reference price (raw quote units per whole base unit)
pub trait ReferencePriceSource: Send + Sync {
    fn reference_price(&self, symbol_id: SymbolId) -> Option<u64>;
}

/// In-memory price feed, set by whoever ingests market data
#[derive(Debug, Default)]
pub struct StaticPriceFeed {
    prices: DashMap<SymbolId, u64>,
}

impl StaticPriceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, symbol_id: SymbolId, price: u64) {
        self.prices.insert(symbol_id, price);
    }

    pub fn clear_price(&self, symbol_id: SymbolId) {
        self.prices.remove(&symbol_id);
    }
}

impl ReferencePriceSource for StaticPriceFeed {
    fn reference_price(&self, symbol_id: SymbolId) -> Option<u64> {
        self.prices.get(&symbol_id).map(|p| *p)
    }
}

/// Current depth snapshot for one symbol
#[derive(Debug, Default)]
pub struct DepthCache {
    current: RwLock<DepthSnapshot>,
}

impl DepthCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot; stale updates (lower update_id) are ignored
    pub fn publish(&self, snapshot: DepthSnapshot) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if snapshot.update_id >= current.update_id {
            *current = snapshot;
        }
    }

    /// Replace the snapshot unconditionally (book rebuilt from a snapshot)
    pub fn reset(&self, snapshot: DepthSnapshot) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    /// Get current snapshot, limited to `limit` levels per side
    pub fn get_snapshot(&self, limit: usize) -> DepthSnapshot {
        let snapshot = self.current.read().unwrap_or_else(PoisonError::into_inner);
        DepthSnapshot {
            bids: snapshot.bids.iter().take(limit).copied().collect(),
            asks: snapshot.asks.iter().take(limit).copied().collect(),
            update_id: snapshot.update_id,
        }
    }
}
