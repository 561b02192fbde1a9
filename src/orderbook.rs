//! OrderBook - BTreeMap-based price-time priority order book
//!
//! This module contains only the OrderBook data structure.
//! The matching logic lives in the Engine module.

use crate::core_types::{OrderId, SeqNum, UserId};
use crate::models::{Order, OrderType, Side};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BookError {
    #[error("order {0} cannot rest (not an open limit order)")]
    NotRestable(OrderId),

    #[error("order {0} already in book")]
    Duplicate(OrderId),

    #[error("order {0} not in book")]
    NotFound(OrderId),

    #[error("order {order_id}: reduce {qty} exceeds remaining {remaining}")]
    Underflow {
        order_id: OrderId,
        qty: u64,
        remaining: u64,
    },
}

/// A resting order as the book sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookEntry {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub side: Side,
    pub price: u64,
    pub seq: SeqNum,
    pub remaining: u64,
}

/// Orders at one price, keyed by sequence number (FIFO)
type Level = BTreeMap<SeqNum, BookEntry>;

/// The OrderBook using BTreeMap for O(log n) operations
///
/// # Key Design:
/// - Asks are stored with normal keys (ascending order, lowest price = best ask)
/// - Bids use negated keys `u64::MAX - price` (so highest price comes first = best bid)
/// - Each level is itself ordered by sequence, so removal by id never scans
///
/// # Complexity:
/// | Operation | Time |
/// |-----------|------|
/// | Insert | O(log n) |
/// | Best price | O(log n) |
/// | Remove by ID | O(1) lookup + O(log n) removal |
#[derive(Debug, Default)]
pub struct OrderBook {
    /// Sell orders: price -> orders (ascending, lowest = best)
    asks: BTreeMap<u64, Level>,
    /// Buy orders: (MAX - price) -> orders (so highest price first)
    bids: BTreeMap<u64, Level>,
    /// Order index: OrderId -> (Side, Price, Seq)
    order_index: FxHashMap<OrderId, (Side, u64, SeqNum)>,
    /// Bumped on every mutation
    update_id: u64,
}

#[inline]
fn bid_key(price: u64) -> u64 {
    u64::MAX - price
}

impl OrderBook {
    /// Create a new empty order book
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the best bid price (highest buy price)
    #[inline]
    pub fn best_bid(&self) -> Option<u64> {
        self.bids.first_key_value().map(|(k, _)| u64::MAX - k)
    }

    /// Get the best ask price (lowest sell price)
    #[inline]
    pub fn best_ask(&self) -> Option<u64> {
        self.asks.first_key_value().map(|(k, _)| *k)
    }

    /// Get the spread (difference between best ask and best bid)
    pub fn spread(&self) -> Option<u64> {
        match (self.best_ask(), self.best_bid()) {
            (Some(ask), Some(bid)) if ask > bid => Some(ask - bid),
            _ => None,
        }
    }

    /// Number of resting orders
    #[inline]
    pub fn len(&self) -> usize {
        self.order_index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order_index.is_empty()
    }

    #[inline]
    pub fn contains(&self, order_id: OrderId) -> bool {
        self.order_index.contains_key(&order_id)
    }

    /// Get number of price levels on each side (bid_levels, ask_levels)
    #[inline]
    pub fn level_count(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }

    fn side_mut(&mut self, side: Side, price: u64) -> (&mut BTreeMap<u64, Level>, u64) {
        match side {
            Side::Buy => (&mut self.bids, bid_key(price)),
            Side::Sell => (&mut self.asks, price),
        }
    }

    /// Rest an open limit order in the book.
    ///
    /// The caller owns the order's status; this only stores its remainder.
    pub fn insert(&mut self, order: &Order) -> Result<(), BookError> {
        let price = match (order.order_type, order.price) {
            (OrderType::Limit, Some(price)) if !order.is_terminal() && !order.is_filled() => price,
            _ => return Err(BookError::NotRestable(order.order_id)),
        };
        if self.order_index.contains_key(&order.order_id) {
            return Err(BookError::Duplicate(order.order_id));
        }

        let entry = BookEntry {
            order_id: order.order_id,
            user_id: order.user_id,
            side: order.side,
            price,
            seq: order.seq,
            remaining: order.remaining_qty(),
        };
        self.order_index
            .insert(order.order_id, (order.side, price, order.seq));
        let (tree, key) = self.side_mut(order.side, price);
        tree.entry(key).or_default().insert(order.seq, entry);
        self.update_id += 1;
        Ok(())
    }

    /// Remove a resting order by id
    pub fn remove(&mut self, order_id: OrderId) -> Option<BookEntry> {
        let (side, price, seq) = self.order_index.remove(&order_id)?;
        let (tree, key) = self.side_mut(side, price);
        let level = tree.get_mut(&key)?;
        let entry = level.remove(&seq);
        // Clean up empty price level
        if level.is_empty() {
            tree.remove(&key);
        }
        self.update_id += 1;
        entry
    }

    /// Decrement a resting order's remaining quantity, removing it at zero.
    ///
    /// Returns what is left.
    pub fn reduce(&mut self, order_id: OrderId, qty: u64) -> Result<u64, BookError> {
        let (side, price, seq) = *self
            .order_index
            .get(&order_id)
            .ok_or(BookError::NotFound(order_id))?;
        let (tree, key) = self.side_mut(side, price);
        let entry = tree
            .get_mut(&key)
            .and_then(|level| level.get_mut(&seq))
            .ok_or(BookError::NotFound(order_id))?;
        if qty > entry.remaining {
            return Err(BookError::Underflow {
                order_id,
                qty,
                remaining: entry.remaining,
            });
        }
        entry.remaining -= qty;
        let left = entry.remaining;
        if left == 0 {
            self.remove(order_id);
        } else {
            self.update_id += 1;
        }
        Ok(left)
    }

    /// Resting orders on the side opposite `taker` that cross `limit`,
    /// most aggressive price first, earliest sequence first within a price.
    ///
    /// `limit = None` crosses every resting order (market sell). Each call
    /// starts again from the current top of book.
    pub fn iterate_crossable(
        &self,
        taker: Side,
        limit: Option<u64>,
    ) -> Box<dyn Iterator<Item = &BookEntry> + '_> {
        match taker {
            Side::Buy => Box::new(
                self.asks
                    .iter()
                    .take_while(move |(price, _)| limit.is_none_or(|l| **price <= l))
                    .flat_map(|(_, level)| level.values()),
            ),
            Side::Sell => Box::new(
                self.bids
                    .iter()
                    .take_while(move |(key, _)| limit.is_none_or(|l| u64::MAX - **key >= l))
                    .flat_map(|(_, level)| level.values()),
            ),
        }
    }

    /// Get market depth snapshot
    ///
    /// Returns top N price levels for bids and asks with aggregated quantities.
    /// Bids are sorted descending (highest price first), asks ascending (lowest price first).
    pub fn depth(&self, limit: usize) -> DepthSnapshot {
        let level_qty = |level: &Level| level.values().map(|e| e.remaining).sum::<u64>();
        let bids = self
            .bids
            .iter()
            .take(limit)
            .map(|(&key, level)| (u64::MAX - key, level_qty(level)))
            .collect();
        let asks = self
            .asks
            .iter()
            .take(limit)
            .map(|(&price, level)| (price, level_qty(level)))
            .collect();

        DepthSnapshot {
            bids,
            asks,
            update_id: self.update_id,
        }
    }
}

/// Market depth snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub bids: Vec<(u64, u64)>, // (price, total_qty)
    pub asks: Vec<(u64, u64)>,
    pub update_id: u64,
}
