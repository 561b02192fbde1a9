// models.rs - Core order and trade types

use crate::core_types::{AssetId, OrderId, SeqNum, SymbolId, TradeId, UserId};
use crate::error::OrderStateError;
use crate::money::{self, MoneyError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Order side: Buy or Sell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[inline]
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(format!("invalid side: {other}")),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,  // Limit order: must specify price
    Market, // Market order: execute against the book, never rests
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "limit",
            OrderType::Market => "market",
        }
    }
}

impl FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "limit" => Ok(OrderType::Limit),
            "market" => Ok(OrderType::Market),
            other => Err(format!("invalid order type: {other}")),
        }
    }
}

/// Order status
///
/// `Filled` and `Cancelled` are terminal; no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,            // Accepted, nothing filled yet
    PartiallyFilled, // Some quantity filled, rest in orderbook
    Filled,          // Fully filled
    Cancelled,       // Cancelled by user, or unfilled market remainder
}

impl OrderStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

// ============================================================
// ORDER
// ============================================================

/// An order as tracked by the lifecycle manager.
///
/// price and qty are raw u64 (already scaled at the boundary).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub symbol_id: SymbolId,
    pub side: Side,
    pub order_type: OrderType,
    /// Limit price; present iff `order_type == Limit`
    pub price: Option<u64>,
    /// Market buy cap: asks above it are never crossed
    pub protection_price: Option<u64>,
    pub qty: u64,
    pub filled_qty: u64,
    pub status: OrderStatus,
    /// Price-time priority tie-break
    pub seq: SeqNum,
    /// Asset held in `reserved` (quote for buys, base for sells)
    pub lock_asset: AssetId,
    /// Amount of `lock_asset` still locked on behalf of this order
    pub reserved: u64,
    /// Wall clock at acceptance (ms since epoch), informational only
    pub created_at: i64,
}

impl Order {
    /// Remaining quantity to fill
    #[inline]
    pub fn remaining_qty(&self) -> u64 {
        self.qty - self.filled_qty
    }

    /// Check if order is fully filled
    #[inline]
    pub fn is_filled(&self) -> bool {
        self.filled_qty >= self.qty
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Worst price this order accepts, `None` = any price (market sell)
    #[inline]
    pub fn crossing_price(&self) -> Option<u64> {
        match self.order_type {
            OrderType::Limit => self.price,
            OrderType::Market => self.protection_price,
        }
    }

    /// Amount of `lock_asset` needed to cover `qty` at the crossing price.
    ///
    /// # Formula
    /// - Buy: `crossing_price × qty / qty_unit` = quote amount
    /// - Sell: `qty` = base amount
    ///
    /// A buy without a crossing price (market buy with no reference) needs nothing.
    pub fn cost_of(&self, qty: u64, qty_unit: u64) -> Result<u64, MoneyError> {
        match self.side {
            Side::Buy => match self.crossing_price() {
                Some(price) => money::quote_amount(price, qty, qty_unit),
                None => Ok(0),
            },
            Side::Sell => Ok(qty),
        }
    }

    /// Record a fill, deriving the status from `filled` vs `qty`
    pub fn apply_fill(&mut self, fill: u64) -> Result<(), OrderStateError> {
        if self.is_terminal() {
            return Err(OrderStateError::Terminal {
                order_id: self.order_id,
                status: self.status,
            });
        }
        if fill == 0 || fill > self.remaining_qty() {
            return Err(OrderStateError::Overfill {
                order_id: self.order_id,
                fill,
                remaining: self.remaining_qty(),
            });
        }
        self.filled_qty += fill;
        self.status = if self.is_filled() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        Ok(())
    }

    /// Move to `Cancelled`; fails if already terminal
    pub fn cancel(&mut self) -> Result<(), OrderStateError> {
        if self.is_terminal() {
            return Err(OrderStateError::Terminal {
                order_id: self.order_id,
                status: self.status,
            });
        }
        self.status = OrderStatus::Cancelled;
        Ok(())
    }
}

// ============================================================
// TRADE
// ============================================================

/// A trade that occurred when orders matched. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: TradeId,
    pub symbol_id: SymbolId,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buyer_user_id: UserId,
    pub seller_user_id: UserId,
    /// Maker (resting) price
    pub price: u64,
    pub qty: u64,
    /// Quote value, computed once for both settlement legs
    pub quote_qty: u64,
    /// Quote-asset fee taken from the seller
    pub fee: u64,
    pub taker_side: Side,
    /// Per-symbol match sequence
    pub sequence: SeqNum,
    pub timestamp: i64,
}

// ============================================================
// ORDER RESULT
// ============================================================

/// Final order state plus the trades it produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderResult {
    pub order: Order,
    pub trades: Vec<Trade>,
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    const QTY_UNIT: u64 = 100_000_000; // 10^8 for BTC

    fn limit(side: Side, price: u64, qty: u64) -> Order {
        Order {
            order_id: 1,
            user_id: 1,
            symbol_id: 0,
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            protection_price: None,
            qty,
            filled_qty: 0,
            status: OrderStatus::Open,
            seq: 1,
            lock_asset: if side == Side::Buy { 2 } else { 1 },
            reserved: 0,
            created_at: 0,
        }
    }

    #[test]
    fn test_buy_cost_0_1_btc_at_40000_usdt() {
        let order = limit(Side::Buy, 40_000_000_000, 10_000_000);
        assert_eq!(order.cost_of(order.qty, QTY_UNIT), Ok(4_000_000_000));
    }

    #[test]
    fn test_sell_cost_ignores_price() {
        let a = limit(Side::Sell, 10_000_000_000, 100_000_000);
        let b = limit(Side::Sell, 100_000_000_000, 100_000_000);
        assert_eq!(a.cost_of(a.qty, QTY_UNIT), Ok(100_000_000));
        assert_eq!(b.cost_of(b.qty, QTY_UNIT), Ok(100_000_000));
    }

    #[test]
    fn test_market_buy_without_cap_costs_nothing() {
        let mut order = limit(Side::Buy, 1, 10);
        order.order_type = OrderType::Market;
        order.price = None;
        assert_eq!(order.crossing_price(), None);
        assert_eq!(order.cost_of(10, QTY_UNIT), Ok(0));

        order.protection_price = Some(200_000_000);
        assert_eq!(order.cost_of(50_000_000, QTY_UNIT), Ok(100_000_000));
    }

    #[test]
    fn test_fill_transitions() {
        let mut order = limit(Side::Buy, 100, 10);
        order.apply_fill(4).unwrap();
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.remaining_qty(), 6);

        order.apply_fill(6).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);

        assert_eq!(
            order.apply_fill(1),
            Err(OrderStateError::Terminal {
                order_id: 1,
                status: OrderStatus::Filled
            })
        );
        assert!(order.cancel().is_err());
        assert_eq!(order.status, OrderStatus::Filled);
    }

    #[test]
    fn test_overfill_rejected() {
        let mut order = limit(Side::Sell, 100, 10);
        assert!(matches!(
            order.apply_fill(11),
            Err(OrderStateError::Overfill { remaining: 10, .. })
        ));
        assert!(order.apply_fill(0).is_err());
        assert_eq!(order.filled_qty, 0);
        assert_eq!(order.status, OrderStatus::Open);
    }

    #[test]
    fn test_cancel_is_terminal() {
        let mut order = limit(Side::Sell, 100, 10);
        order.apply_fill(3).unwrap();
        order.cancel().unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert!(order.cancel().is_err());
        assert!(order.apply_fill(1).is_err());
    }

    #[test]
    fn test_parse_side_and_type() {
        assert_eq!("BUY".parse::<Side>(), Ok(Side::Buy));
        assert_eq!(" sell ".parse::<Side>(), Ok(Side::Sell));
        assert!("hold".parse::<Side>().is_err());
        assert_eq!("limit".parse::<OrderType>(), Ok(OrderType::Limit));
        assert_eq!("Market".parse::<OrderType>(), Ok(OrderType::Market));
        assert_eq!(Side::Buy.opposite(), Side::Sell);
    }
}
