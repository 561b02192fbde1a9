//! Matching Engine - crosses an incoming order against the book
//!
//! The engine handles:
//! 1. Matching incoming orders against the opposite side
//! 2. Settling every match through the Ledger
//! 3. Updating both orders' fills and releasing unneeded reservations
//! 4. Resting, or cancelling, the remainder
//!
//! It runs with the symbol's [`Market`] exclusively borrowed, so each match
//! is one atomic unit with respect to other submits and cancels on the same
//! symbol. Balance atomicity comes from the Ledger's own slot locks.

use crate::core_types::{OrderId, SeqNum, TradeId};
use crate::ledger::{Ledger, Settlement};
use crate::models::{Order, OrderResult, OrderType, Side, Trade};
use crate::money::MoneyError;
use crate::order_manager::{self, FillError, OrderStore};
use crate::orderbook::{BookEntry, BookError, OrderBook};
use crate::symbol_manager::SymbolInfo;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;

/// Anything that goes wrong mid-match is a bookkeeping bug
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("fill failed: {0}")]
    Fill(#[from] FillError),

    #[error("book inconsistent: {0}")]
    Book(#[from] BookError),

    #[error("trade value: {0}")]
    Money(#[from] MoneyError),

    #[error("ledger: {0}")]
    Ledger(#[from] crate::error::LedgerError),

    #[error("resting order {0} missing from store")]
    MissingOrder(OrderId),
}

/// Per-symbol matching state, guarded by one mutex in the exchange
#[derive(Debug)]
pub struct Market {
    pub info: SymbolInfo,
    pub book: OrderBook,
    /// Per-symbol match sequence (last assigned)
    pub match_seq: SeqNum,
    /// Set once an internal inconsistency is detected
    pub halted: bool,
}

impl Market {
    pub fn new(info: SymbolInfo) -> Self {
        Self {
            info,
            book: OrderBook::new(),
            match_seq: 0,
            halted: false,
        }
    }
}

/// Shared collaborators the engine writes through
pub struct MatchContext<'a> {
    pub ledger: &'a Ledger,
    pub orders: &'a OrderStore,
    pub trade_ids: &'a AtomicU64,
}

impl MatchContext<'_> {
    #[inline]
    fn next_trade_id(&self) -> TradeId {
        self.trade_ids.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Matching Engine that processes orders and generates trades
pub struct MatchingEngine;

impl MatchingEngine {
    /// Process an accepted (already funded) order and return its final state
    ///
    /// # Flow:
    /// 1. Cross against the opposite side, maker price, one fill at a time
    /// 2. Limit remainder rests in the book
    /// 3. Market remainder is cancelled and its reservation released
    ///
    /// The order is written to the store before matching and after every
    /// state change, so readers never see an order the engine lost track of.
    pub fn process_order(
        ctx: &MatchContext<'_>,
        market: &mut Market,
        mut order: Order,
    ) -> Result<OrderResult, EngineError> {
        ctx.orders.insert(order.clone());
        let mut trades = Vec::new();

        // A buy with no crossing price is a market buy with nothing to anchor on
        let can_cross = order.side == Side::Sell || order.crossing_price().is_some();
        if can_cross {
            while !order.is_filled() {
                let Some(maker) = market
                    .book
                    .iterate_crossable(order.side, order.crossing_price())
                    .next()
                    .copied()
                else {
                    break;
                };
                let trade = Self::execute(ctx, market, &mut order, &maker)?;
                trades.push(trade);
            }
        }

        if !order.is_filled() && order.order_type == OrderType::Limit {
            market.book.insert(&order)?;
        } else {
            // Filled: drop truncation residue. Market: cancel the remainder.
            order_manager::close_remainder(ctx.ledger, &mut order)?;
        }
        ctx.orders.insert(order.clone());

        Ok(OrderResult { order, trades })
    }

    /// One match: settle, update both orders, release over-reservation
    fn execute(
        ctx: &MatchContext<'_>,
        market: &mut Market,
        taker: &mut Order,
        maker: &BookEntry,
    ) -> Result<Trade, EngineError> {
        let info = &market.info;
        let qty_unit = info.qty_unit();
        let trade_qty = taker.remaining_qty().min(maker.remaining);
        let trade_price = maker.price; // Maker price
        let quote_qty = info.quote_amount(trade_price, trade_qty)?;

        let (buyer, seller) = match taker.side {
            Side::Buy => (taker.user_id, maker.user_id),
            Side::Sell => (maker.user_id, taker.user_id),
        };
        let fee = info.fees.seller_fee(quote_qty, taker.side == Side::Sell);

        ctx.ledger.settle(&Settlement {
            buyer,
            seller,
            base_asset: info.base_asset_id,
            quote_asset: info.quote_asset_id,
            base_amount: trade_qty,
            quote_amount: quote_qty,
            fee,
        })?;

        let spent = |side: Side| match side {
            Side::Buy => quote_qty,
            Side::Sell => trade_qty,
        };
        order_manager::apply_fill(ctx.ledger, taker, trade_qty, spent(taker.side), qty_unit)?;
        ctx.orders
            .update(maker.order_id, |o| {
                order_manager::apply_fill(ctx.ledger, o, trade_qty, spent(maker.side), qty_unit)
            })
            .ok_or(EngineError::MissingOrder(maker.order_id))??;
        market.book.reduce(maker.order_id, trade_qty)?;
        market.match_seq += 1;

        let (buy_order_id, sell_order_id) = match taker.side {
            Side::Buy => (taker.order_id, maker.order_id),
            Side::Sell => (maker.order_id, taker.order_id),
        };
        let trade = Trade {
            trade_id: ctx.next_trade_id(),
            symbol_id: info.symbol_id,
            buy_order_id,
            sell_order_id,
            buyer_user_id: buyer,
            seller_user_id: seller,
            price: trade_price,
            qty: trade_qty,
            quote_qty,
            fee,
            taker_side: taker.side,
            sequence: market.match_seq,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        debug!(
            trade_id = trade.trade_id,
            symbol = %info.symbol,
            buy_order_id,
            sell_order_id,
            price = trade_price,
            qty = trade_qty,
            fee,
            "trade"
        );
        Ok(trade)
    }
}
