//! Order Lifecycle Manager
//!
//! Owns order-state mutation: acceptance (validate + reserve), fill
//! bookkeeping, and cancellation. Orders are never deleted; terminal
//! orders stay in the store for history.
//!
//! # State machine
//! ```text
//! Open ──fill──> PartiallyFilled ──fill──> Filled
//!   │                  │
//!   └──cancel──────────┴──cancel──> Cancelled
//! ```

use crate::core_types::{OrderId, SeqNum, UserId};
use crate::error::{CancelError, InvalidReason, LedgerError, OrderStateError, SubmitError};
use crate::ledger::Ledger;
use crate::market_data::ReferencePriceSource;
use crate::models::{Order, OrderStatus, OrderType, Side};
use crate::money::{self, MoneyError};
use crate::orderbook::OrderBook;
use crate::symbol_manager::SymbolInfo;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// A caller's intent to trade, already scaled to raw units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub user_id: UserId,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub qty: u64,
    pub price: Option<u64>,
}

impl OrderRequest {
    pub fn limit(user_id: UserId, symbol: &str, side: Side, price: u64, qty: u64) -> Self {
        Self {
            user_id,
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            qty,
            price: Some(price),
        }
    }

    pub fn market(user_id: UserId, symbol: &str, side: Side, qty: u64) -> Self {
        Self {
            user_id,
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            qty,
            price: None,
        }
    }

    /// Shape checks that need no state
    pub fn validate(&self, fee_account: UserId) -> Result<(), InvalidReason> {
        if self.user_id == fee_account {
            return Err(InvalidReason::ReservedAccount);
        }
        if self.qty == 0 {
            return Err(InvalidReason::InvalidQuantity);
        }
        match (self.order_type, self.price) {
            (OrderType::Limit, Some(p)) if p > 0 => Ok(()),
            (OrderType::Limit, _) => Err(InvalidReason::InvalidPrice),
            (OrderType::Market, None) => Ok(()),
            (OrderType::Market, Some(_)) => Err(InvalidReason::UnexpectedPrice),
        }
    }
}

// ============================================================
// ORDER STORE
// ============================================================

/// Concurrent order table.
///
/// Readable from any thread; only mutated while the owning symbol's
/// lock is held.
#[derive(Debug, Default)]
pub struct OrderStore {
    orders: DashMap<OrderId, Order>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, order: Order) {
        self.orders.insert(order.order_id, order);
    }

    /// Cloned snapshot of one order
    pub fn get(&self, order_id: OrderId) -> Option<Order> {
        self.orders.get(&order_id).map(|o| o.clone())
    }

    /// Mutate one order in place
    pub fn update<R>(&self, order_id: OrderId, f: impl FnOnce(&mut Order) -> R) -> Option<R> {
        self.orders.get_mut(&order_id).map(|mut o| f(&mut o))
    }

    /// Non-terminal orders of `user_id`, oldest first
    pub fn open_orders(&self, user_id: UserId) -> Vec<Order> {
        let mut open: Vec<Order> = self
            .orders
            .iter()
            .filter(|o| o.user_id == user_id && !o.is_terminal())
            .map(|o| o.clone())
            .collect();
        open.sort_by_key(|o| o.seq);
        open
    }

    /// Every order, sorted by id
    pub fn all(&self) -> Vec<Order> {
        let mut all: Vec<Order> = self.orders.iter().map(|o| o.clone()).collect();
        all.sort_by_key(|o| o.order_id);
        all
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn clear(&self) {
        self.orders.clear();
    }
}

// ============================================================
// ACCEPTANCE
// ============================================================

/// Cap price for a market buy: best ask, else the reference price, raised
/// by the symbol's slippage band. `None` when there is nothing to anchor on.
pub fn protection_price(
    info: &SymbolInfo,
    book: &OrderBook,
    source: Option<&dyn ReferencePriceSource>,
) -> Result<Option<u64>, MoneyError> {
    let anchor = book
        .best_ask()
        .or_else(|| source.and_then(|s| s.reference_price(info.symbol_id)));
    anchor
        .map(|p| money::apply_bps_ceil(p, info.market_slippage_bps))
        .transpose()
}

/// Build and fund a new order.
///
/// Computes the worst-case reservation and locks it. On any failure
/// nothing has been mutated and no order exists. `ids` is only called once
/// the reservation succeeded, so rejected requests consume no id.
pub fn accept(
    ledger: &Ledger,
    info: &SymbolInfo,
    req: &OrderRequest,
    protection: Option<u64>,
    ids: impl FnOnce() -> (OrderId, SeqNum),
) -> Result<Order, SubmitError> {
    let lock_asset = match req.side {
        Side::Buy => info.quote_asset_id,
        Side::Sell => info.base_asset_id,
    };
    let mut order = Order {
        order_id: 0,
        user_id: req.user_id,
        symbol_id: info.symbol_id,
        side: req.side,
        order_type: req.order_type,
        price: req.price,
        protection_price: match (req.order_type, req.side) {
            (OrderType::Market, Side::Buy) => protection,
            _ => None,
        },
        qty: req.qty,
        filled_qty: 0,
        status: OrderStatus::Open,
        seq: 0,
        lock_asset,
        reserved: 0,
        created_at: chrono::Utc::now().timestamp_millis(),
    };

    if let Some(price) = order.crossing_price() {
        let notional = info
            .quote_amount(price, order.qty)
            .map_err(|_| SubmitError::InvalidOrder(InvalidReason::Overflow))?;
        if notional == 0 {
            return Err(SubmitError::InvalidOrder(InvalidReason::ZeroNotional));
        }
    }

    let required = order
        .cost_of(order.qty, info.qty_unit())
        .map_err(|_| SubmitError::InvalidOrder(InvalidReason::Overflow))?;
    if required > 0 {
        ledger
            .reserve(req.user_id, lock_asset, required)
            .map_err(|e| match e {
                LedgerError::InsufficientFunds {
                    available,
                    required,
                    ..
                } => SubmitError::InsufficientFunds {
                    available,
                    required,
                },
                other => SubmitError::Internal(other.to_string()),
            })?;
    }
    order.reserved = required;
    (order.order_id, order.seq) = ids();
    Ok(order)
}

// ============================================================
// FILL BOOKKEEPING
// ============================================================

/// Record a fill of `qty` that consumed `spent` of the order's reservation,
/// then release whatever the remainder no longer needs.
///
/// `reserved >= cost(remaining)` always holds because costs truncate, so the
/// released excess is never negative. Returns the amount released.
pub fn apply_fill(
    ledger: &Ledger,
    order: &mut Order,
    qty: u64,
    spent: u64,
    qty_unit: u64,
) -> Result<u64, FillError> {
    order.apply_fill(qty)?;
    order.reserved = order
        .reserved
        .checked_sub(spent)
        .ok_or(FillError::ReservationUnderflow {
            order_id: order.order_id,
            reserved: order.reserved,
            needed: spent,
        })?;

    let still_needed = order.cost_of(order.remaining_qty(), qty_unit)?;
    let excess = order
        .reserved
        .checked_sub(still_needed)
        .ok_or(FillError::ReservationUnderflow {
            order_id: order.order_id,
            reserved: order.reserved,
            needed: still_needed,
        })?;
    if excess > 0 {
        ledger.release(order.user_id, order.lock_asset, excess)?;
        order.reserved -= excess;
    }
    Ok(excess)
}

/// Fill bookkeeping failures (all internal)
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum FillError {
    #[error(transparent)]
    State(#[from] OrderStateError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Money(#[from] MoneyError),

    #[error("order {order_id}: reserved {reserved} < needed {needed}")]
    ReservationUnderflow {
        order_id: OrderId,
        reserved: u64,
        needed: u64,
    },
}

/// Terminate an order that will never trade again, releasing its reservation
pub fn close_remainder(ledger: &Ledger, order: &mut Order) -> Result<(), FillError> {
    if order.reserved > 0 {
        ledger.release(order.user_id, order.lock_asset, order.reserved)?;
        order.reserved = 0;
    }
    if !order.is_terminal() {
        order.cancel()?;
    }
    Ok(())
}

// ============================================================
// CANCELLATION
// ============================================================

/// Cancel a resting order on behalf of `user_id`.
///
/// Must be called with the owning symbol's lock held (`book` borrowed from
/// it). Checks run before any mutation, so every rejection is side-effect
/// free.
pub fn cancel(
    ledger: &Ledger,
    store: &OrderStore,
    book: &mut OrderBook,
    order_id: OrderId,
    user_id: UserId,
) -> Result<Order, CancelError> {
    let mut order = store.get(order_id).ok_or(CancelError::NotFound(order_id))?;
    if order.user_id != user_id {
        return Err(CancelError::Forbidden(order_id));
    }
    if order.is_terminal() {
        return Err(CancelError::AlreadyTerminal {
            order_id,
            status: order.status,
        });
    }

    let released = order.reserved;
    close_remainder(ledger, &mut order).map_err(|e| {
        error!(order_id, error = %e, "cancel failed to release reservation");
        CancelError::Internal(e.to_string())
    })?;
    book.remove(order_id);
    store.insert(order.clone());

    info!(
        order_id,
        user_id,
        filled = order.filled_qty,
        unfilled = order.remaining_qty(),
        released,
        "order cancelled"
    );
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fee::FeeSchedule;
    use crate::market_data::StaticPriceFeed;

    const BTC: u32 = 1;
    const USDT: u32 = 2;

    fn info() -> SymbolInfo {
        SymbolInfo {
            symbol: "BTC_USDT".to_string(),
            symbol_id: 0,
            base_asset_id: BTC,
            quote_asset_id: USDT,
            base_decimals: 8,
            quote_decimals: 6,
            fees: FeeSchedule::default(),
            market_slippage_bps: 500,
        }
    }

    #[test]
    fn test_validate() {
        let ok = OrderRequest::limit(1, "BTC_USDT", Side::Buy, 100, 10);
        assert_eq!(ok.validate(0), Ok(()));
        assert_eq!(
            OrderRequest::limit(1, "BTC_USDT", Side::Buy, 100, 0).validate(0),
            Err(InvalidReason::InvalidQuantity)
        );
        assert_eq!(
            OrderRequest::limit(1, "BTC_USDT", Side::Buy, 0, 10).validate(0),
            Err(InvalidReason::InvalidPrice)
        );
        let mut market = OrderRequest::market(1, "BTC_USDT", Side::Sell, 10);
        assert_eq!(market.validate(0), Ok(()));
        market.price = Some(5);
        assert_eq!(market.validate(0), Err(InvalidReason::UnexpectedPrice));
        assert_eq!(
            OrderRequest::market(0, "BTC_USDT", Side::Sell, 10).validate(0),
            Err(InvalidReason::ReservedAccount)
        );
    }

    #[test]
    fn test_accept_reserves_worst_case() {
        let ledger = Ledger::default();
        ledger.deposit(1, USDT, 10_000_000_000).unwrap();
        let req = OrderRequest::limit(1, "BTC_USDT", Side::Buy, 40_000_000_000, 10_000_000);

        let order = accept(&ledger, &info(), &req, None, || (7, 1)).unwrap();
        assert_eq!(order.reserved, 4_000_000_000);
        assert_eq!(order.lock_asset, USDT);
        assert_eq!(ledger.balance_of(1, USDT), (6_000_000_000, 4_000_000_000));
    }

    #[test]
    fn test_accept_insufficient_leaves_nothing() {
        let ledger = Ledger::default();
        ledger.deposit(1, USDT, 20_000_000_000).unwrap();
        let req = OrderRequest::limit(1, "BTC_USDT", Side::Buy, 40_000_000_000, 100_000_000);

        let err = accept(&ledger, &info(), &req, None, || (7, 1)).unwrap_err();
        assert_eq!(
            err,
            SubmitError::InsufficientFunds {
                available: 20_000_000_000,
                required: 40_000_000_000
            }
        );
        assert_eq!(ledger.balance_of(1, USDT), (20_000_000_000, 0));
    }

    #[test]
    fn test_accept_rejects_zero_notional() {
        let ledger = Ledger::default();
        ledger.deposit(1, USDT, 1_000_000).unwrap();
        ledger.deposit(1, BTC, 1_000).unwrap();
        // 999 raw * 100_000 sat / 10^8 = 0.999 -> 0
        for side in [Side::Buy, Side::Sell] {
            let req = OrderRequest::limit(1, "BTC_USDT", side, 999, 100_000);
            let err = accept(&ledger, &info(), &req, None, || panic!("no id for rejects")).unwrap_err();
            assert_eq!(err, SubmitError::InvalidOrder(InvalidReason::ZeroNotional));
        }
        assert_eq!(ledger.balance_of(1, USDT), (1_000_000, 0));
        assert_eq!(ledger.balance_of(1, BTC), (1_000, 0));

        // one quote unit is enough
        let req = OrderRequest::limit(1, "BTC_USDT", Side::Buy, 1_000, 100_000);
        assert_eq!(accept(&ledger, &info(), &req, None, || (1, 1)).unwrap().reserved, 1);
    }

    #[test]
    fn test_protection_price_prefers_best_ask() {
        let info = info();
        let feed = StaticPriceFeed::new();
        feed.set_price(0, 1_000);
        let mut book = OrderBook::new();

        assert_eq!(protection_price(&info, &book, None), Ok(None));
        assert_eq!(protection_price(&info, &book, Some(&feed)), Ok(Some(1_050)));

        let ask = Order {
            order_id: 1,
            user_id: 2,
            symbol_id: 0,
            side: Side::Sell,
            order_type: OrderType::Limit,
            price: Some(2_000),
            protection_price: None,
            qty: 1,
            filled_qty: 0,
            status: OrderStatus::Open,
            seq: 1,
            lock_asset: BTC,
            reserved: 1,
            created_at: 0,
        };
        book.insert(&ask).unwrap();
        assert_eq!(protection_price(&info, &book, Some(&feed)), Ok(Some(2_100)));
    }

    #[test]
    fn test_apply_fill_releases_price_improvement() {
        let ledger = Ledger::default();
        ledger.deposit(1, USDT, 1_000_000).unwrap();
        let info = info();
        // Buy 1 BTC @ 500_000 raw, fills 0.5 BTC at 400_000
        let req = OrderRequest::limit(1, "BTC_USDT", Side::Buy, 500_000, 100_000_000);
        let mut order = accept(&ledger, &info, &req, None, || (1, 1)).unwrap();
        assert_eq!(order.reserved, 500_000);

        // settlement would spend 200_000 from locked
        let released = apply_fill(&ledger, &mut order, 50_000_000, 200_000, info.qty_unit());
        // ledger still has 500_000 locked since settle was not called here
        assert_eq!(released, Ok(50_000));
        assert_eq!(order.reserved, 250_000);
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(ledger.balance_of(1, USDT), (550_000, 450_000));
    }

    #[test]
    fn test_store_open_orders() {
        let store = OrderStore::new();
        let ledger = Ledger::default();
        ledger.deposit(1, BTC, 100).unwrap();
        let info = info();
        for (id, seq) in [(5, 2), (3, 1)] {
            let req = OrderRequest::limit(1, "BTC_USDT", Side::Sell, 40_000_000_000, 10);
            store.insert(accept(&ledger, &info, &req, None, || (id, seq)).unwrap());
        }
        store.update(5, |o| o.cancel()).unwrap().unwrap();

        let open = store.open_orders(1);
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].order_id, 3);
        assert_eq!(store.all().iter().map(|o| o.order_id).collect::<Vec<_>>(), vec![3, 5]);
        assert!(store.open_orders(2).is_empty());
    }
}
