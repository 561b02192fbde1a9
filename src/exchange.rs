//! Exchange - the public entry point
//!
//! Wires the Ledger, per-symbol markets, the order store and the optional
//! WAL together. Every operation is safe to call from many threads:
//!
//! - submits and cancels on one symbol serialize on that symbol's mutex
//! - different symbols proceed in parallel, sharing only the Ledger, unless
//!   a journal is attached, in which case state changes serialize on it
//! - deposits and withdrawals never touch a symbol lock
//!
//! Lock order is always: symbol mutexes (ascending symbol id), then the
//! journal mutex, then Ledger slots. With a journal attached, every ledger
//! mutation happens under the journal mutex and is appended before it is
//! released, so the journal order is the ledger-mutation order.

use crate::core_types::{AssetId, FEE_ACCOUNT_ID, OrderId, SeqNum, SymbolId, TradeId, UserId};
use crate::engine::{Market, MatchContext, MatchingEngine};
use crate::error::{
    CancelError, FundingError, InvalidReason, ReplayError, RestoreError, SubmitError,
};
use crate::ledger::Ledger;
use crate::market_data::{DepthCache, ReferencePriceSource};
use crate::models::{Order, OrderResult, OrderStatus, OrderType, Side, Trade};
use crate::order_manager::{self, OrderRequest, OrderStore};
use crate::orderbook::{DepthSnapshot, OrderBook};
use crate::snapshot::{ExchangeSnapshot, MarketState};
use crate::symbol_manager::SymbolManager;
use crate::wal::{WalCommand, WalWriter};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{error, info, warn};

/// Default number of depth levels kept in the published snapshot
pub const DEFAULT_DEPTH_LEVELS: usize = 100;

/// Engine-wide knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub fee_account_id: UserId,
    /// Levels per side kept in each symbol's depth cache
    pub depth_levels: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            fee_account_id: FEE_ACCOUNT_ID,
            depth_levels: DEFAULT_DEPTH_LEVELS,
        }
    }
}

/// Trade query selector
#[derive(Debug, Clone, Copy)]
pub enum TradeFilter<'a> {
    Symbol(&'a str),
    User(UserId),
}

/// (available, locked) view of one balance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceView {
    pub available: u64,
    pub locked: u64,
}

/// Identity of a journaled order, reused verbatim on replay
#[derive(Debug, Clone, Copy)]
struct Pinned {
    order_id: OrderId,
    seq: SeqNum,
    protection_price: Option<u64>,
}

/// Everything owned by one symbol
struct SymbolSlot {
    market: Mutex<Market>,
    depth: DepthCache,
    trades: RwLock<Vec<Trade>>,
}

pub struct Exchange {
    symbols: SymbolManager,
    slots: FxHashMap<SymbolId, SymbolSlot>,
    ledger: Ledger,
    orders: OrderStore,
    last_order_id: AtomicU64,
    last_trade_id: AtomicU64,
    last_seq: AtomicU64,
    price_source: Option<Arc<dyn ReferencePriceSource>>,
    settings: EngineSettings,
    journal: Mutex<Option<WalWriter>>,
    /// Set once a journal is attached
    journaled: bool,
}

type JournalGuard<'a> = MutexGuard<'a, Option<WalWriter>>;

#[inline]
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Exchange {
    pub fn new(symbols: SymbolManager, settings: EngineSettings) -> Self {
        let slots = symbols
            .iter_symbols()
            .map(|info| {
                (
                    info.symbol_id,
                    SymbolSlot {
                        market: Mutex::new(Market::new(info.clone())),
                        depth: DepthCache::new(),
                        trades: RwLock::new(Vec::new()),
                    },
                )
            })
            .collect();
        info!(
            symbols = symbols.symbol_count(),
            fee_account = settings.fee_account_id,
            depth_levels = settings.depth_levels,
            "exchange initialized"
        );
        Self {
            symbols,
            slots,
            ledger: Ledger::new(settings.fee_account_id),
            orders: OrderStore::new(),
            last_order_id: AtomicU64::new(0),
            last_trade_id: AtomicU64::new(0),
            last_seq: AtomicU64::new(0),
            price_source: None,
            settings,
            journal: Mutex::new(None),
            journaled: false,
        }
    }

    /// Attach a reference price feed for market buys on an empty ask side
    pub fn with_price_source(mut self, source: Arc<dyn ReferencePriceSource>) -> Self {
        self.price_source = Some(source);
        self
    }

    /// Journal every state-changing command to `writer` from now on
    pub fn with_journal(mut self, writer: WalWriter) -> Self {
        *lock(&self.journal) = Some(writer);
        self.journaled = true;
        self
    }

    pub fn symbols(&self) -> &SymbolManager {
        &self.symbols
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // ============================================================
    // ORDERS
    // ============================================================

    /// Submit a new order. `price` is required for limit orders and must be
    /// absent for market orders.
    pub fn submit_order(
        &self,
        user_id: UserId,
        symbol: &str,
        side: Side,
        order_type: OrderType,
        qty: u64,
        price: Option<u64>,
    ) -> Result<OrderResult, SubmitError> {
        self.submit(OrderRequest {
            user_id,
            symbol: symbol.to_string(),
            side,
            order_type,
            qty,
            price,
        })
    }

    pub fn submit(&self, req: OrderRequest) -> Result<OrderResult, SubmitError> {
        self.submit_inner(req, None)
    }

    /// `pinned` carries the journaled identity of the order on replay
    fn submit_inner(
        &self,
        req: OrderRequest,
        pinned: Option<Pinned>,
    ) -> Result<OrderResult, SubmitError> {
        let info = self
            .symbols
            .get_symbol_info(&req.symbol)
            .ok_or_else(|| SubmitError::UnknownSymbol(req.symbol.clone()))?;
        if let Err(reason) = req.validate(self.settings.fee_account_id) {
            warn!(user_id = req.user_id, symbol = %req.symbol, %reason, "order rejected");
            return Err(SubmitError::InvalidOrder(reason));
        }
        let slot = self.slot(info.symbol_id).map_err(SubmitError::Internal)?;

        let mut market = lock(&slot.market);
        if market.halted {
            return Err(SubmitError::SymbolHalted(info.symbol_id));
        }

        let journal = self.journal_guard();

        let protection = match pinned {
            Some(p) => p.protection_price,
            None if req.order_type == OrderType::Market && req.side == Side::Buy => {
                order_manager::protection_price(info, &market.book, self.price_source.as_deref())
                    .map_err(|_| SubmitError::InvalidOrder(InvalidReason::Overflow))?
            }
            None => None,
        };
        let ids = || match pinned {
            Some(p) => {
                self.last_order_id.fetch_max(p.order_id, Ordering::SeqCst);
                self.last_seq.fetch_max(p.seq, Ordering::SeqCst);
                (p.order_id, p.seq)
            }
            None => (
                self.last_order_id.fetch_add(1, Ordering::SeqCst) + 1,
                self.last_seq.fetch_add(1, Ordering::SeqCst) + 1,
            ),
        };

        let order = order_manager::accept(&self.ledger, info, &req, protection, ids).inspect_err(
            |e| warn!(user_id = req.user_id, symbol = %req.symbol, error = %e, "order rejected"),
        )?;
        let (order_id, seq) = (order.order_id, order.seq);

        let ctx = MatchContext {
            ledger: &self.ledger,
            orders: &self.orders,
            trade_ids: &self.last_trade_id,
        };
        let result = match MatchingEngine::process_order(&ctx, &mut market, order) {
            Ok(result) => result,
            Err(e) => {
                Self::halt(&mut market, &e);
                slot.depth.publish(market.book.depth(self.settings.depth_levels));
                return Err(SubmitError::Internal(e.to_string()));
            }
        };

        if !result.trades.is_empty() {
            slot.trades
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(result.trades.iter().cloned());
        }
        slot.depth.publish(market.book.depth(self.settings.depth_levels));
        Self::record(
            journal,
            WalCommand::Submit {
                order_id,
                seq,
                request: req,
                protection_price: protection,
            },
        );

        info!(
            order_id,
            user_id = result.order.user_id,
            symbol = %info.symbol,
            side = result.order.side.as_str(),
            order_type = result.order.order_type.as_str(),
            status = result.order.status.as_str(),
            filled = result.order.filled_qty,
            trades = result.trades.len(),
            "order processed"
        );
        Ok(result)
    }

    /// Cancel a resting order owned by `user_id`
    pub fn cancel_order(&self, order_id: OrderId, user_id: UserId) -> Result<Order, CancelError> {
        let order = self
            .orders
            .get(order_id)
            .ok_or(CancelError::NotFound(order_id))?;
        if order.user_id != user_id {
            return Err(CancelError::Forbidden(order_id));
        }
        let slot = self.slot(order.symbol_id).map_err(CancelError::Internal)?;

        let mut market = lock(&slot.market);
        if market.halted {
            return Err(CancelError::SymbolHalted(order.symbol_id));
        }
        let journal = self.journal_guard();
        let cancelled =
            match order_manager::cancel(&self.ledger, &self.orders, &mut market.book, order_id, user_id) {
                Ok(order) => order,
                Err(CancelError::Internal(reason)) => {
                    Self::halt(&mut market, &reason);
                    return Err(CancelError::Internal(reason));
                }
                Err(e) => return Err(e),
            };
        slot.depth.publish(market.book.depth(self.settings.depth_levels));
        Self::record(journal, WalCommand::Cancel { order_id, user_id });
        Ok(cancelled)
    }

    pub fn get_order(&self, order_id: OrderId) -> Option<Order> {
        self.orders.get(order_id)
    }

    /// Non-terminal orders of `user_id`, oldest first
    pub fn open_orders(&self, user_id: UserId) -> Vec<Order> {
        self.orders.open_orders(user_id)
    }

    // ============================================================
    // QUERIES
    // ============================================================

    /// Aggregated book levels, best first. `None` for an unknown symbol.
    pub fn get_order_book(&self, symbol: &str, depth: usize) -> Option<DepthSnapshot> {
        let symbol_id = self.symbols.get_symbol_id(symbol)?;
        let slot = self.slots.get(&symbol_id)?;
        Some(slot.depth.get_snapshot(depth))
    }

    /// Trades matching `filter` with `trade_id > since`, ordered by trade id
    pub fn get_trades(&self, filter: TradeFilter<'_>, since: Option<TradeId>) -> Vec<Trade> {
        let since = since.unwrap_or(0);
        let mut out: Vec<Trade> = match filter {
            TradeFilter::Symbol(symbol) => {
                let Some(slot) = self
                    .symbols
                    .get_symbol_id(symbol)
                    .and_then(|id| self.slots.get(&id))
                else {
                    return Vec::new();
                };
                let trades = slot.trades.read().unwrap_or_else(PoisonError::into_inner);
                trades.iter().filter(|t| t.trade_id > since).cloned().collect()
            }
            TradeFilter::User(user_id) => self
                .slots
                .values()
                .flat_map(|slot| {
                    let trades = slot.trades.read().unwrap_or_else(PoisonError::into_inner);
                    trades
                        .iter()
                        .filter(|t| {
                            t.trade_id > since
                                && (t.buyer_user_id == user_id || t.seller_user_id == user_id)
                        })
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .collect(),
        };
        out.sort_by_key(|t| t.trade_id);
        out
    }

    pub fn get_balance(&self, user_id: UserId, asset_id: AssetId) -> BalanceView {
        let (available, locked) = self.ledger.balance_of(user_id, asset_id);
        BalanceView { available, locked }
    }

    /// Halted flag for `symbol`, `None` if unknown
    pub fn is_halted(&self, symbol: &str) -> Option<bool> {
        let symbol_id = self.symbols.get_symbol_id(symbol)?;
        let slot = self.slots.get(&symbol_id)?;
        Some(lock(&slot.market).halted)
    }

    // ============================================================
    // FUNDING
    // ============================================================

    pub fn deposit(&self, user_id: UserId, asset_id: AssetId, amount: u64) -> Result<(), FundingError> {
        self.check_funding(asset_id, amount)?;
        let journal = self.journal_guard();
        self.ledger.deposit(user_id, asset_id, amount)?;
        Self::record(journal, WalCommand::Deposit { user_id, asset_id, amount });
        info!(user_id, asset_id, amount, "deposit");
        Ok(())
    }

    pub fn withdraw(&self, user_id: UserId, asset_id: AssetId, amount: u64) -> Result<(), FundingError> {
        self.check_funding(asset_id, amount)?;
        let journal = self.journal_guard();
        self.ledger
            .withdraw(user_id, asset_id, amount)
            .inspect_err(|e| warn!(user_id, asset_id, amount, error = %e, "withdraw rejected"))?;
        Self::record(journal, WalCommand::Withdraw { user_id, asset_id, amount });
        info!(user_id, asset_id, amount, "withdraw");
        Ok(())
    }

    fn check_funding(&self, asset_id: AssetId, amount: u64) -> Result<(), FundingError> {
        if self.symbols.get_asset(asset_id).is_none() {
            return Err(FundingError::UnknownAsset(asset_id));
        }
        if amount == 0 {
            return Err(FundingError::InvalidAmount);
        }
        Ok(())
    }

    // ============================================================
    // JOURNAL / RECOVERY
    // ============================================================

    /// Re-apply one journaled command
    pub fn apply_command(&self, command: &WalCommand) -> Result<(), ReplayError> {
        match command {
            WalCommand::Deposit {
                user_id,
                asset_id,
                amount,
            } => self.deposit(*user_id, *asset_id, *amount)?,
            WalCommand::Withdraw {
                user_id,
                asset_id,
                amount,
            } => self.withdraw(*user_id, *asset_id, *amount)?,
            WalCommand::Submit {
                order_id,
                seq,
                request,
                protection_price,
            } => {
                let pinned = Pinned {
                    order_id: *order_id,
                    seq: *seq,
                    protection_price: *protection_price,
                };
                let result = self.submit_inner(request.clone(), Some(pinned))?;
                if result.order.order_id != *order_id {
                    return Err(ReplayError::Diverged {
                        expected: *order_id,
                        actual: result.order.order_id,
                    });
                }
            }
            WalCommand::Cancel { order_id, user_id } => {
                self.cancel_order(*order_id, *user_id)?;
            }
        }
        Ok(())
    }

    /// Force buffered journal entries to disk
    pub fn flush_journal(&self) -> io::Result<()> {
        match lock(&self.journal).as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }

    /// Journal mutex for one state change, held from before the first
    /// ledger mutation until the command is appended. `None` without a
    /// journal, so unjournaled symbols keep matching in parallel.
    fn journal_guard(&self) -> Option<JournalGuard<'_>> {
        self.journaled.then(|| lock(&self.journal))
    }

    fn record(journal: Option<JournalGuard<'_>>, command: WalCommand) {
        if let Some(mut journal) = journal
            && let Some(writer) = journal.as_mut()
            && let Err(e) = writer.append(command)
        {
            error!(error = %e, "WAL append failed");
        }
    }

    /// Consistent copy of the whole exchange state
    pub fn snapshot(&self) -> ExchangeSnapshot {
        let mut ids: Vec<SymbolId> = self.slots.keys().copied().collect();
        ids.sort_unstable();
        let markets: Vec<(SymbolId, MutexGuard<'_, Market>)> = ids
            .iter()
            .filter_map(|id| self.slots.get(id).map(|slot| (*id, lock(&slot.market))))
            .collect();
        let journal = lock(&self.journal);

        let mut trades: Vec<Trade> = self
            .slots
            .values()
            .flat_map(|slot| {
                slot.trades
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
            })
            .collect();
        trades.sort_by_key(|t| t.trade_id);

        ExchangeSnapshot {
            wal_seq_id: journal.as_ref().map_or(0, |w| w.current_seq()),
            last_order_id: self.last_order_id.load(Ordering::SeqCst),
            last_trade_id: self.last_trade_id.load(Ordering::SeqCst),
            last_seq: self.last_seq.load(Ordering::SeqCst),
            balances: self.ledger.records(),
            orders: self.orders.all(),
            trades,
            markets: markets
                .iter()
                .map(|(id, m)| MarketState {
                    symbol_id: *id,
                    match_seq: m.match_seq,
                    halted: m.halted,
                })
                .collect(),
        }
    }

    /// Replace all state with `snapshot`, rebuilding books from open limit
    /// orders in arrival order. Meant for a freshly built exchange.
    pub fn restore(&self, snapshot: &ExchangeSnapshot) -> Result<(), RestoreError> {
        for state in &snapshot.markets {
            if !self.slots.contains_key(&state.symbol_id) {
                return Err(RestoreError::UnknownSymbol(state.symbol_id));
            }
        }
        if let Some(order) = snapshot
            .orders
            .iter()
            .find(|o| !self.slots.contains_key(&o.symbol_id))
        {
            return Err(RestoreError::UnknownSymbol(order.symbol_id));
        }

        let mut ids: Vec<SymbolId> = self.slots.keys().copied().collect();
        ids.sort_unstable();
        let mut markets: FxHashMap<SymbolId, MutexGuard<'_, Market>> = ids
            .iter()
            .filter_map(|id| self.slots.get(id).map(|slot| (*id, lock(&slot.market))))
            .collect();
        let _journal = lock(&self.journal);

        self.ledger.restore(&snapshot.balances)?;
        self.orders.clear();
        for market in markets.values_mut() {
            market.book = OrderBook::new();
            market.match_seq = 0;
            market.halted = false;
        }
        for state in &snapshot.markets {
            if let Some(market) = markets.get_mut(&state.symbol_id) {
                market.match_seq = state.match_seq;
                market.halted = state.halted;
            }
        }

        let mut resting: Vec<&Order> = snapshot
            .orders
            .iter()
            .filter(|o| o.order_type == OrderType::Limit && !o.is_terminal())
            .collect();
        resting.sort_by_key(|o| o.seq);
        for order in resting {
            if let Some(market) = markets.get_mut(&order.symbol_id) {
                market.book.insert(order)?;
            }
        }
        for order in &snapshot.orders {
            self.orders.insert(order.clone());
        }

        for (id, slot) in &self.slots {
            let mut trades = slot.trades.write().unwrap_or_else(PoisonError::into_inner);
            trades.clear();
            trades.extend(snapshot.trades.iter().filter(|t| t.symbol_id == *id).cloned());
            if let Some(market) = markets.get(id) {
                slot.depth.reset(market.book.depth(self.settings.depth_levels));
            }
        }

        self.last_order_id.store(snapshot.last_order_id, Ordering::SeqCst);
        self.last_trade_id.store(snapshot.last_trade_id, Ordering::SeqCst);
        self.last_seq.store(snapshot.last_seq, Ordering::SeqCst);

        let open = snapshot
            .orders
            .iter()
            .filter(|o| matches!(o.status, OrderStatus::Open | OrderStatus::PartiallyFilled))
            .count();
        info!(
            wal_seq_id = snapshot.wal_seq_id,
            orders = snapshot.orders.len(),
            open,
            trades = snapshot.trades.len(),
            "exchange restored from snapshot"
        );
        Ok(())
    }

    // ============================================================
    // INTERNAL
    // ============================================================

    fn slot(&self, symbol_id: SymbolId) -> Result<&SymbolSlot, String> {
        self.slots
            .get(&symbol_id)
            .ok_or_else(|| format!("no market for symbol {symbol_id}"))
    }

    fn halt(market: &mut Market, reason: &dyn std::fmt::Display) {
        market.halted = true;
        error!(
            symbol = %market.info.symbol,
            symbol_id = market.info.symbol_id,
            %reason,
            "internal inconsistency, symbol halted"
        );
    }
}
