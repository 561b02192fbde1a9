//! spot_engine - Spot Exchange Matching and Settlement Engine
//!
//! Price-time priority matching with fully-reserved balances, atomic
//! settlement, and an optional command journal for recovery.
//!
//! # Modules
//!
//! - [`core_types`] - Core type aliases (AssetId, UserId, etc.)
//! - [`money`] - Scaled-integer amounts and conversions
//! - [`fee`] - Fee rates and calculation
//! - [`symbol_manager`] - Symbol and asset configuration
//! - [`balance`] - Enforced balance type
//! - [`ledger`] - Concurrent per-(user, asset) balances and settlement
//! - [`models`] - Order and Trade types
//! - [`orderbook`] - BTreeMap-based order book
//! - [`order_manager`] - Order acceptance, reservations, cancellation
//! - [`engine`] - Matching engine logic
//! - [`market_data`] - Reference prices and depth snapshots
//! - [`exchange`] - Thread-safe facade over everything above
//! - [`wal`] - Command journal
//! - [`snapshot`] - Point-in-time state snapshots
//! - [`config`], [`logging`], [`perf`], [`csv_io`] - Driver plumbing

// Core types - must be first!
pub mod core_types;

pub mod money;
pub mod fee;
pub mod symbol_manager;

// Trading components
pub mod balance;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod ledger;
pub mod market_data;
pub mod models;
pub mod order_manager;
pub mod orderbook;

// Persistence
pub mod snapshot;
pub mod wal;

// Driver plumbing
pub mod config;
pub mod csv_io;
pub mod logging;
pub mod perf;

// Convenient re-exports at crate root
pub use balance::Balance;
pub use core_types::{AssetId, FEE_ACCOUNT_ID, OrderId, SeqNum, SymbolId, TradeId, UserId};
pub use engine::MatchingEngine;
pub use error::{CancelError, FundingError, LedgerError, ReplayError, RestoreError, SubmitError};
pub use exchange::{BalanceView, EngineSettings, Exchange, TradeFilter};
pub use ledger::Ledger;
pub use market_data::{ReferencePriceSource, StaticPriceFeed};
pub use models::{Order, OrderResult, OrderStatus, OrderType, Side, Trade};
pub use order_manager::OrderRequest;
pub use orderbook::{DepthSnapshot, OrderBook};
pub use symbol_manager::{SymbolInfo, SymbolManager};
pub use wal::{WalConfig, WalWriter};
