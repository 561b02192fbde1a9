//! Engine error types
//!
//! User-facing errors (`SubmitError`, `CancelError`) are returned
//! synchronously and never leave partial effects behind.
//! `LedgerError::InternalInconsistency` is a programming bug: it is logged
//! loudly and halts the symbol that triggered it.

use crate::balance::BalanceError;
use crate::core_types::{AssetId, OrderId, SymbolId, UserId};
use crate::models::OrderStatus;
use thiserror::Error;

/// Why an order was rejected as invalid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// Quantity is zero
    InvalidQuantity,
    /// Limit order without a positive price
    InvalidPrice,
    /// Market order carrying a price
    UnexpectedPrice,
    /// The fee-collection account cannot trade
    ReservedAccount,
    /// price * qty does not fit the amount range
    Overflow,
    /// price * qty truncates to zero quote units
    ZeroNotional,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidQuantity => "Invalid quantity",
            Self::InvalidPrice => "Invalid price",
            Self::UnexpectedPrice => "Market order must not carry a price",
            Self::ReservedAccount => "Account cannot place orders",
            Self::Overflow => "Order value overflow",
            Self::ZeroNotional => "Order value rounds to zero",
        }
    }
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient funds: user {user_id} asset {asset_id} available {available}, required {required}")]
    InsufficientFunds {
        user_id: UserId,
        asset_id: AssetId,
        available: u64,
        required: u64,
    },

    #[error("ledger inconsistency: user {user_id} asset {asset_id}: {source}")]
    InternalInconsistency {
        user_id: UserId,
        asset_id: AssetId,
        #[source]
        source: BalanceError,
    },

    #[error("balance overflow: user {user_id} asset {asset_id}")]
    Overflow { user_id: UserId, asset_id: AssetId },
}

impl LedgerError {
    /// True for errors that indicate broken bookkeeping rather than user input
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::InternalInconsistency { .. })
    }
}

/// Order state machine violations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderStateError {
    #[error("order {order_id} is terminal ({status:?})")]
    Terminal {
        order_id: OrderId,
        status: OrderStatus,
    },

    #[error("order {order_id} overfill: fill {fill}, remaining {remaining}")]
    Overfill {
        order_id: OrderId,
        fill: u64,
        remaining: u64,
    },
}

/// `submit_order` rejections
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("insufficient funds: available {available}, required {required}")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("invalid order: {0}")]
    InvalidOrder(InvalidReason),

    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("symbol {0} is halted")]
    SymbolHalted(SymbolId),

    #[error("internal error: {0}")]
    Internal(String),
}

/// `cancel_order` rejections
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CancelError {
    #[error("order {0} not found")]
    NotFound(OrderId),

    #[error("order {0} belongs to another user")]
    Forbidden(OrderId),

    #[error("order {order_id} already {status:?}")]
    AlreadyTerminal {
        order_id: OrderId,
        status: OrderStatus,
    },

    #[error("symbol {0} is halted")]
    SymbolHalted(SymbolId),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Deposit / withdraw rejections
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FundingError {
    #[error("unknown asset: {0}")]
    UnknownAsset(AssetId),

    #[error("amount must be greater than zero")]
    InvalidAmount,

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// `Exchange::restore` failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RestoreError {
    #[error("snapshot references unknown symbol {0}")]
    UnknownSymbol(SymbolId),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("book rebuild failed: {0}")]
    Book(#[from] crate::orderbook::BookError),
}

/// A journaled command that no longer applies cleanly
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Cancel(#[from] CancelError),

    #[error(transparent)]
    Funding(#[from] FundingError),

    #[error("replayed order id {actual} differs from journaled {expected}")]
    Diverged { expected: OrderId, actual: OrderId },
}
