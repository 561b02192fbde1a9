//! Core types used throughout the system
//!
//! These are fundamental type aliases used by all modules.
//! They provide semantic meaning and enable future type evolution.

/// Asset ID - globally unique identifier for an asset (currency).
///
/// # Constraints:
/// - **Immutable**: Once assigned, NEVER changes
/// - **Small Values**: assigned by configuration (0, 1, 2, ...)
pub type AssetId = u32;

/// Symbol ID - identifies a trading pair (e.g. BTC_USDT)
pub type SymbolId = u32;

/// User ID - opaque, already-authenticated identity supplied by the caller.
pub type UserId = u64;

/// Order ID - unique within the system, never reused
pub type OrderId = u64;

/// Trade ID - unique within the system, monotonically increasing
pub type TradeId = u64;

/// Sequence number for price-time priority and replay ordering
pub type SeqNum = u64;

/// Fee collection account.
///
/// Receives the quote-currency fee of every trade. It never places orders,
/// so submissions from this id are rejected.
pub const FEE_ACCOUNT_ID: UserId = 0;
