//! Symbol and asset registry
//!
//! Single source of truth for decimals, fee schedules and slippage caps.

use crate::core_types::{AssetId, SymbolId};
use crate::fee::FeeSchedule;
use crate::money::{self, MoneyError};
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default protection band for market buys (5%)
pub const DEFAULT_MARKET_SLIPPAGE_BPS: u32 = 500;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SymbolError {
    #[error("asset {0} is not registered")]
    UnknownAsset(AssetId),

    #[error("duplicate symbol: {0}")]
    DuplicateSymbol(String),

    #[error("base and quote asset must differ ({0})")]
    SameAsset(AssetId),

    #[error("asset {asset_id}: {decimals} decimals exceeds the maximum of {max}", max = money::MAX_DECIMALS)]
    InvalidDecimals { asset_id: AssetId, decimals: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetInfo {
    pub asset_id: AssetId,
    pub name: String,
    pub decimals: u32,
    /// Max decimals shown to humans
    pub display_decimals: u32,
}

impl AssetInfo {
    /// Parse amount (rejects zero and over-precise input)
    pub fn parse_amount(&self, d: Decimal) -> Result<u64, MoneyError> {
        money::parse_decimal(d, self.decimals)
    }

    pub fn format_amount(&self, amount: u64) -> String {
        money::format_amount(amount, self.decimals, self.display_decimals)
    }
}

/// Trading pair configuration.
///
/// Prices are expressed in quote-asset units per one whole base unit, so
/// `price` carries `quote_decimals` and `quote = price * qty / qty_unit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub symbol_id: SymbolId,
    pub base_asset_id: AssetId,
    pub quote_asset_id: AssetId,
    /// Base asset decimals (e.g., 8 for BTC = satoshi)
    pub base_decimals: u32,
    /// Quote asset decimals; also the price scale
    pub quote_decimals: u32,
    pub fees: FeeSchedule,
    /// Market buy cap above the reference price, in basis points
    pub market_slippage_bps: u32,
}

impl SymbolInfo {
    /// qty_unit (base asset unit) - e.g., 10^8 for BTC
    #[inline]
    pub fn qty_unit(&self) -> u64 {
        money::unit_amount(self.base_decimals)
    }

    #[inline]
    pub fn quote_amount(&self, price: u64, qty: u64) -> Result<u64, MoneyError> {
        money::quote_amount(price, qty, self.qty_unit())
    }

    pub fn parse_qty(&self, qty: Decimal) -> Result<u64, MoneyError> {
        money::parse_decimal(qty, self.base_decimals)
    }

    pub fn parse_price(&self, price: Decimal) -> Result<u64, MoneyError> {
        money::parse_decimal(price, self.quote_decimals)
    }

    /// Raw scaled price → Decimal
    #[inline]
    pub fn price_as_decimal(&self, price: u64) -> Decimal {
        money::to_decimal(price, self.quote_decimals)
    }

    /// Raw scaled quantity → Decimal
    #[inline]
    pub fn qty_as_decimal(&self, qty: u64) -> Decimal {
        money::to_decimal(qty, self.base_decimals)
    }
}

/// Manages symbol-to-ID and ID-to-symbol mappings
#[derive(Debug, Clone, Default)]
pub struct SymbolManager {
    symbol_to_id: FxHashMap<String, SymbolId>,
    symbol_info: FxHashMap<SymbolId, SymbolInfo>,
    assets: FxHashMap<AssetId, AssetInfo>,
}

impl SymbolManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an asset. Rejects scales whose unit would overflow a u64.
    pub fn add_asset(
        &mut self,
        asset_id: AssetId,
        decimals: u32,
        display_decimals: u32,
        name: &str,
    ) -> Result<(), SymbolError> {
        if decimals > money::MAX_DECIMALS {
            return Err(SymbolError::InvalidDecimals { asset_id, decimals });
        }
        self.assets.insert(
            asset_id,
            AssetInfo {
                asset_id,
                name: name.to_string(),
                decimals,
                display_decimals,
            },
        );
        Ok(())
    }

    /// Register a symbol with the default fee schedule and slippage band
    pub fn insert_symbol(
        &mut self,
        symbol: &str,
        symbol_id: SymbolId,
        base_asset_id: AssetId,
        quote_asset_id: AssetId,
    ) -> Result<(), SymbolError> {
        self.insert_symbol_with_fees(
            symbol,
            symbol_id,
            base_asset_id,
            quote_asset_id,
            FeeSchedule::default(),
            DEFAULT_MARKET_SLIPPAGE_BPS,
        )
    }

    pub fn insert_symbol_with_fees(
        &mut self,
        symbol: &str,
        symbol_id: SymbolId,
        base_asset_id: AssetId,
        quote_asset_id: AssetId,
        fees: FeeSchedule,
        market_slippage_bps: u32,
    ) -> Result<(), SymbolError> {
        if base_asset_id == quote_asset_id {
            return Err(SymbolError::SameAsset(base_asset_id));
        }
        if self.symbol_to_id.contains_key(symbol) || self.symbol_info.contains_key(&symbol_id) {
            return Err(SymbolError::DuplicateSymbol(symbol.to_string()));
        }
        let base_decimals = self
            .assets
            .get(&base_asset_id)
            .map(|a| a.decimals)
            .ok_or(SymbolError::UnknownAsset(base_asset_id))?;
        let quote_decimals = self
            .assets
            .get(&quote_asset_id)
            .map(|a| a.decimals)
            .ok_or(SymbolError::UnknownAsset(quote_asset_id))?;

        self.symbol_to_id.insert(symbol.to_string(), symbol_id);
        self.symbol_info.insert(
            symbol_id,
            SymbolInfo {
                symbol: symbol.to_string(),
                symbol_id,
                base_asset_id,
                quote_asset_id,
                base_decimals,
                quote_decimals,
                fees,
                market_slippage_bps,
            },
        );
        Ok(())
    }

    pub fn get_symbol_id(&self, symbol: &str) -> Option<SymbolId> {
        self.symbol_to_id.get(symbol).copied()
    }

    pub fn get_symbol_info(&self, symbol: &str) -> Option<&SymbolInfo> {
        let id = self.get_symbol_id(symbol)?;
        self.symbol_info.get(&id)
    }

    pub fn get_symbol_info_by_id(&self, id: SymbolId) -> Option<&SymbolInfo> {
        self.symbol_info.get(&id)
    }

    pub fn get_asset(&self, asset_id: AssetId) -> Option<&AssetInfo> {
        self.assets.get(&asset_id)
    }

    pub fn get_asset_id(&self, name: &str) -> Option<AssetId> {
        self.assets
            .values()
            .find(|a| a.name == name)
            .map(|a| a.asset_id)
    }

    pub fn symbol_count(&self) -> usize {
        self.symbol_info.len()
    }

    /// Iterate over all symbols (unordered)
    pub fn iter_symbols(&self) -> impl Iterator<Item = &SymbolInfo> {
        self.symbol_info.values()
    }

    /// Iterate over all assets (unordered)
    pub fn iter_assets(&self) -> impl Iterator<Item = &AssetInfo> {
        self.assets.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn manager() -> SymbolManager {
        let mut m = SymbolManager::new();
        m.add_asset(1, 8, 6, "BTC").unwrap();
        m.add_asset(2, 6, 2, "USDT").unwrap();
        m.insert_symbol("BTC_USDT", 0, 1, 2).unwrap();
        m
    }

    #[test]
    fn test_lookup_by_name_and_id() {
        let m = manager();
        assert_eq!(m.get_symbol_id("BTC_USDT"), Some(0));
        let info = m.get_symbol_info_by_id(0).unwrap();
        assert_eq!(info.base_decimals, 8);
        assert_eq!(info.quote_decimals, 6);
        assert_eq!(info.qty_unit(), 100_000_000);
        assert_eq!(info.fees, FeeSchedule::default());
        assert_eq!(m.get_asset_id("USDT"), Some(2));
        assert!(m.get_symbol_info("ETH_USDT").is_none());
    }

    #[test]
    fn test_unknown_asset_rejected() {
        let mut m = manager();
        assert_eq!(
            m.insert_symbol("ETH_USDT", 1, 9, 2),
            Err(SymbolError::UnknownAsset(9))
        );
        assert_eq!(m.symbol_count(), 1);
    }

    #[test]
    fn test_duplicate_and_same_asset_rejected() {
        let mut m = manager();
        assert!(matches!(
            m.insert_symbol("BTC_USDT", 5, 1, 2),
            Err(SymbolError::DuplicateSymbol(_))
        ));
        assert_eq!(
            m.insert_symbol("BTC_BTC", 6, 1, 1),
            Err(SymbolError::SameAsset(1))
        );
    }

    #[test]
    fn test_oversized_decimals_rejected() {
        let mut m = manager();
        assert_eq!(
            m.add_asset(3, 20, 2, "HUGE"),
            Err(SymbolError::InvalidDecimals { asset_id: 3, decimals: 20 })
        );
        assert!(m.get_asset_id("HUGE").is_none());
        assert_eq!(m.add_asset(4, 19, 2, "TINY"), Ok(()));
    }

    #[test]
    fn test_decimal_conversions() {
        let m = manager();
        let info = m.get_symbol_info("BTC_USDT").unwrap();
        let qty = info.parse_qty(Decimal::from_str("0.1").unwrap()).unwrap();
        let price = info.parse_price(Decimal::from(40000)).unwrap();
        assert_eq!(qty, 10_000_000);
        assert_eq!(price, 40_000_000_000);
        assert_eq!(info.quote_amount(price, qty), Ok(4_000_000_000));
        assert_eq!(info.qty_as_decimal(qty), Decimal::from_str("0.1").unwrap());
        assert_eq!(info.price_as_decimal(price), Decimal::from(40000));
    }
}
