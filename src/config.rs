use crate::exchange::{DEFAULT_DEPTH_LEVELS, EngineSettings};
use crate::fee::{DEFAULT_MAKER_FEE, DEFAULT_TAKER_FEE, FeeSchedule};
use crate::symbol_manager::{DEFAULT_MARKET_SLIPPAGE_BPS, SymbolManager};
use crate::wal::WalConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Record every Nth order latency
    pub sample_rate: usize,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub assets: Vec<AssetConfig>,
    #[serde(default)]
    pub symbols: Vec<SymbolConfig>,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub fee_account_id: u64,
    /// 10^6 precision (1000 = 0.10%)
    pub default_maker_fee: u64,
    pub default_taker_fee: u64,
    pub default_market_slippage_bps: u32,
    pub depth_levels: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fee_account_id: crate::core_types::FEE_ACCOUNT_ID,
            default_maker_fee: DEFAULT_MAKER_FEE,
            default_taker_fee: DEFAULT_TAKER_FEE,
            default_market_slippage_bps: DEFAULT_MARKET_SLIPPAGE_BPS,
            depth_levels: DEFAULT_DEPTH_LEVELS,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AssetConfig {
    pub asset_id: u32,
    pub name: String,
    pub decimals: u32,
    pub display_decimals: u32,
}

/// One trading pair; `base` / `quote` are asset names
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SymbolConfig {
    pub symbol_id: u32,
    pub symbol: String,
    pub base: String,
    pub quote: String,
    #[serde(default)]
    pub maker_fee: Option<u64>,
    #[serde(default)]
    pub taker_fee: Option<u64>,
    #[serde(default)]
    pub market_slippage_bps: Option<u32>,
}

/// Command journal + snapshot settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    pub data_dir: String,
    pub flush_interval_entries: usize,
    pub sync_on_flush: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            data_dir: "./data".to_string(),
            flush_interval_entries: 100,
            sync_on_flush: false,
        }
    }
}

impl PersistenceConfig {
    pub fn wal_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("commands.wal")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("snapshots")
    }

    pub fn wal_config(&self) -> WalConfig {
        WalConfig {
            path: self.wal_path(),
            flush_interval_entries: self.flush_interval_entries,
            sync_on_flush: self.sync_on_flush,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            fee_account_id: self.engine.fee_account_id,
            depth_levels: self.engine.depth_levels.max(1),
        }
    }

    /// Register configured assets and symbols, applying engine defaults
    /// where a symbol has no override.
    pub fn symbol_manager(&self) -> Result<SymbolManager> {
        let mut manager = SymbolManager::new();
        for asset in &self.assets {
            manager
                .add_asset(asset.asset_id, asset.decimals, asset.display_decimals, &asset.name)
                .with_context(|| format!("Failed to register asset {}", asset.name))?;
        }
        for s in &self.symbols {
            let base = manager
                .get_asset_id(&s.base)
                .with_context(|| format!("Symbol {}: unknown base asset {}", s.symbol, s.base))?;
            let quote = manager
                .get_asset_id(&s.quote)
                .with_context(|| format!("Symbol {}: unknown quote asset {}", s.symbol, s.quote))?;
            let fees = FeeSchedule {
                maker_rate: s.maker_fee.unwrap_or(self.engine.default_maker_fee),
                taker_rate: s.taker_fee.unwrap_or(self.engine.default_taker_fee),
            };
            let slippage = s
                .market_slippage_bps
                .unwrap_or(self.engine.default_market_slippage_bps);
            manager
                .insert_symbol_with_fees(&s.symbol, s.symbol_id, base, quote, fees, slippage)
                .with_context(|| format!("Failed to register symbol {}", s.symbol))?;
        }
        Ok(manager)
    }
}
