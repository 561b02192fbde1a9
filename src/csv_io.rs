//! CSV I/O - Load driver input and dump final state
//!
//! Inputs use human-readable decimals; they are converted with each asset's
//! precision and rejected (not rounded) when over-precise. Outputs are raw
//! scaled integers so runs can be diffed exactly.

use crate::core_types::{AssetId, OrderId, UserId};
use crate::models::{Order, OrderType, Side, Trade};
use crate::symbol_manager::SymbolManager;
use anyhow::{Context, Result, bail};
use rust_decimal::Decimal;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

// ============================================================
// Constants for file names
// ============================================================

pub const BALANCES_INIT_CSV: &str = "balances_init.csv";
pub const ORDERS_CSV: &str = "orders.csv";

pub const BALANCES_FINAL_CSV: &str = "t2_balances_final.csv";
pub const ORDERBOOK_CSV: &str = "t2_orderbook.csv";
pub const TRADES_CSV: &str = "t2_trades.csv";

pub const ACTION_PLACE: &str = "place";
pub const ACTION_CANCEL: &str = "cancel";

// ============================================================
// Input
// ============================================================

/// Initial deposit row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialBalance {
    pub user_id: UserId,
    pub asset_id: AssetId,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputAction {
    Place {
        symbol: String,
        side: Side,
        order_type: OrderType,
        price: Option<u64>,
        qty: u64,
    },
    Cancel,
}

/// One row of orders.csv. `order_id` is the client's reference; the
/// exchange assigns its own ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputOrder {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub action: InputAction,
}

/// `user_id,asset_id,amount`
pub fn load_balances(path: &Path, manager: &SymbolManager) -> Result<Vec<InitialBalance>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut balances = Vec::new();

    for (line_num, line) in reader.lines().skip(1).enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 3 {
            bail!("Expected 3 columns at line {}", line_num + 2);
        }
        let user_id: UserId = parts[0]
            .parse()
            .with_context(|| format!("Invalid user_id at line {}", line_num + 2))?;
        let asset_id: AssetId = parts[1]
            .parse()
            .with_context(|| format!("Invalid asset_id at line {}", line_num + 2))?;
        let asset = manager
            .get_asset(asset_id)
            .with_context(|| format!("Unknown asset {} at line {}", asset_id, line_num + 2))?;
        let amount = asset
            .parse_amount(parse_decimal(parts[2], line_num)?)
            .with_context(|| format!("Invalid amount at line {}", line_num + 2))?;
        balances.push(InitialBalance {
            user_id,
            asset_id,
            amount,
        });
    }
    Ok(balances)
}

/// `action,order_id,user_id,symbol,side,type,price,qty`
///
/// Cancel rows only need the first three columns.
pub fn load_orders(path: &Path, manager: &SymbolManager) -> Result<Vec<InputOrder>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut orders = Vec::new();

    for (line_num, line) in reader.lines().skip(1).enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 3 {
            bail!("Expected at least 3 columns at line {}", line_num + 2);
        }
        let order_id: OrderId = parts[1]
            .parse()
            .with_context(|| format!("Invalid order_id at line {}", line_num + 2))?;
        let user_id: UserId = parts[2]
            .parse()
            .with_context(|| format!("Invalid user_id at line {}", line_num + 2))?;

        let action = match parts[0].to_lowercase().as_str() {
            ACTION_CANCEL => InputAction::Cancel,
            ACTION_PLACE => {
                if parts.len() < 8 {
                    bail!("Place needs 8 columns at line {}", line_num + 2);
                }
                let symbol = parts[3];
                let info = manager
                    .get_symbol_info(symbol)
                    .with_context(|| format!("Unknown symbol {} at line {}", symbol, line_num + 2))?;
                let side = Side::from_str(parts[4])
                    .map_err(anyhow::Error::msg)
                    .with_context(|| format!("Invalid side at line {}", line_num + 2))?;
                let order_type = OrderType::from_str(parts[5])
                    .map_err(anyhow::Error::msg)
                    .with_context(|| format!("Invalid type at line {}", line_num + 2))?;
                let price = match parts[6] {
                    "" => None,
                    p => Some(
                        info.parse_price(parse_decimal(p, line_num)?)
                            .with_context(|| format!("Invalid price at line {}", line_num + 2))?,
                    ),
                };
                let qty = info
                    .parse_qty(parse_decimal(parts[7], line_num)?)
                    .with_context(|| format!("Invalid qty at line {}", line_num + 2))?;
                InputAction::Place {
                    symbol: symbol.to_string(),
                    side,
                    order_type,
                    price,
                    qty,
                }
            }
            other => bail!("Unknown action '{}' at line {}", other, line_num + 2),
        };
        orders.push(InputOrder {
            order_id,
            user_id,
            action,
        });
    }
    Ok(orders)
}

fn parse_decimal(s: &str, line_num: usize) -> Result<Decimal> {
    Decimal::from_str(s).with_context(|| format!("Invalid decimal '{}' at line {}", s, line_num + 2))
}

// ============================================================
// Output
// ============================================================

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// `user_id,asset_id,avail,frozen`, sorted by (user, asset)
pub fn dump_balances(records: &[crate::ledger::BalanceRecord], path: &Path) -> Result<()> {
    let mut out = create(path)?;
    writeln!(out, "user_id,asset_id,avail,frozen")?;
    for r in records {
        writeln!(out, "{},{},{},{}", r.user_id, r.asset_id, r.avail, r.frozen)?;
    }
    out.flush()?;
    Ok(())
}

/// Resting orders, one row each
pub fn dump_orderbook(orders: &[Order], manager: &SymbolManager, path: &Path) -> Result<()> {
    let mut out = create(path)?;
    writeln!(
        out,
        "order_id,user_id,symbol,side,order_type,price,qty,filled_qty,status"
    )?;
    for order in orders {
        let symbol = manager
            .get_symbol_info_by_id(order.symbol_id)
            .map(|s| s.symbol.as_str())
            .unwrap_or("?");
        writeln!(
            out,
            "{},{},{},{},{},{},{},{},{}",
            order.order_id,
            order.user_id,
            symbol,
            order.side.as_str(),
            order.order_type.as_str(),
            order.price.map(|p| p.to_string()).unwrap_or_default(),
            order.qty,
            order.filled_qty,
            order.status.as_str()
        )?;
    }
    out.flush()?;
    Ok(())
}

pub fn dump_trades(trades: &[Trade], manager: &SymbolManager, path: &Path) -> Result<()> {
    let mut out = create(path)?;
    writeln!(
        out,
        "trade_id,symbol,buy_order_id,sell_order_id,buyer_user_id,seller_user_id,price,qty,quote_qty,fee,taker_side"
    )?;
    for t in trades {
        let symbol = manager
            .get_symbol_info_by_id(t.symbol_id)
            .map(|s| s.symbol.as_str())
            .unwrap_or("?");
        writeln!(
            out,
            "{},{},{},{},{},{},{},{},{},{},{}",
            t.trade_id,
            symbol,
            t.buy_order_id,
            t.sell_order_id,
            t.buyer_user_id,
            t.seller_user_id,
            t.price,
            t.qty,
            t.quote_qty,
            t.fee,
            t.taker_side.as_str()
        )?;
    }
    out.flush()?;
    Ok(())
}
