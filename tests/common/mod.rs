#![allow(dead_code)]

use spot_engine::config::AppConfig;
use spot_engine::money::parse_amount;
use spot_engine::snapshot::ExchangeSnapshot;
use spot_engine::{AssetId, Exchange, Order, OrderStatus, UserId};

pub const BTC: AssetId = 1;
pub const USDT: AssetId = 2;
pub const ETH: AssetId = 3;

/// BTC(8) / USDT(6) / ETH(8), default 0.1% fees
pub const CONFIG: &str = r#"
log_level: warn
log_dir: logs
log_file: test.log
use_json: false
rotation: never
sample_rate: 1
assets:
  - { asset_id: 1, name: BTC, decimals: 8, display_decimals: 6 }
  - { asset_id: 2, name: USDT, decimals: 6, display_decimals: 2 }
  - { asset_id: 3, name: ETH, decimals: 8, display_decimals: 4 }
symbols:
  - { symbol_id: 0, symbol: BTC_USDT, base: BTC, quote: USDT }
  - { symbol_id: 1, symbol: ETH_USDT, base: ETH, quote: USDT, taker_fee: 2000 }
"#;

pub fn config() -> AppConfig {
    AppConfig::from_yaml(CONFIG).unwrap()
}

pub fn exchange() -> Exchange {
    let cfg = config();
    Exchange::new(cfg.symbol_manager().unwrap(), cfg.engine_settings())
}

pub fn btc(s: &str) -> u64 {
    parse_amount(s, 8).unwrap()
}

pub fn eth(s: &str) -> u64 {
    parse_amount(s, 8).unwrap()
}

pub fn usdt(s: &str) -> u64 {
    parse_amount(s, 6).unwrap()
}

/// Price in USDT per whole base unit
pub fn px(s: &str) -> Option<u64> {
    Some(usdt(s))
}

pub fn open(order: &Order) -> bool {
    matches!(order.status, OrderStatus::Open | OrderStatus::PartiallyFilled)
}

/// Fund-safety checks that must hold between any two operations
pub fn assert_consistent(ex: &Exchange, deposited: &[(AssetId, u128)]) {
    let state = ex.snapshot();

    for &(asset, total) in deposited {
        assert_eq!(ex.ledger().totals(asset), total, "conservation broken for asset {asset}");
    }

    // locked == sum of open orders' reservations, per (user, lock asset)
    let mut reserved: std::collections::BTreeMap<(UserId, AssetId), u64> = Default::default();
    for o in &state.orders {
        assert!(o.filled_qty <= o.qty, "order {} overfilled", o.order_id);
        if o.is_terminal() {
            assert_eq!(o.reserved, 0, "terminal order {} still reserves", o.order_id);
        } else {
            *reserved.entry((o.user_id, o.lock_asset)).or_default() += o.reserved;
        }
    }
    for b in &state.balances {
        let expected = reserved.get(&(b.user_id, b.asset_id)).copied().unwrap_or(0);
        assert_eq!(b.frozen, expected, "locked mismatch for user {} asset {}", b.user_id, b.asset_id);
    }

    // Book never crossed
    for symbol in ["BTC_USDT", "ETH_USDT"] {
        let depth = ex.get_order_book(symbol, 1).unwrap();
        if let (Some(bid), Some(ask)) = (depth.bids.first(), depth.asks.first()) {
            assert!(bid.0 < ask.0, "{symbol} crossed: bid {} >= ask {}", bid.0, ask.0);
        }
    }
}

/// Drop wall-clock fields so two runs can be compared
pub fn normalized(mut s: ExchangeSnapshot) -> ExchangeSnapshot {
    for o in &mut s.orders {
        o.created_at = 0;
    }
    for t in &mut s.trades {
        t.timestamp = 0;
    }
    s.wal_seq_id = 0;
    s
}

use rand::Rng;
use rand::rngs::StdRng;
use spot_engine::{OrderId, OrderType, Side};

pub const USERS: [UserId; 5] = [1, 2, 3, 4, 5];

/// Fund every user and return the per-asset totals deposited
pub fn fund_users(ex: &Exchange, users: &[UserId]) -> Vec<(AssetId, u128)> {
    let amounts = [(BTC, btc("10")), (ETH, eth("100")), (USDT, usdt("1000000"))];
    for &user in users {
        for (asset, amount) in amounts {
            ex.deposit(user, asset, amount).unwrap();
        }
    }
    amounts
        .iter()
        .map(|&(asset, amount)| (asset, amount as u128 * users.len() as u128))
        .collect()
}

/// One random submit or cancel around a narrow price band so books cross
/// often. Successful submits are remembered in `placed` for later cancels.
pub fn random_op(
    rng: &mut StdRng,
    ex: &Exchange,
    users: &[UserId],
    placed: &mut Vec<(OrderId, UserId)>,
) {
    let user = users[rng.gen_range(0..users.len())];
    if !placed.is_empty() && rng.gen_bool(0.2) {
        let (order_id, owner) = placed[rng.gen_range(0..placed.len())];
        // Occasionally try someone else's order
        let requester = if rng.gen_bool(0.1) { user } else { owner };
        let _ = ex.cancel_order(order_id, requester);
        return;
    }

    let (symbol, mid, tick) = if rng.gen_bool(0.7) {
        ("BTC_USDT", 40_000, 10)
    } else {
        ("ETH_USDT", 2_000, 1)
    };
    let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
    let qty = rng.gen_range(1..=50u64) * 1_000_000; // 0.01 .. 0.5
    let (order_type, price) = if rng.gen_bool(0.15) {
        (OrderType::Market, None)
    } else {
        let offset: i64 = rng.gen_range(-20..=20) * tick;
        (OrderType::Limit, Some(usdt(&(mid + offset).to_string())))
    };
    if let Ok(r) = ex.submit_order(user, symbol, side, order_type, qty, price) {
        placed.push((r.order.order_id, user));
    }
}
