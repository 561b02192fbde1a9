//! spot_engine - batch driver
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────┐    ┌──────────┐
//! │  Config  │───▶│ Recovery │───▶│ Exchange │───▶│  Output  │
//! │  (YAML)  │    │(Snap+WAL)│    │ (Match)  │    │  (CSV)   │
//! └──────────┘    └──────────┘    └──────────┘    └──────────┘
//! ```
//!
//! Usage: `spot_engine [--env dev] [--input fixtures] [--output output]`

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, warn};

use spot_engine::config::AppConfig;
use spot_engine::csv_io::{
    self, BALANCES_FINAL_CSV, BALANCES_INIT_CSV, InputAction, ORDERBOOK_CSV, ORDERS_CSV, TRADES_CSV,
};
use spot_engine::exchange::Exchange;
use spot_engine::models::OrderStatus;
use spot_engine::perf::PerfMetrics;
use spot_engine::snapshot::Snapshotter;
use spot_engine::wal::{self, WalWriter};
use spot_engine::{OrderId, OrderType};

fn arg_value(flags: &[&str], default: &str) -> String {
    let args: Vec<String> = std::env::args().collect();
    args.windows(2)
        .find(|w| flags.contains(&w[0].as_str()))
        .map(|w| w[1].clone())
        .unwrap_or_else(|| default.to_string())
}

#[inline]
fn elapsed_ns(start: Instant) -> u64 {
    start.elapsed().as_nanos() as u64
}

/// Restore the newest snapshot, then replay the journal past it.
/// Returns true when any prior state was found.
fn recover(exchange: &Exchange, config: &AppConfig) -> Result<bool> {
    let persistence = &config.persistence;
    let snapshotter = Snapshotter::new(persistence.snapshot_dir());
    let after_seq = match snapshotter
        .load_latest_snapshot()
        .context("Failed to load snapshot")?
    {
        Some((meta, state)) => {
            exchange
                .restore(&state)
                .context("Failed to restore snapshot")?;
            info!(wal_seq_id = meta.wal_seq_id, created_at = %meta.created_at, "snapshot loaded");
            Some(meta.wal_seq_id)
        }
        None => None,
    };

    let wal_path = persistence.wal_path();
    let replayed = if wal_path.exists() {
        let (applied, _) = wal::replay_after(&wal_path, exchange, after_seq.unwrap_or(0))
            .context("WAL replay failed")?;
        applied
    } else {
        0
    };
    Ok(after_seq.is_some() || replayed > 0)
}

fn main() -> Result<()> {
    let env = arg_value(&["--env", "-e"], "dev");
    let input_dir = PathBuf::from(arg_value(&["--input"], "fixtures"));
    let output_dir = PathBuf::from(arg_value(&["--output"], "output"));

    let config = AppConfig::load(&env)?;
    let _log_guard = spot_engine::logging::init_logging(&config);
    info!(env = %env, version = env!("GIT_HASH"), "starting spot_engine");

    let start_time = Instant::now();
    let mut perf = PerfMetrics::new(config.sample_rate);

    // Step 1: Build exchange
    let symbols = config.symbol_manager()?;
    let mut exchange = Exchange::new(symbols, config.engine_settings());

    // Step 2: Recovery + journal
    let mut recovered = false;
    if config.persistence.enabled {
        fs::create_dir_all(&config.persistence.data_dir)
            .with_context(|| format!("Failed to create {}", config.persistence.data_dir))?;
        recovered = recover(&exchange, &config)?;
        let writer = WalWriter::new(config.persistence.wal_config()).context("Failed to open WAL")?;
        exchange = exchange.with_journal(writer);
    }

    // Step 3: Initial balances (skipped when state was recovered)
    if recovered {
        warn!("prior state recovered, skipping {}", BALANCES_INIT_CSV);
    } else {
        let t = Instant::now();
        let balances = csv_io::load_balances(&input_dir.join(BALANCES_INIT_CSV), exchange.symbols())?;
        for b in &balances {
            exchange
                .deposit(b.user_id, b.asset_id, b.amount)
                .with_context(|| format!("Initial deposit for user {}", b.user_id))?;
        }
        perf.add_funding_time(elapsed_ns(t));
        println!("Deposited {} initial balances", balances.len());
    }

    // Step 4: Orders
    let orders = csv_io::load_orders(&input_dir.join(ORDERS_CSV), exchange.symbols())?;
    println!("Loaded {} commands", orders.len());

    let exec_start = Instant::now();
    // client order id -> exchange order id
    let mut id_map: HashMap<OrderId, OrderId> = HashMap::new();
    for input in &orders {
        let t = Instant::now();
        match &input.action {
            InputAction::Place {
                symbol,
                side,
                order_type,
                price,
                qty,
            } => {
                let result =
                    exchange.submit_order(input.user_id, symbol, *side, *order_type, *qty, *price);
                perf.add_submit_time(elapsed_ns(t));
                match result {
                    Ok(r) => {
                        perf.submitted += 1;
                        perf.trades += r.trades.len() as u64;
                        id_map.insert(input.order_id, r.order.order_id);
                    }
                    Err(_) => perf.rejected += 1,
                }
            }
            InputAction::Cancel => {
                let Some(&order_id) = id_map.get(&input.order_id) else {
                    warn!(client_order_id = input.order_id, "cancel for unknown order");
                    continue;
                };
                let result = exchange.cancel_order(order_id, input.user_id);
                perf.add_cancel_time(elapsed_ns(t));
                if result.is_ok() {
                    perf.cancelled += 1;
                }
            }
        }
    }
    let exec_time = exec_start.elapsed();

    // Step 5: Dump final state
    let t = Instant::now();
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let state = exchange.snapshot();
    let resting: Vec<_> = state
        .orders
        .iter()
        .filter(|o| {
            o.order_type == OrderType::Limit
                && matches!(o.status, OrderStatus::Open | OrderStatus::PartiallyFilled)
        })
        .cloned()
        .collect();
    csv_io::dump_balances(&state.balances, &output_dir.join(BALANCES_FINAL_CSV))?;
    csv_io::dump_orderbook(&resting, exchange.symbols(), &output_dir.join(ORDERBOOK_CSV))?;
    csv_io::dump_trades(&state.trades, exchange.symbols(), &output_dir.join(TRADES_CSV))?;

    if config.persistence.enabled {
        exchange.flush_journal().context("Failed to flush WAL")?;
        let snapshot = exchange.snapshot();
        Snapshotter::new(config.persistence.snapshot_dir())
            .create_snapshot(&snapshot)
            .context("Failed to write snapshot")?;
    }
    perf.add_io_time(elapsed_ns(t));

    // Step 6: Summary
    write_summary(&output_dir, &perf, orders.len(), exec_time, start_time)?;
    Ok(())
}

fn write_summary(
    output_dir: &Path,
    perf: &PerfMetrics,
    commands: usize,
    exec_time: std::time::Duration,
    start_time: Instant,
) -> Result<()> {
    let report = perf.report();
    let per_sec = commands as f64 / exec_time.as_secs_f64().max(f64::EPSILON);
    let (funding, submit, cancel, io) = report.breakdown_pct;

    let summary = format!(
        r#"=== Execution Summary ===
Commands: {}
  Submitted: {}
  Rejected:  {}
  Cancelled: {}
Trades: {}
Execution Time: {:.2?}
Throughput: {:.0} commands/sec
Total Time: {:.2?}

=== Performance Breakdown ===
  Funding: {:>5.1}%
  Submit:  {:>5.1}%
  Cancel:  {:>5.1}%
  IO:      {:>5.1}%

=== Latency (sampled) ===
  P50: {:>8} ns
  P99: {:>8} ns
  Max: {:>8} ns
"#,
        commands,
        report.submitted,
        report.rejected,
        report.cancelled,
        report.trades,
        exec_time,
        per_sec,
        start_time.elapsed(),
        funding,
        submit,
        cancel,
        io,
        report.p50_ns.unwrap_or(0),
        report.p99_ns.unwrap_or(0),
        report.max_ns.unwrap_or(0),
    );
    println!("\n{}", summary);

    let path = output_dir.join("t2_summary.txt");
    fs::write(&path, &summary).with_context(|| format!("Failed to write {}", path.display()))?;
    let json_path = output_dir.join("t2_perf.json");
    fs::write(&json_path, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("Failed to write {}", json_path.display()))?;
    Ok(())
}
