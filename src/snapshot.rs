//! Exchange state snapshots
//!
//! Atomic snapshot creation with COMPLETE marker and CRC32 checksum
//! verification. A snapshot plus the WAL entries after its `wal_seq_id`
//! reconstruct the full exchange state.
//!
//! Layout:
//! ```text
//! {dir}/snapshot-{wal_seq_id}/state.bin
//! {dir}/snapshot-{wal_seq_id}/metadata.json
//! {dir}/snapshot-{wal_seq_id}/COMPLETE
//! {dir}/LATEST                      (name of the newest snapshot dir)
//! ```

use crate::core_types::{OrderId, SeqNum, SymbolId, TradeId};
use crate::ledger::BalanceRecord;
use crate::models::{Order, Trade};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

const FORMAT_VERSION: u32 = 1;
const LATEST: &str = "LATEST";

/// Per-symbol counters that are not derivable from orders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketState {
    pub symbol_id: SymbolId,
    pub match_seq: SeqNum,
    pub halted: bool,
}

/// Everything needed to rebuild an exchange
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeSnapshot {
    /// Last WAL entry reflected in this state (0 = no journal)
    pub wal_seq_id: SeqNum,
    /// Last assigned ids / sequence
    pub last_order_id: OrderId,
    pub last_trade_id: TradeId,
    pub last_seq: SeqNum,
    pub balances: Vec<BalanceRecord>,
    /// Every order, terminal ones included
    pub orders: Vec<Order>,
    /// Every trade, ordered by trade id
    pub trades: Vec<Trade>,
    pub markets: Vec<MarketState>,
}

// ============================================================
// Snapshot Metadata
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub wal_seq_id: u64,
    pub order_count: usize,
    pub trade_count: usize,
    pub balance_count: usize,
    pub state_checksum: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================
// Snapshotter
// ============================================================

pub struct Snapshotter {
    snapshot_dir: PathBuf,
}

impl Snapshotter {
    /// Create a new snapshotter
    pub fn new(snapshot_dir: impl AsRef<Path>) -> Self {
        Self {
            snapshot_dir: snapshot_dir.as_ref().to_path_buf(),
        }
    }

    /// Create an atomic snapshot
    ///
    /// Protocol:
    /// 1. Create .tmp-{timestamp}/
    /// 2. Write state.bin (bincode)
    /// 3. Calculate CRC32 checksum
    /// 4. Write metadata.json
    /// 5. Write COMPLETE marker
    /// 6. Atomic rename to snapshot-{seq}/
    /// 7. Point LATEST at it (write + rename)
    pub fn create_snapshot(&self, state: &ExchangeSnapshot) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.snapshot_dir)?;

        // 1. Create temporary directory
        let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let tmp_dir = self.snapshot_dir.join(format!(".tmp-{}", timestamp));
        fs::create_dir_all(&tmp_dir)?;

        // 2. Serialize state
        let bytes = bincode::serialize(state)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        {
            let file = File::create(tmp_dir.join("state.bin"))?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&bytes)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        // 3-4. Checksum + metadata
        let metadata = SnapshotMetadata {
            format_version: FORMAT_VERSION,
            wal_seq_id: state.wal_seq_id,
            order_count: state.orders.len(),
            trade_count: state.trades.len(),
            balance_count: state.balances.len(),
            state_checksum: calculate_crc32(&bytes),
            created_at: Utc::now(),
        };
        let metadata_json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(tmp_dir.join("metadata.json"), metadata_json)?;

        // 5. COMPLETE marker
        fs::write(tmp_dir.join("COMPLETE"), "")?;

        // 6. Atomic rename
        let name = format!("snapshot-{}", state.wal_seq_id);
        let snapshot_dir = self.snapshot_dir.join(&name);
        if snapshot_dir.exists() {
            fs::remove_dir_all(&snapshot_dir)?;
        }
        fs::rename(&tmp_dir, &snapshot_dir)?;

        // 7. Update LATEST pointer
        let pointer_tmp = self.snapshot_dir.join(".LATEST.tmp");
        fs::write(&pointer_tmp, &name)?;
        fs::rename(&pointer_tmp, self.snapshot_dir.join(LATEST))?;

        info!(
            path = %snapshot_dir.display(),
            wal_seq_id = state.wal_seq_id,
            orders = metadata.order_count,
            trades = metadata.trade_count,
            "snapshot created"
        );
        Ok(snapshot_dir)
    }

    /// Load the latest snapshot, verifying marker and checksum
    pub fn load_latest_snapshot(&self) -> io::Result<Option<(SnapshotMetadata, ExchangeSnapshot)>> {
        let pointer = self.snapshot_dir.join(LATEST);
        let name = match fs::read_to_string(&pointer) {
            Ok(name) => name,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let dir = self.snapshot_dir.join(name.trim());

        // Check COMPLETE marker
        if !dir.join("COMPLETE").exists() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Incomplete snapshot (missing COMPLETE marker)",
            ));
        }

        let metadata_json = fs::read_to_string(dir.join("metadata.json"))?;
        let metadata: SnapshotMetadata = serde_json::from_str(&metadata_json)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if metadata.format_version != FORMAT_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unsupported snapshot format {}", metadata.format_version),
            ));
        }

        let bytes = fs::read(dir.join("state.bin"))?;
        let calculated = calculate_crc32(&bytes);
        if calculated != metadata.state_checksum {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Checksum mismatch: expected {}, got {}",
                    metadata.state_checksum, calculated
                ),
            ));
        }

        let state: ExchangeSnapshot = bincode::deserialize(&bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some((metadata, state)))
    }
}

// ============================================================
// CRC32 Checksum
// ============================================================

fn calculate_crc32(data: &[u8]) -> String {
    format!("{:08x}", crc32fast::hash(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderStatus, OrderType, Side};

    fn temp_dir(name: &str) -> String {
        format!("target/test_snapshot_{}_{}", name, std::process::id())
    }

    fn sample_state() -> ExchangeSnapshot {
        let order = Order {
            order_id: 3,
            user_id: 1,
            symbol_id: 0,
            side: Side::Buy,
            order_type: OrderType::Limit,
            price: Some(100),
            protection_price: None,
            qty: 10,
            filled_qty: 4,
            status: OrderStatus::PartiallyFilled,
            seq: 3,
            lock_asset: 2,
            reserved: 6,
            created_at: 0,
        };
        ExchangeSnapshot {
            wal_seq_id: 12345,
            last_order_id: 3,
            last_trade_id: 0,
            last_seq: 3,
            balances: vec![BalanceRecord {
                user_id: 1,
                asset_id: 2,
                avail: 94,
                frozen: 6,
            }],
            orders: vec![order],
            trades: vec![],
            markets: vec![MarketState {
                symbol_id: 0,
                match_seq: 1,
                halted: false,
            }],
        }
    }

    #[test]
    fn test_snapshot_layout() {
        let dir = temp_dir("layout");
        let _ = fs::remove_dir_all(&dir);

        let snapshotter = Snapshotter::new(&dir);
        let path = snapshotter.create_snapshot(&ExchangeSnapshot::default()).unwrap();

        assert!(path.join("metadata.json").exists());
        assert!(path.join("state.bin").exists());
        assert!(path.join("COMPLETE").exists());
        assert_eq!(
            fs::read_to_string(PathBuf::from(&dir).join(LATEST)).unwrap(),
            "snapshot-0"
        );

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = temp_dir("restore");
        let _ = fs::remove_dir_all(&dir);

        let snapshotter = Snapshotter::new(&dir);
        assert!(snapshotter.load_latest_snapshot().unwrap().is_none());

        let state = sample_state();
        snapshotter.create_snapshot(&state).unwrap();

        let (metadata, loaded) = snapshotter.load_latest_snapshot().unwrap().unwrap();
        assert_eq!(metadata.wal_seq_id, 12345);
        assert_eq!(metadata.order_count, 1);
        assert_eq!(loaded, state);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_snapshot_checksum_integrity() {
        let dir = temp_dir("checksum");
        let _ = fs::remove_dir_all(&dir);

        let snapshotter = Snapshotter::new(&dir);
        let path = snapshotter.create_snapshot(&sample_state()).unwrap();

        let mut file = fs::OpenOptions::new()
            .write(true)
            .open(path.join("state.bin"))
            .unwrap();
        file.write_all(b"CORRUPTED_DATA").unwrap();
        drop(file);

        let err = snapshotter.load_latest_snapshot().unwrap_err();
        assert!(err.to_string().contains("Checksum mismatch"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_snapshot_missing_complete_marker() {
        let dir = temp_dir("incomplete");
        let _ = fs::remove_dir_all(&dir);

        let snapshotter = Snapshotter::new(&dir);
        let path = snapshotter.create_snapshot(&sample_state()).unwrap();
        fs::remove_file(path.join("COMPLETE")).unwrap();

        assert!(snapshotter.load_latest_snapshot().is_err());

        let _ = fs::remove_dir_all(&dir);
    }
}
