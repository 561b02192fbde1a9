//! Write-Ahead Log (WAL) - command journal
//!
//! Every accepted state-changing command (deposit, withdraw, submit,
//! cancel) is appended as one JSON line. Replaying the journal in order
//! against an empty exchange rebuilds books, orders, trades and balances.
//!
//! # Design Principles
//!
//! 1. **Append-Only**: Sequential writes for maximum I/O performance
//! 2. **Group Commit**: Batch multiple entries before fsync for throughput
//! 3. **Deterministic Replay**: Submits record the order id, its priority
//!    sequence and the resolved market-buy cap, so replay does not depend on
//!    the live price feed or on cross-symbol interleaving
//!
//! The exchange holds the journal mutex from before a command's first
//! balance change until its entry is appended, so the journal order is the
//! global execution order, deposits and withdrawals included.

use crate::core_types::{AssetId, OrderId, SeqNum, UserId};
use crate::exchange::Exchange;
use crate::order_manager::OrderRequest;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// ============================================================
// WAL ENTRY FORMAT
// ============================================================

/// One journaled command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WalCommand {
    Deposit {
        user_id: UserId,
        asset_id: AssetId,
        amount: u64,
    },
    Withdraw {
        user_id: UserId,
        asset_id: AssetId,
        amount: u64,
    },
    Submit {
        order_id: OrderId,
        seq: SeqNum,
        request: OrderRequest,
        protection_price: Option<u64>,
    },
    Cancel {
        order_id: OrderId,
        user_id: UserId,
    },
}

/// WAL entry - a single command record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEntry {
    pub seq_id: SeqNum,
    pub timestamp_ns: i64,
    #[serde(flatten)]
    pub command: WalCommand,
}

impl WalEntry {
    pub fn new(seq_id: SeqNum, command: WalCommand) -> Self {
        Self {
            seq_id,
            timestamp_ns: chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            command,
        }
    }
}

// ============================================================
// WAL WRITER
// ============================================================

/// WAL configuration
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Path to WAL file
    pub path: PathBuf,
    /// Entries to buffer before auto-flush (0 = manual flush only)
    pub flush_interval_entries: usize,
    /// Whether to sync to disk on flush
    pub sync_on_flush: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/wal/commands.wal"),
            flush_interval_entries: 100,
            sync_on_flush: true,
        }
    }
}

/// Write-Ahead Log writer
///
/// Not internally synchronized; the exchange keeps it behind a mutex.
pub struct WalWriter {
    writer: BufWriter<File>,
    next_seq: SeqNum,
    pending_count: usize,
    config: WalConfig,
    // Stats
    total_entries: u64,
    total_bytes: u64,
}

impl WalWriter {
    /// Create a new WAL writer
    ///
    /// Creates the parent directory if it doesn't exist. Appends to an
    /// existing journal, continuing its sequence.
    pub fn new(config: WalConfig) -> io::Result<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        truncate_torn_tail(&config.path)?;
        let (_, last_seq) = WalReader::new(&config.path).replay(|_| Ok(()))?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)?;

        let writer = BufWriter::with_capacity(64 * 1024, file); // 64KB buffer

        Ok(Self {
            writer,
            next_seq: last_seq + 1,
            pending_count: 0,
            config,
            total_entries: 0,
            total_bytes: 0,
        })
    }

    /// Append a command to the WAL
    ///
    /// Returns the assigned sequence number.
    /// Does NOT flush immediately (use group commit).
    pub fn append(&mut self, command: WalCommand) -> io::Result<SeqNum> {
        let seq_id = self.next_seq;
        let entry = WalEntry::new(seq_id, command);
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        self.writer.write_all(&line)?;
        self.next_seq += 1;
        self.pending_count += 1;
        self.total_entries += 1;
        self.total_bytes += line.len() as u64;

        // Auto-flush if configured
        if self.config.flush_interval_entries > 0
            && self.pending_count >= self.config.flush_interval_entries
        {
            self.flush()?;
        }

        Ok(seq_id)
    }

    /// Flush buffered writes to disk
    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()?;

        if self.config.sync_on_flush {
            self.writer.get_ref().sync_data()?;
        }

        self.pending_count = 0;
        Ok(())
    }

    /// Get current sequence number (last assigned)
    pub fn current_seq(&self) -> SeqNum {
        self.next_seq.saturating_sub(1)
    }

    /// Get number of pending (unflushed) entries
    pub fn pending_count(&self) -> usize {
        self.pending_count
    }

    /// Get total entries written by this writer
    pub fn total_entries(&self) -> u64 {
        self.total_entries
    }

    /// Get total bytes written by this writer
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

/// Cut a partial last line left by a crash so new entries start clean
fn truncate_torn_tail(path: &Path) -> io::Result<()> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if bytes.last().is_some_and(|b| *b != b'\n') {
        let keep = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |p| p + 1);
        warn!(
            path = %path.display(),
            dropped = bytes.len() - keep,
            "truncating torn WAL tail"
        );
        OpenOptions::new().write(true).open(path)?.set_len(keep as u64)?;
    }
    Ok(())
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, "WAL flush on drop failed");
        }
    }
}

// ============================================================
// WAL READER (for replay/recovery)
// ============================================================

/// WAL reader for recovery
pub struct WalReader {
    path: PathBuf,
}

impl WalReader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Replay WAL entries, calling the callback for each
    ///
    /// Returns the number of entries replayed and the last seq_id.
    /// A torn final line (crash mid-write) is skipped with a warning;
    /// corruption anywhere else is an error.
    pub fn replay<F>(&self, mut callback: F) -> io::Result<(u64, SeqNum)>
    where
        F: FnMut(WalEntry) -> io::Result<()>,
    {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok((0, 0)); // No WAL file, fresh start
            }
            Err(e) => return Err(e),
        };

        let mut lines = BufReader::new(file).lines().peekable();
        let mut count = 0u64;
        let mut last_seq = 0;

        while let Some(line) = lines.next() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: WalEntry = match serde_json::from_str(&line) {
                Ok(entry) => entry,
                Err(e) if lines.peek().is_none() => {
                    warn!(error = %e, "skipping torn WAL tail");
                    break;
                }
                Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
            };
            if entry.seq_id <= last_seq {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("WAL sequence regressed: {} after {}", entry.seq_id, last_seq),
                ));
            }
            last_seq = entry.seq_id;
            callback(entry)?;
            count += 1;
        }

        Ok((count, last_seq))
    }
}

/// Re-apply every journaled command to `exchange` in order.
///
/// `exchange` should be freshly built from the same configuration and have
/// no journal attached.
pub fn replay(path: impl AsRef<Path>, exchange: &Exchange) -> io::Result<(u64, SeqNum)> {
    replay_after(path, exchange, 0)
}

/// Like [`replay`], skipping entries already covered by a snapshot
pub fn replay_after(
    path: impl AsRef<Path>,
    exchange: &Exchange,
    after_seq: SeqNum,
) -> io::Result<(u64, SeqNum)> {
    let mut applied = 0u64;
    let (_, last_seq) = WalReader::new(path.as_ref()).replay(|entry| {
        if entry.seq_id <= after_seq {
            return Ok(());
        }
        applied += 1;
        exchange
            .apply_command(&entry.command)
            .map_err(|e| io::Error::other(format!("replay seq {}: {e}", entry.seq_id)))
    })?;
    info!(applied, after_seq, last_seq, path = %path.as_ref().display(), "WAL replayed");
    Ok((applied, last_seq))
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use std::fs;

    fn test_wal_path(name: &str) -> PathBuf {
        PathBuf::from(format!("target/test_wal_{}_{}.wal", name, std::process::id()))
    }

    fn config(path: &Path, flush_interval_entries: usize) -> WalConfig {
        WalConfig {
            path: path.to_path_buf(),
            flush_interval_entries,
            sync_on_flush: false,
        }
    }

    fn submit(order_id: u64) -> WalCommand {
        WalCommand::Submit {
            order_id,
            seq: order_id,
            request: OrderRequest::limit(100, "BTC_USDT", Side::Buy, 10_000, 1_000),
            protection_price: None,
        }
    }

    #[test]
    fn test_wal_write_and_read() {
        let path = test_wal_path("rw");
        let _ = fs::remove_file(&path);

        {
            let mut wal = WalWriter::new(config(&path, 0)).unwrap();
            assert_eq!(wal.append(submit(1)).unwrap(), 1);
            assert_eq!(
                wal.append(WalCommand::Cancel {
                    order_id: 1,
                    user_id: 100
                })
                .unwrap(),
                2
            );
            assert_eq!(wal.pending_count(), 2);
            assert_eq!(wal.total_entries(), 2);

            wal.flush().unwrap();
            assert_eq!(wal.pending_count(), 0);
        }

        let mut entries = Vec::new();
        let (count, last_seq) = WalReader::new(&path)
            .replay(|e| {
                entries.push(e);
                Ok(())
            })
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(last_seq, 2);
        assert_eq!(entries[0].command, submit(1));
        assert!(matches!(
            entries[1].command,
            WalCommand::Cancel { order_id: 1, .. }
        ));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_wal_auto_flush() {
        let path = test_wal_path("auto");
        let _ = fs::remove_file(&path);

        let mut wal = WalWriter::new(config(&path, 3)).unwrap();

        wal.append(submit(1)).unwrap();
        wal.append(submit(2)).unwrap();
        assert_eq!(wal.pending_count(), 2);

        // 3rd entry triggers auto-flush
        wal.append(submit(3)).unwrap();
        assert_eq!(wal.pending_count(), 0);

        drop(wal);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_wal_reopen_continues_sequence() {
        let path = test_wal_path("reopen");
        let _ = fs::remove_file(&path);

        {
            let mut wal = WalWriter::new(config(&path, 0)).unwrap();
            wal.append(submit(1)).unwrap();
            wal.append(submit(2)).unwrap();
        }
        let mut wal = WalWriter::new(config(&path, 0)).unwrap();
        assert_eq!(wal.current_seq(), 2);
        assert_eq!(wal.append(submit(3)).unwrap(), 3);

        drop(wal);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_wal_torn_tail_is_skipped() {
        let path = test_wal_path("torn");
        let _ = fs::remove_file(&path);

        {
            let mut wal = WalWriter::new(config(&path, 0)).unwrap();
            wal.append(submit(1)).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"seq_id\":2,\"timesta").unwrap();
        drop(file);

        let (count, last_seq) = WalReader::new(&path).replay(|_| Ok(())).unwrap();
        assert_eq!((count, last_seq), (1, 1));

        // Reopening cuts the torn bytes and continues cleanly
        {
            let mut wal = WalWriter::new(config(&path, 0)).unwrap();
            assert_eq!(wal.append(submit(2)).unwrap(), 2);
        }
        let (count, last_seq) = WalReader::new(&path).replay(|_| Ok(())).unwrap();
        assert_eq!((count, last_seq), (2, 2));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_wal_entry_format() {
        let entry = WalEntry {
            seq_id: 1,
            timestamp_ns: 1234567890,
            command: WalCommand::Deposit {
                user_id: 7,
                asset_id: 2,
                amount: 500,
            },
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(
            json,
            r#"{"seq_id":1,"timestamp_ns":1234567890,"op":"deposit","user_id":7,"asset_id":2,"amount":500}"#
        );
    }
}
