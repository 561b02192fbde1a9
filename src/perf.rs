//! Performance Metrics - Timing breakdown and latency sampling
//!
//! Collected by the driver binary around each exchange call.

use serde::Serialize;

/// Timing breakdown per phase plus sampled per-command latency
#[derive(Debug, Default)]
pub struct PerfMetrics {
    // Timing breakdown (nanoseconds)
    pub total_funding_ns: u64,
    pub total_submit_ns: u64,
    pub total_cancel_ns: u64,
    pub total_io_ns: u64,

    pub submitted: u64,
    pub rejected: u64,
    pub cancelled: u64,
    pub trades: u64,

    // Sampled every Nth command to keep memory bounded
    pub latency_samples: Vec<u64>,
    sample_rate: usize,
    sample_counter: usize,
}

/// Printable summary
#[derive(Debug, Clone, Serialize)]
pub struct PerfReport {
    pub submitted: u64,
    pub rejected: u64,
    pub cancelled: u64,
    pub trades: u64,
    pub p50_ns: Option<u64>,
    pub p99_ns: Option<u64>,
    pub max_ns: Option<u64>,
    /// (funding, submit, cancel, io) in percent of tracked time
    pub breakdown_pct: (f64, f64, f64, f64),
}

impl PerfMetrics {
    /// `sample_rate` of 0 is treated as 1
    pub fn new(sample_rate: usize) -> Self {
        PerfMetrics {
            sample_rate: sample_rate.max(1),
            latency_samples: Vec::with_capacity(10_000),
            ..Default::default()
        }
    }

    #[inline]
    pub fn add_latency(&mut self, latency_ns: u64) {
        self.sample_counter += 1;
        if self.sample_counter >= self.sample_rate {
            self.latency_samples.push(latency_ns);
            self.sample_counter = 0;
        }
    }

    #[inline]
    pub fn add_funding_time(&mut self, ns: u64) {
        self.total_funding_ns += ns;
    }

    #[inline]
    pub fn add_submit_time(&mut self, ns: u64) {
        self.total_submit_ns += ns;
        self.add_latency(ns);
    }

    #[inline]
    pub fn add_cancel_time(&mut self, ns: u64) {
        self.total_cancel_ns += ns;
        self.add_latency(ns);
    }

    #[inline]
    pub fn add_io_time(&mut self, ns: u64) {
        self.total_io_ns += ns;
    }

    /// `p` in 0..=100
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.latency_samples.is_empty() {
            return None;
        }
        let mut sorted = self.latency_samples.clone();
        sorted.sort_unstable();
        let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    pub fn min_latency(&self) -> Option<u64> {
        self.latency_samples.iter().copied().min()
    }

    pub fn max_latency(&self) -> Option<u64> {
        self.latency_samples.iter().copied().max()
    }

    pub fn total_tracked_ns(&self) -> u64 {
        self.total_funding_ns + self.total_submit_ns + self.total_cancel_ns + self.total_io_ns
    }

    pub fn breakdown_pct(&self) -> (f64, f64, f64, f64) {
        let total = self.total_tracked_ns() as f64;
        if total == 0.0 {
            return (0.0, 0.0, 0.0, 0.0);
        }
        (
            self.total_funding_ns as f64 / total * 100.0,
            self.total_submit_ns as f64 / total * 100.0,
            self.total_cancel_ns as f64 / total * 100.0,
            self.total_io_ns as f64 / total * 100.0,
        )
    }

    pub fn report(&self) -> PerfReport {
        PerfReport {
            submitted: self.submitted,
            rejected: self.rejected,
            cancelled: self.cancelled,
            trades: self.trades,
            p50_ns: self.percentile(50.0),
            p99_ns: self.percentile(99.0),
            max_ns: self.max_latency(),
            breakdown_pct: self.breakdown_pct(),
        }
    }
}
