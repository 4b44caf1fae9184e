//! Running counters for a bridge process.
//!
//! Shared between the publisher and collector threads; all updates are
//! relaxed atomic increments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for one bridge session.
#[derive(Debug)]
pub struct BridgeStats {
    /// Raw characteristic reads that returned a payload
    device_reads: AtomicU64,
    /// Samples pushed onto outlets
    samples_published: AtomicU64,
    /// Collection cycles that yielded a sample on every stream
    cycles_collected: AtomicU64,
    /// Collection cycles abandoned because a stream failed
    cycles_failed: AtomicU64,
    session_start: DateTime<Utc>,
}

impl BridgeStats {
    pub fn new() -> Self {
        Self {
            device_reads: AtomicU64::new(0),
            samples_published: AtomicU64::new(0),
            cycles_collected: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            session_start: Utc::now(),
        }
    }

    pub fn record_device_read(&self) {
        self.device_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample_published(&self) {
        self.samples_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle_collected(&self) {
        self.cycles_collected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle_failed(&self) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            device_reads: self.device_reads.load(Ordering::Relaxed),
            samples_published: self.samples_published.load(Ordering::Relaxed),
            cycles_collected: self.cycles_collected.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Bridge Statistics:\n\
             - Device reads: {}\n\
             - Samples published: {}\n\
             - Cycles collected: {}\n\
             - Cycles failed: {}\n\
             - Session duration: {} seconds",
            stats.device_reads,
            stats.samples_published,
            stats.cycles_collected,
            stats.cycles_failed,
            stats.session_duration_secs
        )
    }
}

impl Default for BridgeStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`BridgeStats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub device_reads: u64,
    pub samples_published: u64,
    pub cycles_collected: u64,
    pub cycles_failed: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Thread-safe shared stats.
pub type SharedBridgeStats = Arc<BridgeStats>;

/// Create a new shared stats block.
pub fn create_shared_stats() -> SharedBridgeStats {
    Arc::new(BridgeStats::new())
}
