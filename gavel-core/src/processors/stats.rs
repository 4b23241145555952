use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide pipeline counters, shared by every consumer.
#[derive(Debug, Default)]
pub struct PipelineStats {
    records_processed: AtomicU64,
    malformed_records: AtomicU64,
    stale_notifications: AtomicU64,
    failed_batches: AtomicU64,
    commands_acked: AtomicU64,
    commands_nacked: AtomicU64,
    commands_dead_lettered: AtomicU64,
    reconciliation_passes: AtomicU64,
    reconciliation_added: AtomicU64,
    reconciliation_removed: AtomicU64,
    closures_enqueued: AtomicU64,
    popularity_windows: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub records_processed: u64,
    pub malformed_records: u64,
    pub stale_notifications: u64,
    pub failed_batches: u64,
    pub commands_acked: u64,
    pub commands_nacked: u64,
    pub commands_dead_lettered: u64,
    pub reconciliation_passes: u64,
    pub reconciliation_added: u64,
    pub reconciliation_removed: u64,
    pub closures_enqueued: u64,
    pub popularity_windows: u64,
}

fn add(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_processed(&self) {
        add(&self.records_processed, 1);
    }

    pub fn record_malformed(&self) {
        add(&self.malformed_records, 1);
    }

    pub fn record_stale(&self) {
        add(&self.stale_notifications, 1);
    }

    pub fn batch_failed(&self) {
        add(&self.failed_batches, 1);
    }

    pub fn command_acked(&self) {
        add(&self.commands_acked, 1);
    }

    pub fn command_nacked(&self) {
        add(&self.commands_nacked, 1);
    }

    pub fn command_dead_lettered(&self) {
        add(&self.commands_dead_lettered, 1);
    }

    pub fn reconciliation_pass(&self, added: usize, removed: usize) {
        add(&self.reconciliation_passes, 1);
        add(&self.reconciliation_added, added as u64);
        add(&self.reconciliation_removed, removed as u64);
    }

    pub fn closures_enqueued(&self, n: usize) {
        add(&self.closures_enqueued, n as u64);
    }

    pub fn popularity_window(&self) {
        add(&self.popularity_windows, 1);
    }

    pub fn malformed_records(&self) -> u64 {
        self.malformed_records.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            records_processed: load(&self.records_processed),
            malformed_records: load(&self.malformed_records),
            stale_notifications: load(&self.stale_notifications),
            failed_batches: load(&self.failed_batches),
            commands_acked: load(&self.commands_acked),
            commands_nacked: load(&self.commands_nacked),
            commands_dead_lettered: load(&self.commands_dead_lettered),
            reconciliation_passes: load(&self.reconciliation_passes),
            reconciliation_added: load(&self.reconciliation_added),
            reconciliation_removed: load(&self.reconciliation_removed),
            closures_enqueued: load(&self.closures_enqueued),
            popularity_windows: load(&self.popularity_windows),
        }
    }
}
