//! Metric names and recording helpers
//!
//! Recording goes through the `metrics` facade; without an installed
//! recorder every call is a no-op.

use ::metrics::{describe_counter, describe_gauge, describe_histogram, histogram};
use std::time::Instant;

pub const REPOS_OPENED: &str = "store.repos.opened";
pub const ENTRIES_APPENDED: &str = "store.entries.appended";
pub const NOTIFICATIONS_EMITTED: &str = "store.notifications.emitted";
pub const REPLICATION_PROGRESS: &str = "store.replication.have";
pub const SNAPSHOT_PUBLISHED: &str = "snapshot.published";
pub const SNAPSHOT_APPLIED: &str = "snapshot.applied";
pub const SNAPSHOT_FAILED: &str = "snapshot.failed";
pub const SNAPSHOT_SIZE: &str = "snapshot.size_bytes";
pub const SNAPSHOT_APPLY_DURATION: &str = "snapshot.apply.duration_ms";
pub const CERTIFICATES_REJECTED: &str = "certificates.rejected";

/// Register descriptions for every metric the node records
pub fn init_metrics() {
    describe_counter!(REPOS_OPENED, "Number of per-address stores opened");
    describe_counter!(ENTRIES_APPENDED, "Entries appended locally to any store");
    describe_counter!(NOTIFICATIONS_EMITTED, "Notifications delivered to the front layer");
    describe_gauge!(REPLICATION_PROGRESS, "Entries held by the most recently replicating store");
    describe_counter!(SNAPSHOT_PUBLISHED, "Snapshot pointers published by this producer");
    describe_counter!(SNAPSHOT_APPLIED, "Snapshots imported by this consumer");
    describe_counter!(SNAPSHOT_FAILED, "Snapshot sync attempts that failed");
    describe_histogram!(SNAPSHOT_SIZE, "Size of produced snapshot blobs in bytes");
    describe_histogram!(SNAPSHOT_APPLY_DURATION, "Snapshot fetch and import duration in milliseconds");
    describe_counter!(CERTIFICATES_REJECTED, "Certificates refused by the ledger");
}

/// Timer for measuring operation duration
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self { name, start: Instant::now() }
    }

    /// Stop the timer and record the duration in milliseconds
    pub fn stop(self) {
        histogram!(self.name).record(self.start.elapsed().as_secs_f64() * 1000.0);
    }
}
