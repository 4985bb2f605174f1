//! Atomic counters for runtime observability.
//!
//! All counters use relaxed ordering; they are diagnostic only.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::violation::ViolationKind;

/// Per-runtime operation counters.
#[derive(Debug)]
pub struct RuntimeMetrics {
    /// Dereference, call and bulk checks executed.
    pub checks: AtomicU64,
    /// Metadata writes into the trie.
    pub metadata_stores: AtomicU64,
    /// Metadata reads from the trie.
    pub metadata_loads: AtomicU64,
    /// `copy_metadata` calls that moved at least one entry.
    pub metadata_copies: AtomicU64,
    /// Shadow stack frames pushed.
    pub frames_pushed: AtomicU64,
    pub heap_allocations: AtomicU64,
    pub heap_deallocations: AtomicU64,
    pub stack_allocations: AtomicU64,
    pub stack_deallocations: AtomicU64,
    /// Violations reported but not acted on (continue / silent policy).
    pub suppressed_violations: AtomicU64,
    pub spatial_violations: AtomicU64,
    pub temporal_violations: AtomicU64,
    pub resource_violations: AtomicU64,
    pub protocol_violations: AtomicU64,
    /// Entry points that ran while the runtime was still being built and
    /// therefore checked nothing.
    pub skipped_during_init: AtomicU64,
}

impl RuntimeMetrics {
    /// Create a new zeroed metrics instance.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            checks: AtomicU64::new(0),
            metadata_stores: AtomicU64::new(0),
            metadata_loads: AtomicU64::new(0),
            metadata_copies: AtomicU64::new(0),
            frames_pushed: AtomicU64::new(0),
            heap_allocations: AtomicU64::new(0),
            heap_deallocations: AtomicU64::new(0),
            stack_allocations: AtomicU64::new(0),
            stack_deallocations: AtomicU64::new(0),
            suppressed_violations: AtomicU64::new(0),
            spatial_violations: AtomicU64::new(0),
            temporal_violations: AtomicU64::new(0),
            resource_violations: AtomicU64::new(0),
            protocol_violations: AtomicU64::new(0),
            skipped_during_init: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Count a violation that was reported without terminating.
    pub fn record_suppressed(&self, kind: ViolationKind) {
        Self::inc(&self.suppressed_violations);
        Self::inc(match kind {
            ViolationKind::Spatial => &self.spatial_violations,
            ViolationKind::Temporal => &self.temporal_violations,
            ViolationKind::Resource => &self.resource_violations,
            ViolationKind::Protocol => &self.protocol_violations,
        });
    }

    /// Snapshot all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            checks: Self::get(&self.checks),
            metadata_stores: Self::get(&self.metadata_stores),
            metadata_loads: Self::get(&self.metadata_loads),
            metadata_copies: Self::get(&self.metadata_copies),
            // Owned by the trie; the runtime fills it in.
            secondary_tables: 0,
            frames_pushed: Self::get(&self.frames_pushed),
            heap_allocations: Self::get(&self.heap_allocations),
            heap_deallocations: Self::get(&self.heap_deallocations),
            stack_allocations: Self::get(&self.stack_allocations),
            stack_deallocations: Self::get(&self.stack_deallocations),
            suppressed_violations: Self::get(&self.suppressed_violations),
            spatial_violations: Self::get(&self.spatial_violations),
            temporal_violations: Self::get(&self.temporal_violations),
            resource_violations: Self::get(&self.resource_violations),
            protocol_violations: Self::get(&self.protocol_violations),
            skipped_during_init: Self::get(&self.skipped_during_init),
        }
    }
}

impl Default for RuntimeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of all counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub checks: u64,
    pub metadata_stores: u64,
    pub metadata_loads: u64,
    pub metadata_copies: u64,
    pub secondary_tables: u64,
    pub frames_pushed: u64,
    pub heap_allocations: u64,
    pub heap_deallocations: u64,
    pub stack_allocations: u64,
    pub stack_deallocations: u64,
    pub suppressed_violations: u64,
    pub spatial_violations: u64,
    pub temporal_violations: u64,
    pub resource_violations: u64,
    pub protocol_violations: u64,
    pub skipped_during_init: u64,
}

/// Global metrics instance.
static GLOBAL_METRICS: RuntimeMetrics = RuntimeMetrics::new();

/// Access the global metrics singleton.
#[must_use]
pub fn global_metrics() -> &'static RuntimeMetrics {
    &GLOBAL_METRICS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let m = RuntimeMetrics::new();
        let snap = m.snapshot();
        assert_eq!(snap.checks, 0);
        assert_eq!(snap.suppressed_violations, 0);
    }

    #[test]
    fn increment_works() {
        let m = RuntimeMetrics::new();
        RuntimeMetrics::inc(&m.checks);
        RuntimeMetrics::inc(&m.checks);
        RuntimeMetrics::inc(&m.frames_pushed);
        let snap = m.snapshot();
        assert_eq!(snap.checks, 2);
        assert_eq!(snap.frames_pushed, 1);
    }

    #[test]
    fn suppressed_violations_are_classified() {
        let m = RuntimeMetrics::new();
        m.record_suppressed(ViolationKind::Temporal);
        m.record_suppressed(ViolationKind::Temporal);
        m.record_suppressed(ViolationKind::Resource);
        let snap = m.snapshot();
        assert_eq!(snap.suppressed_violations, 3);
        assert_eq!(snap.temporal_violations, 2);
        assert_eq!(snap.resource_violations, 1);
        assert_eq!(snap.spatial_violations, 0);
    }

    #[test]
    fn snapshot_serializes_every_counter() {
        let m = RuntimeMetrics::new();
        RuntimeMetrics::inc(&m.metadata_copies);
        let json = serde_json::to_value(m.snapshot()).expect("serialize");
        let obj = json.as_object().expect("object");
        assert_eq!(obj.len(), 16);
        assert_eq!(obj["skipped_during_init"], 0);
        assert_eq!(obj["metadata_copies"], 1);
        assert_eq!(obj["heap_allocations"], 0);
    }
}
