use std::sync::atomic::{AtomicU64, Ordering};

use crate::classify::WorkloadKind;

/// Counters for the layer's interception activity.
///
/// Updated with relaxed atomics from whichever application thread is inside the layer; readers
/// only ever see a best-effort snapshot.
#[derive(Debug, Default)]
pub struct LayerStats {
    resolved_local: AtomicU64,
    resolved_delegate: AtomicU64,
    resolved_not_found: AtomicU64,

    intercepted_calls: AtomicU64,
    /// Intercepted calls forwarded verbatim because the device context was not ready.
    fail_open_calls: AtomicU64,
    rewritten_structures: AtomicU64,
    forwarding_failures: AtomicU64,

    pipelines_recorded: AtomicU64,
    pipelines_touched: AtomicU64,
    pipelines_evicted: AtomicU64,

    submits_compute: AtomicU64,
    submits_transfer: AtomicU64,
    submits_graphics: AtomicU64,
}

impl LayerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_resolved_local(&self) {
        self.resolved_local.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_resolved_delegate(&self) {
        self.resolved_delegate.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_resolved_not_found(&self) {
        self.resolved_not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_intercepted_calls(&self) {
        self.intercepted_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fail_open_calls(&self) {
        self.fail_open_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_rewritten_structures(&self, count: u64) {
        self.rewritten_structures
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_forwarding_failures(&self) {
        self.forwarding_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_pipelines_recorded(&self, count: u64) {
        self.pipelines_recorded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_pipelines_touched(&self, count: u64) {
        self.pipelines_touched.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_pipelines_evicted(&self) {
        self.pipelines_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_submits(&self, kind: WorkloadKind, count: u64) {
        let counter = match kind {
            WorkloadKind::Compute => &self.submits_compute,
            WorkloadKind::Transfer => &self.submits_transfer,
            WorkloadKind::Graphics => &self.submits_graphics,
        };
        counter.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LayerStatsSnapshot {
        LayerStatsSnapshot {
            resolved_local: self.resolved_local.load(Ordering::Relaxed),
            resolved_delegate: self.resolved_delegate.load(Ordering::Relaxed),
            resolved_not_found: self.resolved_not_found.load(Ordering::Relaxed),
            intercepted_calls: self.intercepted_calls.load(Ordering::Relaxed),
            fail_open_calls: self.fail_open_calls.load(Ordering::Relaxed),
            rewritten_structures: self.rewritten_structures.load(Ordering::Relaxed),
            forwarding_failures: self.forwarding_failures.load(Ordering::Relaxed),
            pipelines_recorded: self.pipelines_recorded.load(Ordering::Relaxed),
            pipelines_touched: self.pipelines_touched.load(Ordering::Relaxed),
            pipelines_evicted: self.pipelines_evicted.load(Ordering::Relaxed),
            submits_compute: self.submits_compute.load(Ordering::Relaxed),
            submits_transfer: self.submits_transfer.load(Ordering::Relaxed),
            submits_graphics: self.submits_graphics.load(Ordering::Relaxed),
        }
    }

    /// Returns a JSON object as a string.
    pub fn to_json(&self) -> String {
        self.snapshot().to_json()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerStatsSnapshot {
    pub resolved_local: u64,
    pub resolved_delegate: u64,
    pub resolved_not_found: u64,
    pub intercepted_calls: u64,
    pub fail_open_calls: u64,
    pub rewritten_structures: u64,
    pub forwarding_failures: u64,
    pub pipelines_recorded: u64,
    pub pipelines_touched: u64,
    pub pipelines_evicted: u64,
    pub submits_compute: u64,
    pub submits_transfer: u64,
    pub submits_graphics: u64,
}

impl LayerStatsSnapshot {
    pub fn to_json(self) -> String {
        // Hand-built so the layer does not pull a serializer into the application's process.
        format!(
            concat!(
                "{{\"resolve\":{{\"local\":{},\"delegate\":{},\"not_found\":{}}},",
                "\"intercepted_calls\":{},\"fail_open_calls\":{},",
                "\"rewritten_structures\":{},\"forwarding_failures\":{},",
                "\"pipelines\":{{\"recorded\":{},\"touched\":{},\"evicted\":{}}},",
                "\"submits\":{{\"compute\":{},\"transfer\":{},\"graphics\":{}}}}}"
            ),
            self.resolved_local,
            self.resolved_delegate,
            self.resolved_not_found,
            self.intercepted_calls,
            self.fail_open_calls,
            self.rewritten_structures,
            self.forwarding_failures,
            self.pipelines_recorded,
            self.pipelines_touched,
            self.pipelines_evicted,
            self.submits_compute,
            self.submits_transfer,
            self.submits_graphics,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_json_contains_counters() {
        let stats = LayerStats::new();
        stats.inc_resolved_local();
        stats.inc_resolved_local();
        stats.inc_fail_open_calls();
        stats.add_pipelines_recorded(3);
        stats.add_submits(WorkloadKind::Transfer, 2);

        let json = stats.to_json();
        assert!(json.contains("\"resolve\":{\"local\":2,"));
        assert!(json.contains("\"fail_open_calls\":1"));
        assert!(json.contains("\"recorded\":3"));
        assert!(json.contains("\"transfer\":2"));
        assert!(json.contains("\"graphics\":0"));
    }
}
