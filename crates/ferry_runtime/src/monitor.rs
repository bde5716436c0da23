//! Execution counters.
//!
//! Lock-free counters updated by every execution; [`ExecutionMonitor::snapshot`]
//! returns a consistent-enough copy for reporting.

use ferry_core::{BridgeError, ErrorKind};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of execution counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    /// Processes started
    pub executions: u64,
    /// Executions that produced a result
    pub succeeded: u64,
    /// Executions that failed
    pub failed: u64,
    /// Failures that were timeouts
    pub timeouts: u64,
    /// Results served from the cache
    pub cache_hits: u64,
    /// Processes currently running
    pub in_flight: u64,
}

impl Metrics {
    /// Get success rate (0.0 - 1.0)
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let finished = self.succeeded + self.failed;
        if finished == 0 {
            return 1.0;
        }
        self.succeeded as f64 / finished as f64
    }
}

/// Execution monitor
#[derive(Debug, Default)]
pub struct ExecutionMonitor {
    executions: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timeouts: AtomicU64,
    cache_hits: AtomicU64,
    in_flight: AtomicU64,
}

impl ExecutionMonitor {
    /// Create a new monitor
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A process is about to start; it counts as in flight until the guard drops
    pub fn record_start(&self) -> InFlight<'_> {
        self.executions.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlight { monitor: self }
    }

    /// A started process has been classified
    pub fn record_finish<T>(&self, outcome: &Result<T, BridgeError>) {
        match outcome {
            Ok(_) => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                if e.kind() == ErrorKind::Timeout {
                    self.timeouts.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// A result was served without starting a process
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters
    #[must_use]
    pub fn snapshot(&self) -> Metrics {
        Metrics {
            executions: self.executions.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Marks one execution as in flight
#[must_use = "the execution stops counting as in flight when this is dropped"]
#[derive(Debug)]
pub struct InFlight<'a> {
    monitor: &'a ExecutionMonitor,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.monitor.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::ExecutionId;

    #[test]
    fn test_metrics_default() {
        let metrics = Metrics::default();
        assert_eq!(metrics.executions, 0);
        assert_eq!(metrics.success_rate(), 1.0);
    }

    #[test]
    fn test_monitor_counts() {
        let monitor = ExecutionMonitor::new();
        let first = monitor.record_start();
        let second = monitor.record_start();
        assert_eq!(monitor.snapshot().in_flight, 2);

        monitor.record_finish::<()>(&Ok(()));
        drop(first);
        monitor.record_finish::<()>(&Err(BridgeError::Timeout {
            agent: "a".to_string(),
            execution_id: ExecutionId::new(),
            timeout_ms: 10,
            stdout: String::new(),
            stderr: String::new(),
        }));
        drop(second);
        monitor.record_cache_hit();

        let m = monitor.snapshot();
        assert_eq!(m.executions, 2);
        assert_eq!(m.succeeded, 1);
        assert_eq!(m.failed, 1);
        assert_eq!(m.timeouts, 1);
        assert_eq!(m.cache_hits, 1);
        assert_eq!(m.in_flight, 0);
        assert_eq!(m.success_rate(), 0.5);
    }

    #[test]
    fn test_abandoned_execution_leaves_flight() {
        let monitor = ExecutionMonitor::new();
        {
            let _in_flight = monitor.record_start();
            assert_eq!(monitor.snapshot().in_flight, 1);
        }

        let m = monitor.snapshot();
        assert_eq!(m.executions, 1);
        assert_eq!(m.in_flight, 0);
        assert_eq!(m.succeeded + m.failed, 0);
    }
}
