//! Rate-limited progress reporting.
//!
//! Long scans over tens of millions of records need a heartbeat without
//! flooding the log. `Progress` is a shared atomic counter ticked once per
//! pulled record; it emits at most one log line per [`REPORT_INTERVAL`].
//! Recording a tick is lock-free: one `fetch_add` plus a relaxed
//! compare-exchange on the last-report timestamp.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

/// Minimum interval between progress log lines.
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Shared progress counter for one record stream.
///
/// Cheap to clone (one `Arc`); the streaming bridge ticks it per pulled
/// item and the orchestrator reads the final count.
#[derive(Clone)]
pub struct Progress {
    inner: Arc<Inner>,
}

struct Inner {
    label: String,
    /// Expected total, when the source reports one. Progress sizing only --
    /// the stream is authoritative for the real count.
    expected: Option<u64>,
    count: AtomicU64,
    started: Instant,
    /// Milliseconds since `started` of the last emitted report.
    last_report_ms: AtomicU64,
}

impl Progress {
    pub fn new(label: impl Into<String>, expected: Option<u64>) -> Self {
        Self {
            inner: Arc::new(Inner {
                label: label.into(),
                expected,
                count: AtomicU64::new(0),
                started: Instant::now(),
                last_report_ms: AtomicU64::new(0),
            }),
        }
    }

    /// Record one consumed item, logging if the report interval elapsed.
    pub fn tick(&self) {
        let count = self.inner.count.fetch_add(1, Ordering::Relaxed) + 1;

        let elapsed_ms = self.inner.started.elapsed().as_millis() as u64;
        let last = self.inner.last_report_ms.load(Ordering::Relaxed);
        if elapsed_ms.saturating_sub(last) < REPORT_INTERVAL.as_millis() as u64 {
            return;
        }
        // One winner per interval; losers skip the log line.
        if self
            .inner
            .last_report_ms
            .compare_exchange(last, elapsed_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        self.report(count, elapsed_ms);
    }

    pub fn count(&self) -> u64 {
        self.inner.count.load(Ordering::Relaxed)
    }

    /// Emit the final count unconditionally.
    pub fn finish(&self) {
        let count = self.count();
        let elapsed_ms = self.inner.started.elapsed().as_millis() as u64;
        self.report(count, elapsed_ms.max(1));
    }

    fn report(&self, count: u64, elapsed_ms: u64) {
        let rate = count * 1000 / elapsed_ms.max(1);
        match self.inner.expected {
            Some(total) => info!(
                "{}: {}/{} records ({}/s)",
                self.inner.label, count, total, rate
            ),
            None => info!("{}: {} records ({}/s)", self.inner.label, count, rate),
        }
    }
}
