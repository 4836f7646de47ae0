//! Metrics for monitoring the scheduler.
//!
//! - Counters for armed, cancelled and fired entries and for reconciliation outcomes
//! - Gauges for armed entries, owned segments and abandoned scheduling passes
//! - Pass timers for cancellation and scheduling passes
//!
//! # Example
//!
//! ```rust
//! use crema_scheduler::metrics::SchedulerMetrics;
//! use std::time::Duration;
//!
//! let metrics = SchedulerMetrics::new();
//! metrics.record_cancelled_many(12);
//! metrics.record_cancel_pass(Duration::from_millis(3));
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.entries_cancelled, 12);
//! assert_eq!(snapshot.cancel_passes, 1);
//! ```

mod primitives;

pub use primitives::{Counter, Descriptor, ErrorCounter, Gauge, PassTimer, PassTimes};

use std::time::Duration;

/// Metrics shared by the entry scheduler, the executor and the topology listener.
#[derive(Debug)]
pub struct SchedulerMetrics {
    // Entry counters
    /// Entries armed.
    pub entries_armed: Counter,
    /// Entries disarmed by explicit or bulk cancellation.
    pub entries_cancelled: Counter,
    /// Entries whose timer fired.
    pub entries_fired: Counter,
    /// Schedule calls ignored because the node does not own the entry.
    pub schedule_not_owned: Counter,
    /// Schedule calls ignored because the entry was already armed.
    pub schedule_duplicate: Counter,

    // State gauges
    /// Currently armed entries.
    pub armed_entries: Gauge,
    /// Segments owned under the installed locality.
    pub owned_segments: Gauge,
    /// Superseded scheduling passes whose blocking enumeration is still running.
    pub abandoned_passes: Gauge,

    // Reconciliation counters
    /// Scheduling passes submitted.
    pub schedule_passes: Counter,
    /// Scheduling passes cancelled by a newer reconciliation or shutdown.
    pub schedule_passes_superseded: Counter,
    /// Scheduling passes that failed.
    pub schedule_passes_failed: Counter,
    /// Cancellation passes slower than the configured threshold.
    pub slow_cancel_passes: Counter,

    // Durations
    /// Cancellation passes.
    pub cancel_pass_time: PassTimer,
    /// Scheduling passes that completed.
    pub schedule_pass_time: PassTimer,

    /// Errors by kind.
    pub errors: ErrorCounter,
}

impl SchedulerMetrics {
    /// Create a new metrics instance.
    pub fn new() -> Self {
        Self {
            entries_armed: Counter::new("scheduler_entries_armed_total", "Entries armed"),
            entries_cancelled: Counter::new(
                "scheduler_entries_cancelled_total",
                "Entries disarmed by cancellation",
            ),
            entries_fired: Counter::new("scheduler_entries_fired_total", "Entries fired"),
            schedule_not_owned: Counter::new(
                "scheduler_schedule_not_owned_total",
                "Schedule calls for entries owned elsewhere",
            ),
            schedule_duplicate: Counter::new(
                "scheduler_schedule_duplicate_total",
                "Schedule calls for already armed entries",
            ),

            armed_entries: Gauge::new("scheduler_armed_entries", "Currently armed entries"),
            owned_segments: Gauge::new("scheduler_owned_segments", "Owned segments"),
            abandoned_passes: Gauge::new(
                "scheduler_abandoned_passes",
                "Superseded scheduling passes still enumerating",
            ),

            schedule_passes: Counter::new(
                "scheduler_schedule_passes_total",
                "Scheduling passes submitted",
            ),
            schedule_passes_superseded: Counter::new(
                "scheduler_schedule_passes_superseded_total",
                "Scheduling passes cancelled before completion",
            ),
            schedule_passes_failed: Counter::new(
                "scheduler_schedule_passes_failed_total",
                "Scheduling passes failed",
            ),
            slow_cancel_passes: Counter::new(
                "scheduler_slow_cancel_passes_total",
                "Cancellation passes over the warn threshold",
            ),

            cancel_pass_time: PassTimer::new(
                "scheduler_cancel_pass_seconds",
                "Cancellation pass duration",
            ),
            schedule_pass_time: PassTimer::new(
                "scheduler_schedule_pass_seconds",
                "Completed scheduling pass duration",
            ),

            errors: ErrorCounter::new("scheduler_errors_total", "Errors by kind"),
        }
    }

    /// Record an armed entry.
    pub fn record_armed(&self) {
        self.entries_armed.inc();
        self.armed_entries.add(1);
    }

    /// Record a single disarmed entry.
    pub fn record_cancelled(&self) {
        self.entries_cancelled.inc();
        self.armed_entries.add(-1);
    }

    /// Record a fired entry.
    pub fn record_fired(&self) {
        self.entries_fired.inc();
        self.armed_entries.add(-1);
    }

    /// Record a completed cancellation pass. Entries are counted as they are disarmed.
    pub fn record_cancel_pass(&self, duration: Duration) {
        self.cancel_pass_time.record(duration);
    }

    /// Record several disarmed entries at once.
    pub fn record_cancelled_many(&self, cancelled: u64) {
        self.entries_cancelled.add(cancelled);
        self.armed_entries.add(-(cancelled as i64));
    }

    /// Record the end of a scheduling pass.
    pub fn record_schedule_pass(&self, success: bool, duration: Duration) {
        if success {
            self.schedule_pass_time.record(duration);
        } else {
            self.schedule_passes_failed.inc();
        }
    }

    /// Record an error by kind.
    pub fn record_error(&self, kind: &'static str) {
        self.errors.inc(kind);
    }

    /// Get a snapshot of the headline values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let cancel_pass_time = self.cancel_pass_time.snapshot();
        let schedule_pass_time = self.schedule_pass_time.snapshot();
        MetricsSnapshot {
            entries_armed: self.entries_armed.get(),
            entries_cancelled: self.entries_cancelled.get(),
            entries_fired: self.entries_fired.get(),
            armed_entries: self.armed_entries.get(),
            owned_segments: self.owned_segments.get(),
            abandoned_passes: self.abandoned_passes.get(),
            cancel_passes: cancel_pass_time.count,
            schedule_passes: self.schedule_passes.get(),
            schedule_passes_completed: schedule_pass_time.count,
            schedule_passes_superseded: self.schedule_passes_superseded.get(),
            schedule_passes_failed: self.schedule_passes_failed.get(),
            cancel_pass_time,
        }
    }

    /// Format metrics in Prometheus exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        for counter in [
            &self.entries_armed,
            &self.entries_cancelled,
            &self.entries_fired,
            &self.schedule_not_owned,
            &self.schedule_duplicate,
            &self.schedule_passes,
            &self.schedule_passes_superseded,
            &self.schedule_passes_failed,
            &self.slow_cancel_passes,
        ] {
            counter.expose(&mut out);
        }
        for gauge in [&self.armed_entries, &self.owned_segments, &self.abandoned_passes] {
            gauge.expose(&mut out);
        }
        self.cancel_pass_time.expose(&mut out);
        self.schedule_pass_time.expose(&mut out);
        self.errors.expose(&mut out);

        out
    }
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of scheduler metrics.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub entries_armed: u64,
    pub entries_cancelled: u64,
    pub entries_fired: u64,
    pub armed_entries: i64,
    pub owned_segments: i64,
    pub abandoned_passes: i64,
    pub cancel_passes: u64,
    pub schedule_passes: u64,
    pub schedule_passes_completed: u64,
    pub schedule_passes_superseded: u64,
    pub schedule_passes_failed: u64,
    pub cancel_pass_time: PassTimes,
}
