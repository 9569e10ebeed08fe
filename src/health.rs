//! Sliding-window health tracking for a single provider key.
//!
//! Maintains rolling success/failure counts and latency percentiles over a
//! configurable time window, plus cumulative lifetime counters that never
//! reset. Eviction is keyed by an insertion sequence number rather than by
//! latency value, so two samples with the same latency never collide when
//! one ages out of the window.

use crate::clock::{Clock, MonotonicClock};
use crate::provider::ProviderStatus;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Sample {
    seq: u64,
    timestamp_millis: u64,
    success: bool,
}

/// Point-in-time snapshot of one key's health.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSnapshot {
    pub status: ProviderStatus,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub consecutive_failures: u64,
    pub success_rate: f64,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub last_error: Option<String>,
    pub last_error_millis: Option<u64>,
}

struct Inner {
    samples: VecDeque<Sample>,
    /// (sequence, latency_ms), sorted by latency_ms for percentile lookup.
    latencies: Vec<(u64, f64)>,
    next_seq: u64,
    total_requests: u64,
    total_successes: u64,
    total_failures: u64,
    consecutive_failures: u64,
    last_error: Option<String>,
    last_error_millis: Option<u64>,
}

/// Sliding-window health tracker for a single provider key.
pub struct HealthTracker {
    window: Duration,
    degraded_threshold: f64,
    unhealthy_threshold: f64,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl HealthTracker {
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self::with_thresholds(window, 0.30, 0.60, clock)
    }

    /// Construct with explicit degraded/unhealthy failure-rate thresholds
    /// instead of the 0.30/0.60 defaults.
    pub fn with_thresholds(
        window: Duration,
        degraded_threshold: f64,
        unhealthy_threshold: f64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            window,
            degraded_threshold,
            unhealthy_threshold,
            clock,
            inner: Mutex::new(Inner {
                samples: VecDeque::new(),
                latencies: Vec::new(),
                next_seq: 0,
                total_requests: 0,
                total_successes: 0,
                total_failures: 0,
                consecutive_failures: 0,
                last_error: None,
                last_error_millis: None,
            }),
        }
    }

    pub fn record_success(&self, latency_ms: f64) {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let seq = guard.next_seq;
        guard.next_seq += 1;
        let now = self.clock.now_millis();
        guard.samples.push_back(Sample { seq, timestamp_millis: now, success: true });
        insert_sorted(&mut guard.latencies, seq, latency_ms);
        guard.total_requests += 1;
        guard.total_successes += 1;
        guard.consecutive_failures = 0;
        self.evict(&mut guard);
    }

    pub fn record_failure(&self, error: impl Into<String>, latency_ms: f64) {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let seq = guard.next_seq;
        guard.next_seq += 1;
        let now = self.clock.now_millis();
        guard.samples.push_back(Sample { seq, timestamp_millis: now, success: false });
        if latency_ms > 0.0 {
            insert_sorted(&mut guard.latencies, seq, latency_ms);
        }
        guard.total_requests += 1;
        guard.total_failures += 1;
        guard.consecutive_failures += 1;
        guard.last_error = Some(error.into());
        guard.last_error_millis = Some(now);
        self.evict(&mut guard);
    }

    pub fn status(&self) -> ProviderStatus {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        self.evict(&mut guard);
        status_from_window(&guard.samples, self.degraded_threshold, self.unhealthy_threshold)
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).consecutive_failures
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        self.evict(&mut guard);

        let window_total = guard.samples.len();
        let window_failures = guard.samples.iter().filter(|s| !s.success).count();
        let success_rate = if window_total > 0 {
            (window_total - window_failures) as f64 / window_total as f64
        } else {
            1.0
        };
        let status = status_from_window(&guard.samples, self.degraded_threshold, self.unhealthy_threshold);

        HealthSnapshot {
            status,
            total_requests: guard.total_requests,
            total_successes: guard.total_successes,
            total_failures: guard.total_failures,
            consecutive_failures: guard.consecutive_failures,
            success_rate: round2(success_rate),
            latency_p50_ms: percentile(&guard.latencies, 0.50),
            latency_p95_ms: percentile(&guard.latencies, 0.95),
            latency_p99_ms: percentile(&guard.latencies, 0.99),
            last_error: guard.last_error.clone(),
            last_error_millis: guard.last_error_millis,
        }
    }

    /// Caller must hold the lock. Drops samples (and their latencies) older
    /// than the sliding window.
    fn evict(&self, guard: &mut Inner) {
        let cutoff = self.clock.now_millis().saturating_sub(self.window.as_millis() as u64);
        while let Some(front) = guard.samples.front() {
            if front.timestamp_millis >= cutoff {
                break;
            }
            let old = guard.samples.pop_front().expect("front just checked");
            guard.latencies.retain(|(seq, _)| *seq != old.seq);
        }
    }
}

fn insert_sorted(latencies: &mut Vec<(u64, f64)>, seq: u64, value: f64) {
    let pos = latencies.partition_point(|(_, v)| *v < value);
    latencies.insert(pos, (seq, value));
}

fn percentile(latencies: &[(u64, f64)], p: f64) -> f64 {
    if latencies.is_empty() {
        return 0.0;
    }
    let idx = ((latencies.len() as f64) * p) as usize;
    let idx = idx.min(latencies.len() - 1);
    round2(latencies[idx].1)
}

fn status_from_window(
    samples: &VecDeque<Sample>,
    degraded_threshold: f64,
    unhealthy_threshold: f64,
) -> ProviderStatus {
    if samples.is_empty() {
        return ProviderStatus::Healthy;
    }
    let failures = samples.iter().filter(|s| !s.success).count();
    let rate = failures as f64 / samples.len() as f64;
    if rate >= unhealthy_threshold {
        ProviderStatus::Unhealthy
    } else if rate >= degraded_threshold {
        ProviderStatus::Degraded
    } else {
        ProviderStatus::Healthy
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Debug, Default)]
    struct ManualClock(AtomicU64);

    impl ManualClock {
        fn advance(&self, millis: u64) {
            self.0.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn empty_tracker_reports_healthy() {
        let tracker = HealthTracker::new(Duration::from_secs(60));
        assert_eq!(tracker.status(), ProviderStatus::Healthy);
        let snap = tracker.snapshot();
        assert_eq!(snap.success_rate, 1.0);
        assert_eq!(snap.latency_p50_ms, 0.0);
    }

    #[test]
    fn success_rate_and_percentiles_reflect_window() {
        let tracker = HealthTracker::new(Duration::from_secs(60));
        tracker.record_success(10.0);
        tracker.record_success(20.0);
        tracker.record_success(30.0);
        tracker.record_failure("boom", 0.0);

        let snap = tracker.snapshot();
        assert_eq!(snap.total_requests, 4);
        assert_eq!(snap.total_successes, 3);
        assert_eq!(snap.total_failures, 1);
        assert_eq!(snap.success_rate, 0.75);
        assert_eq!(snap.last_error.as_deref(), Some("boom"));
        // Only 3 latencies were recorded (failure had latency 0.0, excluded).
        assert_eq!(snap.latency_p50_ms, 20.0);
    }

    #[test]
    fn consecutive_failures_reset_on_success() {
        let tracker = HealthTracker::new(Duration::from_secs(60));
        tracker.record_failure("a", 1.0);
        tracker.record_failure("b", 1.0);
        assert_eq!(tracker.consecutive_failures(), 2);
        tracker.record_success(1.0);
        assert_eq!(tracker.consecutive_failures(), 0);
    }

    #[test]
    fn status_degrades_and_becomes_unhealthy_past_thresholds() {
        let tracker = HealthTracker::new(Duration::from_secs(60));
        for _ in 0..7 {
            tracker.record_success(1.0);
        }
        for _ in 0..3 {
            tracker.record_failure("x", 1.0);
        }
        // 3/10 = 0.30 -> degraded boundary
        assert_eq!(tracker.status(), ProviderStatus::Degraded);

        for _ in 0..4 {
            tracker.record_failure("x", 1.0);
        }
        // 7/14 = 0.50 -> still degraded
        assert_eq!(tracker.status(), ProviderStatus::Degraded);
    }

    #[test]
    fn samples_evict_outside_window_without_value_collisions() {
        let clock = Arc::new(ManualClock::default());
        let tracker = HealthTracker::with_clock(Duration::from_millis(100), clock.clone());

        // Two samples share the same latency value to exercise seq-keyed eviction.
        tracker.record_success(5.0);
        tracker.record_success(5.0);
        assert_eq!(tracker.snapshot().total_requests, 2);

        clock.advance(150);
        tracker.record_success(5.0);

        let snap = tracker.snapshot();
        // The two old samples should have aged out, leaving only the new one.
        assert_eq!(snap.latency_p50_ms, 5.0);
        assert_eq!(snap.total_requests, 3); // cumulative counters never reset
    }

    #[test]
    fn custom_thresholds_shift_degraded_boundary() {
        let tracker = HealthTracker::with_thresholds(
            Duration::from_secs(60),
            0.10,
            0.20,
            Arc::new(MonotonicClock::default()),
        );
        tracker.record_success(1.0);
        tracker.record_success(1.0);
        tracker.record_success(1.0);
        tracker.record_success(1.0);
        tracker.record_success(1.0);
        tracker.record_success(1.0);
        tracker.record_success(1.0);
        tracker.record_success(1.0);
        tracker.record_success(1.0);
        tracker.record_failure("x", 1.0);
        // 1/10 = 0.10 trips the lowered degraded threshold, where the
        // default 0.30 threshold would still report healthy.
        assert_eq!(tracker.status(), ProviderStatus::Degraded);
    }
}
