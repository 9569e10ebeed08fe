//! Sliding-window RPM/TPM quota tracking for a single provider key.
//!
//! Requests older than the window fall out of the deque automatically, so
//! the budget self-replenishes over time rather than resetting on a fixed
//! clock tick.

use crate::clock::{Clock, MonotonicClock};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct UsageRecord {
    timestamp_millis: u64,
    tokens: u64,
}

struct Inner {
    records: VecDeque<UsageRecord>,
    warning_emitted: bool,
}

/// Per-key sliding-window quota tracker (requests-per-minute and, optionally,
/// tokens-per-minute).
pub struct QuotaManager {
    rpm_limit: u64,
    tpm_limit: u64,
    window: Duration,
    warning_threshold: f64,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl QuotaManager {
    pub fn new(rpm_limit: u64, tpm_limit: u64, window: Duration) -> Self {
        Self::with_clock(rpm_limit, tpm_limit, window, Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(rpm_limit: u64, tpm_limit: u64, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self::with_warning_threshold(rpm_limit, tpm_limit, window, 0.90, clock)
    }

    /// Construct with an explicit warning threshold instead of the `0.90`
    /// default.
    pub fn with_warning_threshold(
        rpm_limit: u64,
        tpm_limit: u64,
        window: Duration,
        warning_threshold: f64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rpm_limit,
            tpm_limit,
            window,
            warning_threshold,
            clock,
            inner: Mutex::new(Inner { records: VecDeque::new(), warning_emitted: false }),
        }
    }

    /// Whether a request estimated to use `estimated_tokens` may be admitted
    /// right now. A limit of `0` disables that dimension's check.
    pub fn can_accept(&self, estimated_tokens: u64) -> bool {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        self.evict(&mut guard);

        if self.rpm_limit > 0 && guard.records.len() as u64 >= self.rpm_limit {
            return false;
        }

        if self.tpm_limit > 0 {
            let used: u64 = guard.records.iter().map(|r| r.tokens).sum();
            if used + estimated_tokens > self.tpm_limit {
                return false;
            }
        }

        true
    }

    /// Record a request (and its token usage) against the window.
    ///
    /// Returns a warning usage percentage the first time usage crosses
    /// `warning_threshold` within a given high-usage streak; the flag clears
    /// once usage drops back below the threshold, so a later re-crossing
    /// warns again.
    pub fn record_usage(&self, tokens: u64) -> Option<u32> {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let now = self.clock.now_millis();
        guard.records.push_back(UsageRecord { timestamp_millis: now, tokens });
        self.evict(&mut guard);
        self.check_warning(&mut guard)
    }

    /// Percentage of RPM quota remaining (`100.0` when RPM is unlimited).
    pub fn remaining_pct(&self) -> f64 {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        self.evict(&mut guard);
        if self.rpm_limit == 0 {
            return 100.0;
        }
        let used = guard.records.len() as f64;
        let pct = (1.0 - used / self.rpm_limit as f64).max(0.0) * 100.0;
        (pct * 10.0).round() / 10.0
    }

    pub fn requests_in_window(&self) -> u64 {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        self.evict(&mut guard);
        guard.records.len() as u64
    }

    pub fn tokens_in_window(&self) -> u64 {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        self.evict(&mut guard);
        guard.records.iter().map(|r| r.tokens).sum()
    }

    /// Force-clear all recorded usage (admin override).
    pub fn reset(&self) {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        guard.records.clear();
        guard.warning_emitted = false;
    }

    fn evict(&self, guard: &mut Inner) {
        let cutoff = self.clock.now_millis().saturating_sub(self.window.as_millis() as u64);
        while let Some(front) = guard.records.front() {
            if front.timestamp_millis >= cutoff {
                break;
            }
            guard.records.pop_front();
        }
        if self.rpm_limit > 0 && (guard.records.len() as f64 / self.rpm_limit as f64) < self.warning_threshold {
            guard.warning_emitted = false;
        }
    }

    fn check_warning(&self, guard: &mut Inner) -> Option<u32> {
        if self.rpm_limit == 0 || guard.warning_emitted {
            return None;
        }
        let usage = guard.records.len() as f64 / self.rpm_limit as f64;
        if usage >= self.warning_threshold {
            guard.warning_emitted = true;
            Some((usage * 100.0).round() as u32)
        } else {
            None
        }
    }
}
