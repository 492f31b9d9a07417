use std::{
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {async_trait::async_trait, courier_protocol::Message, tracing::{info, warn}};

use crate::channel::ChannelHandle;

// ── MessageHandler trait ────────────────────────────────────────────────────

/// Callback an agent registers to receive the messages addressed to it.
///
/// `channel` is the handle the handler uses to send replies or further
/// messages; there is no process-wide channel to reach for.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message, channel: &ChannelHandle) -> anyhow::Result<()>;
}

// ── HandlerStats ────────────────────────────────────────────────────────────

/// Per-handler health statistics, also backing the circuit breaker.
pub struct HandlerStats {
    pub call_count: AtomicU64,
    pub failure_count: AtomicU64,
    pub consecutive_failures: AtomicU64,
    pub total_latency_us: AtomicU64,
    pub disabled: AtomicBool,
    disabled_at: Mutex<Option<Instant>>,
    last_error: Mutex<Option<String>>,
}

impl HandlerStats {
    pub fn new() -> Self {
        Self {
            call_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            disabled: AtomicBool::new(false),
            disabled_at: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    pub fn record_success(&self, latency: Duration) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.add_latency(latency);
    }

    pub fn record_failure(&self, latency: Duration, error: &str) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        self.add_latency(latency);
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(error.to_string());
    }

    fn add_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.total_latency_us.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn avg_latency(&self) -> Duration {
        let calls = self.call_count.load(Ordering::Relaxed);
        if calls == 0 {
            return Duration::ZERO;
        }
        let total = self.total_latency_us.load(Ordering::Relaxed);
        Duration::from_micros(total / calls)
    }

    /// Most recent failure message, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Returns `true` while the handler should be skipped.
    ///
    /// Trips after `threshold` consecutive failures and re-arms once
    /// `cooldown` has elapsed. A threshold of 0 turns the breaker off.
    pub(crate) fn circuit_open(&self, agent: &str, threshold: u64, cooldown: Duration) -> bool {
        if threshold == 0 {
            return false;
        }
        if !self.disabled.load(Ordering::Relaxed) {
            if self.consecutive_failures.load(Ordering::Relaxed) < threshold {
                return false;
            }
            self.disabled.store(true, Ordering::Relaxed);
            *self.disabled_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
            warn!(
                agent,
                threshold, "handler circuit breaker tripped after consecutive failures"
            );
            return true;
        }

        let disabled_at = self.disabled_at.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(at) = *disabled_at
            && at.elapsed() >= cooldown
        {
            drop(disabled_at);
            self.disabled.store(false, Ordering::Relaxed);
            self.consecutive_failures.store(0, Ordering::Relaxed);
            info!(agent, "handler circuit breaker reset after cooldown");
            return false;
        }
        true
    }
}

impl Default for HandlerStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_tracking() {
        let stats = HandlerStats::new();
        stats.record_success(Duration::from_millis(10));
        stats.record_success(Duration::from_millis(20));
        stats.record_failure(Duration::from_millis(30), "boom");
        assert_eq!(stats.call_count.load(Ordering::Relaxed), 3);
        assert_eq!(stats.failure_count.load(Ordering::Relaxed), 1);
        assert_eq!(stats.consecutive_failures.load(Ordering::Relaxed), 1);
        assert_eq!(stats.avg_latency(), Duration::from_millis(20));
        assert_eq!(stats.last_error().as_deref(), Some("boom"));
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let stats = HandlerStats::new();
        stats.record_failure(Duration::ZERO, "a");
        stats.record_failure(Duration::ZERO, "b");
        stats.record_success(Duration::ZERO);
        assert_eq!(stats.consecutive_failures.load(Ordering::Relaxed), 0);
        assert!(!stats.circuit_open("x", 2, Duration::from_secs(60)));
    }

    #[test]
    fn circuit_trips_and_resets() {
        let stats = HandlerStats::new();
        stats.record_failure(Duration::ZERO, "a");
        stats.record_failure(Duration::ZERO, "b");
        assert!(stats.circuit_open("x", 2, Duration::ZERO));
        assert!(stats.disabled.load(Ordering::Relaxed));
        // Zero cooldown: the next check re-arms.
        assert!(!stats.circuit_open("x", 2, Duration::ZERO));
        assert!(!stats.disabled.load(Ordering::Relaxed));
    }

    #[test]
    fn zero_threshold_never_trips() {
        let stats = HandlerStats::new();
        assert!(!stats.circuit_open("x", 0, Duration::from_secs(60)));
        for _ in 0..5 {
            stats.record_failure(Duration::ZERO, "boom");
        }
        assert!(!stats.circuit_open("x", 0, Duration::from_secs(60)));
        assert!(!stats.disabled.load(Ordering::Relaxed));
    }

    #[test]
    fn circuit_stays_open_during_cooldown() {
        let stats = HandlerStats::new();
        stats.record_failure(Duration::ZERO, "a");
        assert!(stats.circuit_open("x", 1, Duration::from_secs(60)));
        assert!(stats.circuit_open("x", 1, Duration::from_secs(60)));
    }
}
