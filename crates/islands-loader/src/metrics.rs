//! Loading metrics

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Point-in-time loading metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingMetrics {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Fetches actually sent to the primary transport path
    pub network_fetches: u64,
    /// Callers that joined an in-flight request instead of fetching
    pub deduplicated: u64,
    /// Primary-path retries (attempts beyond the first)
    pub retries: u64,
    pub timeouts: u64,
    /// Requests that ended in an error
    pub failures: u64,
    pub fallback_successes: u64,
    pub offline_queued: u64,
    pub shutdown_cancellations: u64,
    pub bytes_loaded: u64,
    /// Mean time of successful loads (milliseconds)
    pub average_load_time_ms: f64,
    /// Successful loads slower than the configured target
    pub slow_loads: u64,
}

impl LoadingMetrics {
    /// Fraction of requests served from cache
    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }

    /// Fraction of requests that ended in an error
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.failures as f64 / self.total_requests as f64
        }
    }
}

/// Lock-free metrics recorder
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    network_fetches: AtomicU64,
    deduplicated: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    failures: AtomicU64,
    fallback_successes: AtomicU64,
    offline_queued: AtomicU64,
    shutdown_cancellations: AtomicU64,
    bytes_loaded: AtomicU64,
    successful_loads: AtomicU64,
    total_load_time_us: AtomicU64,
    slow_loads: AtomicU64,
    target_load_time_ms: AtomicU64,
}

impl MetricsRecorder {
    /// Recorder flagging loads slower than `target`
    pub fn new(target: Duration) -> Self {
        let recorder = Self::default();
        recorder
            .target_load_time_ms
            .store(target.as_millis() as u64, Ordering::Relaxed);
        recorder
    }

    pub fn request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn network_fetch(&self) {
        self.network_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retries(&self, count: u32) {
        self.retries.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fallback_success(&self) {
        self.fallback_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn offline_queued(&self) {
        self.offline_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn shutdown_cancellations(&self, count: u64) {
        self.shutdown_cancellations.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a successful load
    pub fn loaded(&self, bytes: u64, elapsed: Duration) {
        self.bytes_loaded.fetch_add(bytes, Ordering::Relaxed);
        self.successful_loads.fetch_add(1, Ordering::Relaxed);
        self.total_load_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);

        let target = self.target_load_time_ms.load(Ordering::Relaxed);
        if target > 0 && elapsed.as_millis() as u64 > target {
            self.slow_loads.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take a snapshot
    pub fn snapshot(&self) -> LoadingMetrics {
        let loads = self.successful_loads.load(Ordering::Relaxed);
        let total_us = self.total_load_time_us.load(Ordering::Relaxed);

        LoadingMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            network_fetches: self.network_fetches.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            fallback_successes: self.fallback_successes.load(Ordering::Relaxed),
            offline_queued: self.offline_queued.load(Ordering::Relaxed),
            shutdown_cancellations: self.shutdown_cancellations.load(Ordering::Relaxed),
            bytes_loaded: self.bytes_loaded.load(Ordering::Relaxed),
            average_load_time_ms: if loads == 0 {
                0.0
            } else {
                total_us as f64 / loads as f64 / 1000.0
            },
            slow_loads: self.slow_loads.load(Ordering::Relaxed),
        }
    }
}
