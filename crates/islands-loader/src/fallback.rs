//! Fallback loading paths, offline queue and degradation strategies
//!
//! Recovery chain once the primary path gives up:
//!
//! ```text
//! online:  direct load (with retries) -> newest cached version -> LoadFailed(fallback)
//! offline: newest cached version -> queue for replay -> LoadFailed(offline)
//! ```

use crate::cache::{now_ms, CacheStore};
use crate::client::{BundleFetcher, FetchOptions};
use crate::loader::{Framework, LoadRequest, LoadSource};
use crate::retry::{run_with_retry_until, RetryPolicy};
use crate::{FailureStage, LoaderError, Priority, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How much of the page still works
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DegradationLevel {
    /// No interactivity, server-rendered content only
    Minimal,
    /// Core interactivity through a lightweight non-framework script
    Reduced,
    /// Normal operation resumed
    Full,
}

/// Why loading failed, as far as degradation is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureReason {
    NetworkError,
    Timeout,
    CacheCorruption,
    VersionMismatch,
    Offline,
    Unknown,
}

impl FailureReason {
    /// Classify an error
    pub fn from_error(error: &LoaderError) -> Self {
        match error {
            LoaderError::NetworkFailure { .. } => FailureReason::NetworkError,
            LoaderError::Timeout { .. } => FailureReason::Timeout,
            LoaderError::CacheCorruption { .. } => FailureReason::CacheCorruption,
            LoaderError::VersionMismatch { .. } => FailureReason::VersionMismatch,
            LoaderError::Offline(_) => FailureReason::Offline,
            LoaderError::LoadFailed { cause, .. } => FailureReason::from_error(cause),
            _ => FailureReason::Unknown,
        }
    }
}

/// What the UI layer should fall back to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradationStrategy {
    pub fallback_method: String,
    pub user_experience: String,
    pub functionality_level: DegradationLevel,
    /// Features that keep working at this level
    pub minimal_functionality: Vec<String>,
}

impl DegradationStrategy {
    /// Strategy for a failure reason
    pub fn for_reason(reason: FailureReason) -> Self {
        let (method, experience, level, features): (&str, &str, DegradationLevel, &[&str]) =
            match reason {
                FailureReason::NetworkError => (
                    "direct-load",
                    "Core interactions work while the full experience loads",
                    DegradationLevel::Reduced,
                    &["server-rendered content", "links and forms", "lightweight interaction script"],
                ),
                FailureReason::Timeout => (
                    "progressive-enhancement",
                    "Content is usable and islands activate once ready",
                    DegradationLevel::Reduced,
                    &["server-rendered content", "links and forms", "lightweight interaction script"],
                ),
                FailureReason::VersionMismatch => (
                    "previous-version",
                    "Running a previously cached version",
                    DegradationLevel::Reduced,
                    &["server-rendered content", "cached framework version"],
                ),
                FailureReason::CacheCorruption => (
                    "cache-bypass",
                    "Normal operation after refetching the bundle",
                    DegradationLevel::Full,
                    &[],
                ),
                FailureReason::Offline => (
                    "offline-cache",
                    "Offline: showing saved content",
                    DegradationLevel::Minimal,
                    &["server-rendered content", "previously cached islands"],
                ),
                FailureReason::Unknown => (
                    "server-rendered",
                    "Static content only",
                    DegradationLevel::Minimal,
                    &["server-rendered content"],
                ),
            };

        Self {
            fallback_method: method.to_string(),
            user_experience: experience.to_string(),
            functionality_level: level,
            minimal_functionality: features.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// Fallback path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FallbackConfig {
    /// Retry policy of the direct path
    pub retry: RetryPolicy,
    /// Per-attempt timeout of the direct path (milliseconds)
    pub direct_timeout_ms: u64,
    /// Offline queue capacity; the oldest entry is dropped when full
    pub max_offline_queue: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::new(2, Duration::from_millis(1000)),
            direct_timeout_ms: 15_000,
            max_offline_queue: 100,
        }
    }
}

impl FallbackConfig {
    /// Set retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set offline queue capacity
    pub fn with_max_offline_queue(mut self, max: usize) -> Self {
        self.max_offline_queue = max;
        self
    }
}

/// A request captured while offline
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineQueueEntry {
    pub request: LoadRequest,
    /// Milliseconds since the Unix epoch
    pub queued_at: u64,
    sequence: u64,
}

/// Result of one offline queue replay
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    /// Framework ids replayed successfully, in replay order
    pub replayed: Vec<String>,
    /// Framework ids whose replay failed and stay queued
    pub failed: Vec<String>,
    /// Entries left in the queue
    pub remaining: usize,
}

#[derive(Default)]
struct OfflineQueue {
    entries: VecDeque<OfflineQueueEntry>,
    next_sequence: u64,
}

/// Secondary loading paths used after the primary path gives up
pub struct FallbackLoader {
    fetcher: BundleFetcher,
    cache: Arc<CacheStore>,
    config: FallbackConfig,
    queue: Mutex<OfflineQueue>,
    replay: Mutex<()>,
}

impl FallbackLoader {
    /// Create a fallback loader
    pub fn new(fetcher: BundleFetcher, cache: Arc<CacheStore>, config: FallbackConfig) -> Self {
        Self {
            fetcher,
            cache,
            config,
            queue: Mutex::new(OfflineQueue::default()),
            replay: Mutex::new(()),
        }
    }

    /// Fetch straight from the origin, bypassing every cache layer
    pub async fn load_framework_direct(
        &self,
        framework_id: &str,
        version: Option<&str>,
        priority: Priority,
    ) -> Result<Framework> {
        let timeout = Duration::from_millis(self.config.direct_timeout_ms);
        self.fetch_direct(framework_id, version, priority, timeout).await
    }

    async fn fetch_direct(
        &self,
        framework_id: &str,
        version: Option<&str>,
        priority: Priority,
        timeout: Duration,
    ) -> Result<Framework> {
        let version = self.fetcher.registry().resolve_version(framework_id, version)?;
        let options = FetchOptions::default()
            .with_timeout(timeout)
            .with_priority(priority)
            .bypassing_cache();

        let start = Instant::now();
        let entry = self.fetcher.fetch(framework_id, &version, &options).await?;
        debug!(framework_id, version = %version, "Direct load succeeded");
        Ok(Framework::from_entry(entry, LoadSource::Direct, start.elapsed()))
    }

    /// Direct load with bounded retries and backoff
    pub async fn load_with_retry(
        &self,
        framework_id: &str,
        version: Option<&str>,
        priority: Priority,
    ) -> Result<Framework> {
        self.retry_direct(framework_id, version, priority, None).await
    }

    /// Direct load with retries; with a budget, the backoff schedule is
    /// shrunk to half of it and no retry starts after it runs out
    async fn retry_direct(
        &self,
        framework_id: &str,
        version: Option<&str>,
        priority: Priority,
        budget: Option<Duration>,
    ) -> Result<Framework> {
        let start = Instant::now();
        let direct_timeout = Duration::from_millis(self.config.direct_timeout_ms);
        let (policy, cutoff, timeout) = match budget {
            Some(budget) => (
                self.config.retry.clone().fit_within(budget / 2),
                Some(tokio::time::Instant::now() + budget),
                direct_timeout.min(budget),
            ),
            None => (self.config.retry.clone(), None, direct_timeout),
        };

        let outcome = run_with_retry_until(&policy, cutoff, |attempt| {
            debug!(framework_id, attempt, "Fallback attempt");
            self.fetch_direct(framework_id, version, priority, timeout)
        })
        .await;

        outcome.result.map(|mut framework| {
            framework.load_time = start.elapsed();
            framework
        })
    }

    /// Newest cached version of a framework, if any
    pub async fn load_framework_offline(&self, framework_id: &str) -> Option<Framework> {
        let entry = self.cache.newest(framework_id).await?;
        info!(
            framework_id,
            version = %entry.version,
            "Serving cached bundle as offline fallback"
        );
        Some(Framework::from_entry(entry, LoadSource::Offline, Duration::ZERO))
    }

    /// Append a request to the offline queue
    pub async fn queue_request(&self, request: LoadRequest) {
        let mut queue = self.queue.lock().await;

        if self.config.max_offline_queue > 0 && queue.entries.len() >= self.config.max_offline_queue {
            if let Some(dropped) = queue.entries.pop_front() {
                warn!(
                    framework_id = %dropped.request.framework_id,
                    "Offline queue full, dropping oldest request"
                );
            }
        }

        let sequence = queue.next_sequence;
        queue.next_sequence += 1;
        info!(
            framework_id = %request.framework_id,
            position = queue.entries.len(),
            "Queued request for replay"
        );
        queue.entries.push_back(OfflineQueueEntry {
            request,
            queued_at: now_ms(),
            sequence,
        });
    }

    /// Snapshot of the offline queue, oldest first
    pub async fn get_offline_queue(&self) -> Vec<OfflineQueueEntry> {
        self.queue.lock().await.entries.iter().cloned().collect()
    }

    /// Replay queued requests in FIFO order.
    ///
    /// An entry leaves the queue only after its replay succeeds; failed
    /// entries keep their position for the next reconnection.
    pub async fn process_offline_queue(&self) -> ReplayReport {
        let _replaying = self.replay.lock().await;
        let pending = self.get_offline_queue().await;
        let mut report = ReplayReport::default();

        for entry in pending {
            let request = &entry.request;
            match self
                .load_with_retry(&request.framework_id, request.version.as_deref(), request.priority)
                .await
            {
                Ok(framework) => {
                    if let Err(e) = self.cache.put(framework.to_cache_entry(request.priority)).await {
                        warn!(framework_id = %framework.id, "Failed to cache replayed bundle: {}", e);
                    }
                    self.queue
                        .lock()
                        .await
                        .entries
                        .retain(|queued| queued.sequence != entry.sequence);
                    report.replayed.push(request.framework_id.clone());
                }
                Err(e) => {
                    warn!(framework_id = %request.framework_id, "Replay failed, keeping queued: {}", e);
                    report.failed.push(request.framework_id.clone());
                }
            }
        }

        report.remaining = self.queue.lock().await.entries.len();
        info!(
            replayed = report.replayed.len(),
            failed = report.failed.len(),
            remaining = report.remaining,
            "Processed offline queue"
        );
        report
    }

    /// Degradation strategy for a failure reason
    pub fn get_graceful_degradation_strategy(&self, reason: FailureReason) -> DegradationStrategy {
        DegradationStrategy::for_reason(reason)
    }

    /// Run the recovery chain for a request whose primary path failed with `cause`.
    ///
    /// `budget` is the time left before the caller's deadline; the direct
    /// load's retries are fitted into it.
    pub async fn recover(
        &self,
        request: &LoadRequest,
        cause: LoaderError,
        online: bool,
        budget: Option<Duration>,
    ) -> Result<Framework> {
        let framework_id = request.framework_id.as_str();

        if !online {
            if let Some(framework) = self.load_framework_offline(framework_id).await {
                return Ok(framework);
            }
            self.queue_request(request.clone()).await;
            return Err(LoaderError::LoadFailed {
                framework_id: framework_id.to_string(),
                stage: FailureStage::Offline,
                degradation: DegradationStrategy::for_reason(FailureReason::Offline),
                cause: Box::new(LoaderError::Offline(framework_id.to_string())),
            });
        }

        info!(framework_id, "Primary path failed, trying direct load: {}", cause);
        match self
            .retry_direct(framework_id, request.version.as_deref(), request.priority, budget)
            .await
        {
            Ok(framework) => return Ok(framework),
            Err(e) => warn!(framework_id, "Direct load failed: {}", e),
        }

        if let Some(framework) = self.load_framework_offline(framework_id).await {
            return Ok(framework);
        }

        Err(LoaderError::LoadFailed {
            framework_id: framework_id.to_string(),
            stage: FailureStage::Fallback,
            degradation: DegradationStrategy::for_reason(FailureReason::from_error(&cause)),
            cause: Box::new(cause),
        })
    }
}
