//! Framework loader service
//!
//! ```text
//! load ─► registry ─► cache ──hit──────────────────────────────► Framework
//!                       │miss
//!                       ▼
//!                  in-flight map ──joined──► wait on broadcast ─┐
//!                       │new                                    │
//!                       ▼                                       │
//!                 PriorityQueue ─► permit ─► fetch + retry ─┬──►┤
//!                       ▲                        │failed    │   │
//!                       └──── pump on release    ▼          │   │
//!                                         FallbackLoader ───┘   ▼
//!                                                           all waiters
//! ```
//!
//! Every request has a deadline task. Whichever of fetch, deadline or
//! shutdown finishes a request first removes it from the queue and the
//! in-flight map, releases its permit and broadcasts the outcome.

use crate::cache::{cache_key, CacheEntry, CacheStats, CacheStore, InvalidatePattern};
use crate::client::{BundleFetcher, ClientConfig, FetchOptions, HttpTransport, Transport};
use crate::config::LoaderConfig;
use crate::fallback::{DegradationStrategy, FailureReason, FallbackLoader, OfflineQueueEntry, ReplayReport};
use crate::metrics::{LoadingMetrics, MetricsRecorder};
use crate::mount::{MountAdapter, MountRegistry};
use crate::network::{
    LoadingHints, LoadingRecommendation, NetworkAdaptationCoordinator, NetworkConditions,
    NetworkEvent, Subscription,
};
use crate::priority::{PriorityQueue, PriorityWeights, QueueStats};
use crate::registry::FrameworkRegistry;
use crate::retry::{run_with_retry_until, RetryOutcome};
use crate::storage::{BundleStorage, MemoryStorage};
use crate::{FailureStage, LoaderError, Priority, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Where a loaded bundle came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadSource {
    Cache,
    Network,
    /// Fallback direct load
    Direct,
    /// Newest cached version served by the fallback
    Offline,
}

/// A loaded, validated framework bundle
#[derive(Debug, Clone, PartialEq)]
pub struct Framework {
    pub id: String,
    pub version: String,
    pub bundle: Bytes,
    pub dependencies: Vec<String>,
    pub checksum: String,
    pub compressed: bool,
    pub source: LoadSource,
    pub load_time: Duration,
}

impl Framework {
    pub(crate) fn from_entry(entry: CacheEntry, source: LoadSource, load_time: Duration) -> Self {
        Self {
            id: entry.framework_id,
            version: entry.version,
            bundle: entry.bundle,
            dependencies: entry.dependencies,
            checksum: entry.checksum,
            compressed: entry.compressed,
            source,
            load_time,
        }
    }

    /// Cache entry for this bundle
    pub fn to_cache_entry(&self, priority: Priority) -> CacheEntry {
        CacheEntry::new(self.id.clone(), self.version.clone(), self.bundle.clone())
            .with_dependencies(self.dependencies.clone())
            .with_priority(priority)
            .with_compressed(self.compressed)
    }
}

/// A request to load one framework
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub framework_id: String,
    /// Latest registered version when absent
    pub version: Option<String>,
    pub priority: Priority,
    /// Overrides the strategy timeout
    pub timeout: Option<Duration>,
}

impl LoadRequest {
    /// Normal-priority request for the latest version
    pub fn new(framework_id: impl Into<String>) -> Self {
        Self {
            framework_id: framework_id.into(),
            version: None,
            priority: Priority::Normal,
            timeout: None,
        }
    }

    /// Set version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Queue statistics as seen by the service
#[derive(Debug, Clone)]
pub struct ServiceQueueStats {
    /// Requests waiting for a fetch slot
    pub queue: QueueStats,
    /// Fetches holding a slot
    pub active: usize,
    /// Distinct requests waiting or fetching
    pub in_flight: usize,
    pub max_concurrent: usize,
}

struct PendingLoad {
    key: String,
    generation: u64,
    request: LoadRequest,
    version: String,
    recommendation: LoadingRecommendation,
    deadline: Duration,
    enqueued_at: tokio::time::Instant,
}

impl PendingLoad {
    /// Time left before the deadline task fires
    fn remaining(&self) -> Duration {
        self.deadline.saturating_sub(self.enqueued_at.elapsed())
    }
}

struct InFlight {
    generation: u64,
    tx: broadcast::Sender<Result<Framework>>,
    permit: Option<OwnedSemaphorePermit>,
    fetch: Option<AbortHandle>,
    deadline: Option<AbortHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finisher {
    Fetch,
    Deadline,
}

struct ServiceInner {
    config: LoaderConfig,
    registry: Arc<FrameworkRegistry>,
    fetcher: BundleFetcher,
    cache: Arc<CacheStore>,
    coordinator: Arc<NetworkAdaptationCoordinator>,
    fallback: Arc<FallbackLoader>,
    mounts: MountRegistry,
    metrics: MetricsRecorder,
    queue: Mutex<PriorityQueue<PendingLoad>>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    semaphore: Arc<Semaphore>,
    next_generation: AtomicU64,
    shutting_down: AtomicBool,
    subscription: Mutex<Option<Subscription>>,
}

/// Builder for [`FrameworkLoaderService`]
pub struct ServiceBuilder {
    config: LoaderConfig,
    transport: Option<Arc<dyn Transport>>,
    storage: Option<Arc<dyn BundleStorage>>,
    coordinator: Option<Arc<NetworkAdaptationCoordinator>>,
    adapters: Vec<(String, Arc<dyn MountAdapter>)>,
}

impl ServiceBuilder {
    /// Transport for primary and fallback fetches (HTTP by default)
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Persistent bundle storage (in-memory by default)
    pub fn storage(mut self, storage: Arc<dyn BundleStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Share an existing coordinator
    pub fn coordinator(mut self, coordinator: Arc<NetworkAdaptationCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Register a mount adapter
    pub fn mount_adapter(mut self, framework_id: impl Into<String>, adapter: Arc<dyn MountAdapter>) -> Self {
        self.adapters.push((framework_id.into(), adapter));
        self
    }

    /// Validate the configuration, open the cache and start the service
    pub async fn build(self) -> Result<FrameworkLoaderService> {
        let config = self.config;
        config.validate()?;

        let registry = Arc::new(FrameworkRegistry::new(&config.origin, config.frameworks.clone())?);
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(ClientConfig::default())?) as Arc<dyn Transport>,
        };

        let storage: Arc<dyn BundleStorage> = match self.storage {
            Some(storage) if config.enable_service_worker => storage,
            _ => Arc::new(MemoryStorage::new()),
        };
        let cache = Arc::new(
            CacheStore::open(config.cache_config.clone(), storage.as_ref(), &config.cache_name).await?,
        );

        let fetcher = BundleFetcher::new(transport, registry.clone());
        let fallback = Arc::new(FallbackLoader::new(
            fetcher.clone(),
            cache.clone(),
            config.fallback.clone(),
        ));
        let coordinator = match self.coordinator {
            Some(coordinator) => coordinator,
            None => Arc::new(NetworkAdaptationCoordinator::new(config.effective_adaptation())),
        };

        let mounts = MountRegistry::new();
        for (framework_id, adapter) in self.adapters {
            mounts.register(framework_id, adapter);
        }

        let inner = Arc::new(ServiceInner {
            metrics: MetricsRecorder::new(config.target_load_time()),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_loads)),
            registry,
            fetcher,
            cache,
            coordinator,
            fallback,
            mounts,
            queue: Mutex::new(PriorityQueue::new()),
            in_flight: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            subscription: Mutex::new(None),
            config,
        });

        let weak = Arc::downgrade(&inner);
        let subscription = inner.coordinator.on_change(move |event| {
            let NetworkEvent::ConnectivityChanged { online: true } = event else {
                return;
            };
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.shutting_down.load(Ordering::SeqCst) {
                return;
            }
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        inner.fallback.process_offline_queue().await;
                    });
                }
                Err(_) => warn!("Reconnected outside a runtime, offline queue not replayed"),
            }
        });
        *lock(&inner.subscription) = Some(subscription);

        let stats = inner.cache.stats().await;
        info!(
            frameworks = inner.registry.ids().len(),
            max_concurrent = inner.config.max_concurrent_loads,
            cached_entries = stats.entries,
            persistent = inner.config.enable_service_worker,
            "Framework loader initialized"
        );

        Ok(FrameworkLoaderService { inner })
    }
}

/// Loads framework bundles with caching, deduplication, bounded concurrency,
/// network adaptation and fallback
#[derive(Clone)]
pub struct FrameworkLoaderService {
    inner: Arc<ServiceInner>,
}

impl FrameworkLoaderService {
    /// Start building a service
    pub fn builder(config: LoaderConfig) -> ServiceBuilder {
        ServiceBuilder {
            config,
            transport: None,
            storage: None,
            coordinator: None,
            adapters: Vec::new(),
        }
    }

    /// Service with the HTTP transport and in-memory storage
    pub async fn initialize(config: LoaderConfig) -> Result<Self> {
        Self::builder(config).build().await
    }

    /// Load the latest version of a framework
    pub async fn load_framework(&self, framework_id: &str, priority: Priority) -> Result<Framework> {
        self.load(LoadRequest::new(framework_id).with_priority(priority))
            .await
    }

    /// Load a framework
    pub async fn load(&self, request: LoadRequest) -> Result<Framework> {
        let start = Instant::now();
        let inner = &self.inner;
        inner.metrics.request();

        let result = self.load_inner(request, start).await;
        match &result {
            Ok(framework) => inner
                .metrics
                .loaded(framework.bundle.len() as u64, start.elapsed()),
            Err(LoaderError::Timeout { .. }) => {
                inner.metrics.timeout();
                inner.metrics.failure();
            }
            Err(_) => inner.metrics.failure(),
        }
        result
    }

    async fn load_inner(&self, request: LoadRequest, start: Instant) -> Result<Framework> {
        let inner = &self.inner;
        if inner.shutting_down.load(Ordering::SeqCst) {
            return Err(LoaderError::ShutdownInProgress);
        }

        let framework_id = request.framework_id.as_str();
        let version = inner
            .registry
            .resolve_version(framework_id, request.version.as_deref())?;

        if let Some(entry) = inner.cache.get(framework_id, Some(&version)).await {
            inner.metrics.cache_hit();
            debug!(framework_id, version = %version, "Cache hit");
            return Ok(Framework::from_entry(entry, LoadSource::Cache, start.elapsed()));
        }
        inner.metrics.cache_miss();

        let mut rx = inner.join_or_enqueue(request, version)?;
        inner.pump();

        match rx.recv().await {
            Ok(result) => result,
            Err(_) => Err(LoaderError::ShutdownInProgress),
        }
    }

    /// Best-effort low-priority load; returns whether the bundle is now available
    pub async fn preload_framework(&self, framework_id: &str) -> bool {
        let inner = &self.inner;
        let recommendation = inner.coordinator.get_loading_recommendation(
            framework_id,
            Priority::Low,
            LoadingHints {
                preload: true,
                ..Default::default()
            },
        );

        if !recommendation.should_preload {
            let Ok(version) = inner.registry.resolve_version(framework_id, None) else {
                return false;
            };
            debug!(framework_id, "Skipping preload under current network conditions");
            return inner.cache.contains(framework_id, &version).await;
        }

        match self.load_framework(framework_id, Priority::Low).await {
            Ok(_) => true,
            Err(e) => {
                debug!(framework_id, "Preload failed: {}", e);
                false
            }
        }
    }

    /// Load a framework after its declared dependencies, depth-first.
    ///
    /// Returns every loaded framework in load order, the requested one last.
    pub async fn load_with_dependencies(
        &self,
        framework_id: &str,
        priority: Priority,
    ) -> Result<Vec<Framework>> {
        let order = self.inner.registry.load_order(framework_id)?;
        let mut loaded = Vec::with_capacity(order.len() + 1);

        for dependency in order {
            loaded.push(self.load_framework(&dependency, priority).await?);
        }
        loaded.push(self.load_framework(framework_id, priority).await?);
        Ok(loaded)
    }

    /// Load a framework with its dependencies and mount it at `target`
    pub async fn hydrate(
        &self,
        framework_id: &str,
        target: &str,
        props: serde_json::Value,
    ) -> Result<Framework> {
        let framework = self
            .load_with_dependencies(framework_id, Priority::High)
            .await?
            .pop()
            .ok_or_else(|| LoaderError::UnknownFramework(framework_id.to_string()))?;
        self.inner.mounts.mount(&framework, target, &props).await?;
        Ok(framework)
    }

    /// Unmount a framework from `target`
    pub async fn dehydrate(&self, framework_id: &str, target: &str) -> Result<bool> {
        self.inner.mounts.unmount(framework_id, target).await
    }

    /// Drop cached bundles of one framework, or everything
    pub async fn invalidate_framework_cache(&self, framework_id: Option<&str>) -> Result<usize> {
        let pattern = match framework_id {
            Some(id) => InvalidatePattern::Framework(id.to_string()),
            None => InvalidatePattern::All,
        };
        self.inner.cache.invalidate(&pattern).await
    }

    /// Loading metrics snapshot
    pub fn get_loading_metrics(&self) -> LoadingMetrics {
        self.inner.metrics.snapshot()
    }

    /// Queue and concurrency statistics
    pub fn get_queue_stats(&self) -> ServiceQueueStats {
        let inner = &self.inner;
        let in_flight = lock(&inner.in_flight).len();
        let queue = lock(&inner.queue).stats();
        let max_concurrent = inner.config.max_concurrent_loads;
        let active = if inner.semaphore.is_closed() {
            0
        } else {
            max_concurrent.saturating_sub(inner.semaphore.available_permits())
        };

        ServiceQueueStats {
            queue,
            active,
            in_flight,
            max_concurrent,
        }
    }

    /// Cache statistics
    pub async fn get_cache_stats(&self) -> CacheStats {
        self.inner.cache.stats().await
    }

    /// Feed a network conditions snapshot
    pub fn adapt_to_network_conditions(&self, conditions: NetworkConditions) {
        self.inner.coordinator.update_conditions(conditions);
    }

    /// Record a connectivity change; reconnection replays the offline queue
    pub fn set_online(&self, online: bool) {
        self.inner.coordinator.set_online(online);
    }

    /// Replay the offline queue now
    pub async fn process_offline_queue(&self) -> ReplayReport {
        self.inner.fallback.process_offline_queue().await
    }

    /// Requests captured while offline
    pub async fn offline_queue(&self) -> Vec<OfflineQueueEntry> {
        self.inner.fallback.get_offline_queue().await
    }

    /// Change queue weights; queued requests are re-sorted immediately
    pub fn update_priority_weights(&self, weights: PriorityWeights) {
        lock(&self.inner.queue).update_priority_weights(weights);
    }

    /// Network adaptation coordinator
    pub fn coordinator(&self) -> &Arc<NetworkAdaptationCoordinator> {
        &self.inner.coordinator
    }

    /// Fallback loader
    pub fn fallback(&self) -> &Arc<FallbackLoader> {
        &self.inner.fallback
    }

    /// Mount adapters
    pub fn mounts(&self) -> &MountRegistry {
        &self.inner.mounts
    }

    /// Framework registry
    pub fn registry(&self) -> &FrameworkRegistry {
        &self.inner.registry
    }

    /// Active configuration
    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    /// Whether shutdown has started
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Reject every pending and in-flight request and release all slots.
    ///
    /// Idempotent.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        lock(&inner.subscription).take();
        inner.semaphore.close();

        let cancelled: Vec<(String, InFlight)> = lock(&inner.in_flight).drain().collect();
        let queued = lock(&inner.queue).clear();

        for (key, entry) in &cancelled {
            if let Some(handle) = &entry.fetch {
                handle.abort();
            }
            if let Some(handle) = &entry.deadline {
                handle.abort();
            }
            debug!(key = %key, "Cancelling request for shutdown");
            let _ = entry.tx.send(Err(LoaderError::ShutdownInProgress));
        }
        inner
            .metrics
            .shutdown_cancellations(cancelled.len() as u64);
        drop(cancelled);

        if let Err(e) = inner.cache.sync().await {
            warn!("Failed to sync cache metadata on shutdown: {}", e);
        }

        info!(queued = queued.len(), "Framework loader shut down");
    }
}

impl ServiceInner {
    /// Join an in-flight request or register and enqueue a new one
    fn join_or_enqueue(
        self: &Arc<Self>,
        request: LoadRequest,
        version: String,
    ) -> Result<broadcast::Receiver<Result<Framework>>> {
        let key = cache_key(&request.framework_id, &version);
        let mut in_flight = lock(&self.in_flight);

        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(LoaderError::ShutdownInProgress);
        }

        if let Some(existing) = in_flight.get(&key) {
            self.metrics.deduplicated();
            debug!(key = %key, "Joining in-flight request");
            return Ok(existing.tx.subscribe());
        }

        let recommendation = self.coordinator.get_loading_recommendation(
            &request.framework_id,
            request.priority,
            LoadingHints::default(),
        );
        let deadline = request.timeout.unwrap_or_else(|| recommendation.timeout());
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = broadcast::channel(4);

        let deadline_task = {
            let inner = Arc::clone(self);
            let key = key.clone();
            let framework_id = request.framework_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                let error = LoaderError::Timeout {
                    framework_id,
                    after_ms: deadline.as_millis() as u64,
                };
                if inner.finish(&key, generation, Err(error), Finisher::Deadline) {
                    warn!(key = %key, ?deadline, "Request timed out");
                }
                inner.pump();
            })
        };

        in_flight.insert(
            key.clone(),
            InFlight {
                generation,
                tx,
                permit: None,
                fetch: None,
                deadline: Some(deadline_task.abort_handle()),
            },
        );

        let priority = request.priority;
        lock(&self.queue).enqueue(
            priority,
            PendingLoad {
                key: key.clone(),
                generation,
                request,
                version,
                recommendation,
                deadline,
                enqueued_at: tokio::time::Instant::now(),
            },
        );

        debug!(key = %key, %priority, ?deadline, "Queued load request");
        Ok(rx)
    }

    /// Start queued fetches while slots are free
    fn pump(self: &Arc<Self>) {
        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                return;
            }

            let mut in_flight = lock(&self.in_flight);
            let mut queue = lock(&self.queue);
            if queue.is_empty() {
                return;
            }

            let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                return;
            };
            let Some(item) = queue.dequeue() else {
                return;
            };
            let pending = item.payload;

            let Some(entry) = in_flight.get_mut(&pending.key) else {
                continue;
            };
            if entry.generation != pending.generation {
                continue;
            }

            debug!(
                key = %pending.key,
                priority = %item.priority,
                waited = ?item.enqueued_at.elapsed(),
                "Starting fetch"
            );

            entry.permit = Some(permit);
            let task = tokio::spawn(Arc::clone(self).run_fetch(pending));
            entry.fetch = Some(task.abort_handle());
        }
    }

    async fn run_fetch(self: Arc<Self>, pending: PendingLoad) {
        let started = Instant::now();
        let framework_id = pending.request.framework_id.clone();
        let version = pending.version.clone();
        let recommendation = &pending.recommendation;
        let priority = pending.request.priority;

        // Retries stop halfway to the deadline so the fallback gets the rest
        let remaining = pending.remaining();
        let primary_budget = remaining / 2;
        let options = FetchOptions::default()
            .with_timeout(recommendation.timeout().min(remaining))
            .with_priority(priority)
            .with_compression(recommendation.compression_required);

        let outcome = if self.coordinator.is_online() {
            let policy = recommendation.retry_policy().fit_within(primary_budget);
            let cutoff = tokio::time::Instant::now() + primary_budget;
            run_with_retry_until(&policy, Some(cutoff), |attempt| {
                self.metrics.network_fetch();
                if attempt > 1 {
                    self.metrics.retries(1);
                }
                debug!(framework_id = %framework_id, version = %version, attempt, "Fetching bundle");
                self.fetcher.fetch(&framework_id, &version, &options)
            })
            .await
        } else {
            RetryOutcome {
                result: Err(LoaderError::Offline(framework_id.clone())),
                retries: 0,
            }
        };

        let result = match outcome.result {
            Ok(entry) => {
                self.coordinator
                    .record_transfer(entry.size_bytes, started.elapsed());
                if let Err(e) = self.store_entry(entry.clone()).await {
                    warn!(framework_id = %framework_id, version = %version, "Bundle not cached: {}", e);
                }
                info!(
                    framework_id = %framework_id,
                    version = %version,
                    size = entry.size_bytes,
                    retries = outcome.retries,
                    "Loaded framework"
                );
                Ok(Framework::from_entry(entry, LoadSource::Network, started.elapsed()))
            }
            Err(e) => self.recover(&pending, e, outcome.retries).await,
        };

        let result = match result {
            Err(_) if self.shutting_down.load(Ordering::SeqCst) => Err(LoaderError::ShutdownInProgress),
            other => other,
        };

        self.finish(&pending.key, pending.generation, result, Finisher::Fetch);
        self.pump();
    }

    async fn recover(&self, pending: &PendingLoad, cause: LoaderError, retries: u32) -> Result<Framework> {
        let framework_id = pending.request.framework_id.as_str();
        let priority = pending.request.priority;

        if !self.config.fallback_enabled {
            let stage = match &cause {
                LoaderError::Offline(_) => FailureStage::Offline,
                e if retries > 0 && e.is_retryable() => FailureStage::Retry,
                e => e.stage(),
            };
            return Err(LoaderError::LoadFailed {
                framework_id: framework_id.to_string(),
                stage,
                degradation: DegradationStrategy::for_reason(FailureReason::from_error(&cause)),
                cause: Box::new(cause),
            });
        }

        let request = LoadRequest {
            version: Some(pending.version.clone()),
            ..pending.request.clone()
        };
        let online = self.coordinator.is_online();

        let budget = pending.remaining();

        match self.fallback.recover(&request, cause, online, Some(budget)).await {
            Ok(framework) => {
                self.metrics.fallback_success();
                if framework.source == LoadSource::Direct {
                    if let Err(e) = self.store_entry(framework.to_cache_entry(priority)).await {
                        warn!(framework_id, "Fallback bundle not cached: {}", e);
                    }
                }
                Ok(framework)
            }
            Err(e) => {
                if e.stage() == FailureStage::Offline {
                    self.metrics.offline_queued();
                }
                Err(e)
            }
        }
    }

    /// Write a fetched bundle to the cache on its own task, so aborting the
    /// request never interrupts an index or store mutation
    async fn store_entry(&self, entry: CacheEntry) -> Result<()> {
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move { cache.put(entry).await })
            .await
            .map_err(|e| LoaderError::Storage(format!("cache write task failed: {}", e)))?
    }

    /// Complete a request: remove it everywhere, release its slot and notify
    /// all waiters. Returns false if the request had already finished.
    fn finish(&self, key: &str, generation: u64, result: Result<Framework>, by: Finisher) -> bool {
        let entry = {
            let mut in_flight = lock(&self.in_flight);
            match in_flight.get(key) {
                Some(entry) if entry.generation == generation => in_flight.remove(key),
                _ => None,
            }
        };
        let Some(entry) = entry else {
            return false;
        };

        lock(&self.queue).remove(|item| item.payload.key == key && item.payload.generation == generation);

        if by != Finisher::Fetch {
            if let Some(handle) = &entry.fetch {
                handle.abort();
            }
        }
        if by != Finisher::Deadline {
            if let Some(handle) = &entry.deadline {
                handle.abort();
            }
        }

        drop(entry.permit);
        let waiters = entry.tx.receiver_count();
        let _ = entry.tx.send(result);
        debug!(key, waiters, "Request finished");
        true
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FetchResponse;
    use crate::registry::FrameworkManifest;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use url::Url;

    struct Echo {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl Transport for Echo {
        async fn fetch(&self, url: &Url, _options: &FetchOptions) -> Result<FetchResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(FetchResponse::ok(Bytes::from(url.path().to_string())))
        }
    }

    async fn service(delay: Duration) -> (FrameworkLoaderService, Arc<Echo>) {
        let transport = Arc::new(Echo {
            calls: AtomicUsize::new(0),
            delay,
        });
        let config = LoaderConfig::default()
            .with_origin("https://cdn.example.com/")
            .with_framework(FrameworkManifest::new("react", "18.2.0"))
            .with_framework(FrameworkManifest::new("vue", "3.4.0"));
        let service = FrameworkLoaderService::builder(config)
            .transport(transport.clone())
            .build()
            .await
            .unwrap();
        (service, transport)
    }

    #[tokio::test]
    async fn test_second_load_is_cache_hit() {
        let (service, transport) = service(Duration::ZERO).await;

        let first = service.load_framework("react", Priority::Normal).await.unwrap();
        assert_eq!(first.source, LoadSource::Network);
        let second = service.load_framework("react", Priority::Normal).await.unwrap();
        assert_eq!(second.source, LoadSource::Cache);
        assert_eq!(first.bundle, second.bundle);

        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        let metrics = service.get_loading_metrics();
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.network_fetches, 1);
    }

    #[tokio::test]
    async fn test_unknown_framework_fails_fast() {
        let (service, transport) = service(Duration::ZERO).await;
        let err = service.load_framework("ember", Priority::High).await.unwrap_err();
        assert!(matches!(err, LoaderError::UnknownFramework(_)));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert_eq!(service.get_loading_metrics().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_slot() {
        let (service, _) = service(Duration::from_secs(60)).await;

        let err = service
            .load(LoadRequest::new("vue").with_timeout(Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert!(matches!(err, LoaderError::Timeout { after_ms: 200, .. }));

        let stats = service.get_queue_stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.queue.total, 0);
        assert_eq!(service.get_loading_metrics().timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_rejects_pending_and_is_idempotent() {
        let (service, _) = service(Duration::from_secs(5)).await;

        let pending = {
            let service = service.clone();
            tokio::spawn(async move { service.load_framework("react", Priority::Normal).await })
        };
        tokio::task::yield_now().await;
        while service.get_queue_stats().in_flight == 0 {
            tokio::task::yield_now().await;
        }

        service.shutdown().await;
        service.shutdown().await;

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, LoaderError::ShutdownInProgress));
        assert!(matches!(
            service.load_framework("vue", Priority::Normal).await,
            Err(LoaderError::ShutdownInProgress)
        ));
        assert_eq!(service.get_queue_stats().in_flight, 0);
        assert_eq!(service.get_loading_metrics().shutdown_cancellations, 1);
    }

    #[tokio::test]
    async fn test_invalidate_single_framework_and_all() {
        let (service, _) = service(Duration::ZERO).await;
        service.load_framework("react", Priority::Normal).await.unwrap();
        service.load_framework("vue", Priority::Normal).await.unwrap();

        assert_eq!(service.invalidate_framework_cache(Some("react")).await.unwrap(), 1);
        assert_eq!(service.get_cache_stats().await.entries, 1);

        assert_eq!(service.invalidate_framework_cache(None).await.unwrap(), 1);
        assert_eq!(service.get_cache_stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_service_worker_disabled_uses_memory() {
        let storage = Arc::new(MemoryStorage::new());
        let config = LoaderConfig::default()
            .with_origin("https://cdn.example.com/")
            .with_framework(FrameworkManifest::new("react", "18.2.0"))
            .with_service_worker(false);
        let service = FrameworkLoaderService::builder(config.clone())
            .transport(Arc::new(Echo {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }))
            .storage(storage.clone())
            .build()
            .await
            .unwrap();
        service.load_framework("react", Priority::Normal).await.unwrap();

        let store = storage.open(&config.cache_name).await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
    }
}
