//! Framework Loading Engine for Multi-Framework Island Pages
//!
//! Loads, caches and serves the runtime bundles of the UI frameworks whose
//! islands coexist on one page:
//!
//! - **Priority Queue**: critical islands are fetched first, FIFO within a level
//! - **Request Deduplication**: one fetch per framework version, shared by all callers
//! - **Bounded Concurrency**: at most `maxConcurrentLoads` fetches in flight
//! - **Versioned Cache**: checksum-validated, size-bounded, LRU/LFU/priority eviction
//! - **Network Adaptation**: timeouts, retries and preloading follow the connection
//! - **Fallback**: direct loads, stale cache, offline queue and degradation levels
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   FrameworkLoaderService                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐      │
//! │  │   Priority   │ -> │  Semaphore   │ -> │   Fetcher    │      │
//! │  │   Queue      │    │  (max loads) │    │  (+ retry)   │      │
//! │  └──────────────┘    └──────────────┘    └──────────────┘      │
//! │         ↑                    ↑              ↓          ↓        │
//! │     in-flight          Network          ┌────────┐ ┌────────┐  │
//! │       dedupe          Adaptation        │ Cache  │ │Fallback│  │
//! │                       Coordinator       │ Store  │ │ Loader │  │
//! │                                         └────────┘ └────────┘  │
//! │                                             ↓                   │
//! │                                       ┌──────────────┐          │
//! │                                       │ Mount adapter│          │
//! │                                       └──────────────┘          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod cache;
mod client;
mod config;
mod error;
mod fallback;
mod integrity;
mod loader;
mod metrics;
mod mount;
mod network;
mod priority;
mod registry;
mod retry;
mod storage;

pub use cache::{
    cache_key, headers, CacheConfig, CacheEntry, CacheStats, CacheStore, EvictionPolicy,
    InvalidatePattern,
};
pub use client::{BundleFetcher, ClientConfig, FetchOptions, FetchResponse, HttpTransport, Transport};
pub use config::{LoaderConfig, LoadingStrategyConfig};
pub use error::{FailureStage, LoaderError, Result};
pub use fallback::{
    DegradationLevel, DegradationStrategy, FailureReason, FallbackConfig, FallbackLoader,
    OfflineQueueEntry, ReplayReport,
};
pub use integrity::{checksum, verify};
pub use loader::{
    Framework, FrameworkLoaderService, LoadRequest, LoadSource, ServiceBuilder, ServiceQueueStats,
};
pub use metrics::{LoadingMetrics, MetricsRecorder};
pub use mount::{MountAdapter, MountRegistry};
pub use network::{
    AdaptationConfig, AdaptationConfigPatch, BandwidthMonitor, EffectiveType, LoadingHints,
    LoadingRecommendation, LoadingStrategy, NetworkAdaptationCoordinator, NetworkConditions,
    NetworkEvent, Subscription,
};
pub use priority::{
    OldestItem, Priority, PriorityQueue, PriorityWeights, QueueItem, QueueStats,
};
pub use registry::{FrameworkManifest, FrameworkRegistry, DEFAULT_PATH_TEMPLATE};
pub use retry::{
    backoff_delay, run_with_retry, run_with_retry_until, RetryDecision, RetryMachine, RetryOutcome,
    RetryPolicy, RetryState,
};
pub use storage::{
    BundleStorage, BundleStore, DiskStorage, DiskStore, Headers, MemoryStorage, MemoryStore,
    StoredBundle,
};

/// Prelude for common imports
pub mod prelude {
    pub use super::{
        CacheConfig, EvictionPolicy, Framework, FrameworkLoaderService, FrameworkManifest,
        LoadRequest, LoaderConfig, LoaderError, NetworkConditions, Priority, Result,
    };
}
