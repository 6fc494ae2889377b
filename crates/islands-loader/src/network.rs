//! Network-adaptive loading strategy
//!
//! The coordinator keeps the latest [`NetworkConditions`] snapshot, a
//! connectivity history and measured transfer bandwidth, and turns them into a
//! [`LoadingRecommendation`] for every request.
//!
//! | condition                         | strategy     | preload | timeout          | retries |
//! |-----------------------------------|--------------|---------|------------------|---------|
//! | 4g, no save-data                  | aggressive   | yes     | short            | 3       |
//! | 3g                                | conservative | no      | moderate         | 3       |
//! | 2g or slower, or save-data        | conservative | no      | long             | 3       |
//! | unstable connectivity             | conservative | no      | (unchanged)      | 5       |
//!
//! Critical requests never wait longer than the emergency ceiling.

use crate::Priority;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Effective connection type, slowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EffectiveType {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
}

impl EffectiveType {
    /// Parse a platform connection type string
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "slow-2g" => Some(EffectiveType::Slow2g),
            "2g" => Some(EffectiveType::TwoG),
            "3g" => Some(EffectiveType::ThreeG),
            "4g" | "5g" | "wifi" | "ethernet" => Some(EffectiveType::FourG),
            _ => None,
        }
    }
}

/// Snapshot of the platform network signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConditions {
    pub effective_type: EffectiveType,
    /// Downlink estimate in megabits per second
    pub downlink_mbps: f64,
    /// Round-trip time estimate in milliseconds
    pub rtt_ms: u32,
    /// Data saver enabled
    pub save_data: bool,
}

impl Default for NetworkConditions {
    fn default() -> Self {
        Self {
            effective_type: EffectiveType::FourG,
            downlink_mbps: 10.0,
            rtt_ms: 50,
            save_data: false,
        }
    }
}

impl NetworkConditions {
    /// Conditions for a given connection type with typical estimates
    pub fn of_type(effective_type: EffectiveType) -> Self {
        let (downlink_mbps, rtt_ms) = match effective_type {
            EffectiveType::Slow2g => (0.05, 2000),
            EffectiveType::TwoG => (0.25, 1400),
            EffectiveType::ThreeG => (0.7, 270),
            EffectiveType::FourG => (10.0, 50),
        };
        Self {
            effective_type,
            downlink_mbps,
            rtt_ms,
            save_data: false,
        }
    }

    /// With data saver flag
    pub fn with_save_data(mut self, save_data: bool) -> Self {
        self.save_data = save_data;
        self
    }
}

/// Loading aggressiveness profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingStrategy {
    Aggressive,
    Conservative,
}

/// Per-request loading parameters derived from current conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingRecommendation {
    pub strategy: LoadingStrategy,
    pub should_preload: bool,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub compression_required: bool,
}

impl LoadingRecommendation {
    /// Request deadline
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Retry policy for the primary fetch path
    pub fn retry_policy(&self) -> crate::RetryPolicy {
        crate::RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }
}

/// Caller-supplied hints for a recommendation
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadingHints {
    /// Expected bundle size, stretches the timeout on slow links
    pub expected_size_bytes: Option<u64>,
    /// Request is a speculative preload
    pub preload: bool,
}

/// Coordinator thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdaptationConfig {
    /// Used before any conditions snapshot arrives
    pub default_timeout_ms: u64,
    pub default_max_retries: u32,
    pub aggressive_timeout_ms: u64,
    pub aggressive_max_retries: u32,
    pub aggressive_retry_delay_ms: u64,
    /// Timeout on 3g-class links
    pub moderate_timeout_ms: u64,
    pub conservative_timeout_ms: u64,
    pub conservative_max_retries: u32,
    pub conservative_retry_delay_ms: u64,
    pub unstable_max_retries: u32,
    pub unstable_retry_delay_ms: u64,
    /// Ceiling applied to critical requests under a conservative strategy
    pub emergency_timeout_ms: u64,
    pub instability_window_ms: u64,
    /// Disconnections within the window that mark the link unstable
    pub instability_threshold: usize,
    /// Measured bandwidth (bytes/sec) below which 4g is not trusted
    pub min_bandwidth_bps: u64,
    /// RTT above which 4g is not trusted
    pub slow_rtt_ms: u32,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 10_000,
            default_max_retries: 3,
            aggressive_timeout_ms: 3_000,
            aggressive_max_retries: 3,
            aggressive_retry_delay_ms: 500,
            moderate_timeout_ms: 8_000,
            conservative_timeout_ms: 15_000,
            conservative_max_retries: 3,
            conservative_retry_delay_ms: 2_000,
            unstable_max_retries: 5,
            unstable_retry_delay_ms: 4_000,
            emergency_timeout_ms: 3_000,
            instability_window_ms: 60_000,
            instability_threshold: 3,
            min_bandwidth_bps: 50 * 1024,
            slow_rtt_ms: 800,
        }
    }
}

/// Partial update for [`AdaptationConfig`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdaptationConfigPatch {
    pub default_timeout_ms: Option<u64>,
    pub default_max_retries: Option<u32>,
    pub aggressive_timeout_ms: Option<u64>,
    pub aggressive_max_retries: Option<u32>,
    pub aggressive_retry_delay_ms: Option<u64>,
    pub moderate_timeout_ms: Option<u64>,
    pub conservative_timeout_ms: Option<u64>,
    pub conservative_max_retries: Option<u32>,
    pub conservative_retry_delay_ms: Option<u64>,
    pub unstable_max_retries: Option<u32>,
    pub unstable_retry_delay_ms: Option<u64>,
    pub emergency_timeout_ms: Option<u64>,
    pub instability_window_ms: Option<u64>,
    pub instability_threshold: Option<usize>,
    pub min_bandwidth_bps: Option<u64>,
    pub slow_rtt_ms: Option<u32>,
}

impl AdaptationConfig {
    /// Apply the fields present in `patch`
    pub fn apply(&mut self, patch: &AdaptationConfigPatch) {
        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = patch.$field {
                    self.$field = value;
                })*
            };
        }
        merge!(
            default_timeout_ms,
            default_max_retries,
            aggressive_timeout_ms,
            aggressive_max_retries,
            aggressive_retry_delay_ms,
            moderate_timeout_ms,
            conservative_timeout_ms,
            conservative_max_retries,
            conservative_retry_delay_ms,
            unstable_max_retries,
            unstable_retry_delay_ms,
            emergency_timeout_ms,
            instability_window_ms,
            instability_threshold,
            min_bandwidth_bps,
            slow_rtt_ms,
        );
    }
}

/// Bandwidth measurement sample
#[derive(Debug, Clone, Copy)]
struct BandwidthSample {
    bytes: u64,
    duration: Duration,
    timestamp: Instant,
}

impl BandwidthSample {
    fn bytes_per_second(&self) -> f64 {
        self.bytes as f64 / self.duration.as_secs_f64().max(1e-3)
    }
}

/// Measured transfer bandwidth
pub struct BandwidthMonitor {
    samples: Mutex<VecDeque<BandwidthSample>>,
    sample_window: Duration,
    max_samples: usize,
    total_bytes: AtomicU64,
}

impl BandwidthMonitor {
    /// Create a new bandwidth monitor
    pub fn new(sample_window: Duration, max_samples: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(max_samples)),
            sample_window,
            max_samples,
            total_bytes: AtomicU64::new(0),
        }
    }

    /// Record a completed transfer
    pub fn record(&self, bytes: u64, duration: Duration) {
        let now = Instant::now();
        let mut samples = lock(&self.samples);

        while samples
            .front()
            .map_or(false, |s| now.duration_since(s.timestamp) > self.sample_window)
        {
            samples.pop_front();
        }
        if samples.len() >= self.max_samples {
            samples.pop_front();
        }
        samples.push_back(BandwidthSample {
            bytes,
            duration,
            timestamp: now,
        });

        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Weighted moving average in bytes/sec (recent samples count more), 0 if unknown
    pub fn current_bandwidth(&self) -> f64 {
        let samples = lock(&self.samples);

        let mut total_weight = 0.0;
        let mut weighted_sum = 0.0;
        for (i, sample) in samples.iter().enumerate() {
            let weight = (i + 1) as f64;
            weighted_sum += sample.bytes_per_second() * weight;
            total_weight += weight;
        }

        if total_weight > 0.0 {
            weighted_sum / total_weight
        } else {
            0.0
        }
    }

    /// Total bytes recorded
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }
}

/// Event delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    /// New conditions snapshot differing from the previous one
    ConditionsChanged(NetworkConditions),
    /// Online/offline transition
    ConnectivityChanged { online: bool },
}

type Handler = Arc<dyn Fn(&NetworkEvent) + Send + Sync>;

#[derive(Default)]
struct SubscriberRegistry {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<u64, Handler>>,
}

impl SubscriberRegistry {
    fn emit(&self, event: &NetworkEvent) {
        // Call outside the lock so handlers may subscribe/unsubscribe
        let handlers: Vec<Handler> = lock(&self.handlers).values().cloned().collect();
        for handler in handlers {
            handler(event);
        }
    }
}

/// Handle returned by [`NetworkAdaptationCoordinator::on_change`].
///
/// Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    registry: Weak<SubscriberRegistry>,
}

impl Subscription {
    /// Stop receiving events
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry.handlers).remove(&self.id);
        }
    }
}

struct CoordinatorState {
    config: AdaptationConfig,
    conditions: Option<NetworkConditions>,
    online: bool,
    disconnections: VecDeque<Instant>,
}

impl CoordinatorState {
    fn is_unstable(&mut self, now: Instant) -> bool {
        let window = Duration::from_millis(self.config.instability_window_ms);
        while self
            .disconnections
            .front()
            .map_or(false, |t| now.duration_since(*t) > window)
        {
            self.disconnections.pop_front();
        }
        self.config.instability_threshold > 0
            && self.disconnections.len() >= self.config.instability_threshold
    }
}

/// Turns network observations into loading recommendations
pub struct NetworkAdaptationCoordinator {
    state: Mutex<CoordinatorState>,
    bandwidth: BandwidthMonitor,
    subscribers: Arc<SubscriberRegistry>,
}

impl NetworkAdaptationCoordinator {
    /// Create a coordinator with no conditions snapshot yet
    pub fn new(config: AdaptationConfig) -> Self {
        Self {
            state: Mutex::new(CoordinatorState {
                config,
                conditions: None,
                online: true,
                disconnections: VecDeque::new(),
            }),
            bandwidth: BandwidthMonitor::new(Duration::from_secs(30), 20),
            subscribers: Arc::new(SubscriberRegistry::default()),
        }
    }

    /// Recommendation for loading `framework_id` at `priority`
    pub fn get_loading_recommendation(
        &self,
        framework_id: &str,
        priority: Priority,
        hints: LoadingHints,
    ) -> LoadingRecommendation {
        let measured = self.bandwidth.current_bandwidth();
        let mut state = lock(&self.state);
        let unstable = state.is_unstable(Instant::now());
        let config = &state.config;

        let measured_slow = measured > 0.0 && measured < config.min_bandwidth_bps as f64;

        let aggressive = LoadingRecommendation {
            strategy: LoadingStrategy::Aggressive,
            should_preload: true,
            timeout_ms: config.aggressive_timeout_ms,
            max_retries: config.aggressive_max_retries,
            retry_delay_ms: config.aggressive_retry_delay_ms,
            compression_required: false,
        };
        let conservative = |timeout_ms: u64| LoadingRecommendation {
            strategy: LoadingStrategy::Conservative,
            should_preload: false,
            timeout_ms,
            max_retries: config.conservative_max_retries,
            retry_delay_ms: config.conservative_retry_delay_ms,
            compression_required: true,
        };

        let mut rec = match state.conditions {
            None if measured_slow => conservative(config.moderate_timeout_ms),
            None => LoadingRecommendation {
                timeout_ms: config.default_timeout_ms,
                max_retries: config.default_max_retries,
                ..aggressive
            },
            Some(c) if c.save_data || c.effective_type <= EffectiveType::TwoG => {
                conservative(config.conservative_timeout_ms)
            }
            Some(c) if c.effective_type == EffectiveType::ThreeG => {
                conservative(config.moderate_timeout_ms)
            }
            Some(c) if measured_slow || c.rtt_ms > config.slow_rtt_ms => {
                conservative(config.moderate_timeout_ms)
            }
            Some(_) => aggressive,
        };

        if unstable {
            rec.strategy = LoadingStrategy::Conservative;
            rec.should_preload = false;
            rec.max_retries = rec.max_retries.max(config.unstable_max_retries);
            rec.retry_delay_ms = rec.retry_delay_ms.max(config.unstable_retry_delay_ms);
        }

        // Stretch the deadline for large bundles on known-slow links
        if let (Some(size), Some(c)) = (hints.expected_size_bytes, state.conditions) {
            if c.downlink_mbps > 0.0 && rec.strategy == LoadingStrategy::Conservative {
                let transfer_ms = (size as f64 * 8.0) / (c.downlink_mbps * 1000.0);
                let needed = (transfer_ms * 2.0) as u64 + c.rtt_ms as u64;
                rec.timeout_ms = rec.timeout_ms.max(needed);
            }
        }

        if priority == Priority::Critical && rec.strategy == LoadingStrategy::Conservative {
            rec.timeout_ms = rec.timeout_ms.min(config.emergency_timeout_ms);
            // Backoff gets at most half the ceiling, attempts the rest
            let backoff_budget = Duration::from_millis(config.emergency_timeout_ms / 2);
            rec.retry_delay_ms = rec.retry_policy().fit_within(backoff_budget).base_delay_ms;
        }

        if hints.preload && !rec.should_preload {
            debug!(framework_id, "Preload discouraged by current conditions");
        }

        debug!(
            framework_id,
            %priority,
            strategy = ?rec.strategy,
            timeout_ms = rec.timeout_ms,
            max_retries = rec.max_retries,
            unstable,
            "Loading recommendation"
        );

        rec
    }

    /// Merge a partial configuration update
    pub fn update_config(&self, patch: &AdaptationConfigPatch) {
        lock(&self.state).config.apply(patch);
    }

    /// Current configuration
    pub fn config(&self) -> AdaptationConfig {
        lock(&self.state).config.clone()
    }

    /// Replace the conditions snapshot, notifying subscribers on change
    pub fn update_conditions(&self, conditions: NetworkConditions) {
        let changed = {
            let mut state = lock(&self.state);
            let changed = state.conditions != Some(conditions);
            state.conditions = Some(conditions);
            changed
        };

        if changed {
            info!(
                effective_type = ?conditions.effective_type,
                downlink_mbps = conditions.downlink_mbps,
                rtt_ms = conditions.rtt_ms,
                save_data = conditions.save_data,
                "Network conditions changed"
            );
            self.subscribers
                .emit(&NetworkEvent::ConditionsChanged(conditions));
        }
    }

    /// Latest conditions snapshot
    pub fn conditions(&self) -> Option<NetworkConditions> {
        lock(&self.state).conditions
    }

    /// Record a connectivity change, notifying subscribers on transition
    pub fn set_online(&self, online: bool) {
        let transitioned = {
            let mut state = lock(&self.state);
            if state.online == online {
                false
            } else {
                state.online = online;
                if !online {
                    state.disconnections.push_back(Instant::now());
                }
                true
            }
        };

        if transitioned {
            info!(online, "Connectivity changed");
            self.subscribers
                .emit(&NetworkEvent::ConnectivityChanged { online });
        }
    }

    /// Whether the client is currently online
    pub fn is_online(&self) -> bool {
        lock(&self.state).online
    }

    /// Whether recent disconnections mark the link as unstable
    pub fn is_unstable(&self) -> bool {
        lock(&self.state).is_unstable(Instant::now())
    }

    /// Feed a completed transfer into the bandwidth estimate
    pub fn record_transfer(&self, bytes: u64, duration: Duration) {
        self.bandwidth.record(bytes, duration);
    }

    /// Bandwidth monitor
    pub fn bandwidth(&self) -> &BandwidthMonitor {
        &self.bandwidth
    }

    /// Register a handler for network events.
    ///
    /// Each event is delivered at most once per handler.
    pub fn on_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&NetworkEvent) + Send + Sync + 'static,
    {
        let id = self.subscribers.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.subscribers.handlers).insert(id, Arc::new(handler));
        Subscription {
            id,
            registry: Arc::downgrade(&self.subscribers),
        }
    }
}

impl Default for NetworkAdaptationCoordinator {
    fn default() -> Self {
        Self::new(AdaptationConfig::default())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn recommend(coordinator: &NetworkAdaptationCoordinator, priority: Priority) -> LoadingRecommendation {
        coordinator.get_loading_recommendation("react", priority, LoadingHints::default())
    }

    #[test]
    fn test_fast_network_is_aggressive() {
        let coordinator = NetworkAdaptationCoordinator::default();
        coordinator.update_conditions(NetworkConditions::of_type(EffectiveType::FourG));

        let rec = recommend(&coordinator, Priority::Normal);
        assert_eq!(rec.strategy, LoadingStrategy::Aggressive);
        assert!(rec.should_preload);
        assert!(rec.timeout_ms < 5000);
        assert!(rec.max_retries > 2);
        assert!(!rec.compression_required);
    }

    #[test]
    fn test_slow_network_is_conservative() {
        let coordinator = NetworkAdaptationCoordinator::default();
        coordinator.update_conditions(NetworkConditions::of_type(EffectiveType::TwoG));

        let rec = recommend(&coordinator, Priority::Normal);
        assert_eq!(rec.strategy, LoadingStrategy::Conservative);
        assert!(!rec.should_preload);
        assert!(rec.timeout_ms > 5000);
        assert!(rec.max_retries >= 3);
        assert!(rec.compression_required);
    }

    #[test]
    fn test_save_data_is_conservative_on_4g() {
        let coordinator = NetworkAdaptationCoordinator::default();
        coordinator.update_conditions(
            NetworkConditions::of_type(EffectiveType::FourG).with_save_data(true),
        );

        let rec = recommend(&coordinator, Priority::High);
        assert_eq!(rec.strategy, LoadingStrategy::Conservative);
        assert!(rec.compression_required);
    }

    #[test]
    fn test_critical_gets_emergency_ceiling() {
        let coordinator = NetworkAdaptationCoordinator::default();
        coordinator.update_conditions(NetworkConditions::of_type(EffectiveType::Slow2g));

        let normal = recommend(&coordinator, Priority::Normal);
        let critical = recommend(&coordinator, Priority::Critical);

        assert_eq!(critical.strategy, LoadingStrategy::Conservative);
        assert!(normal.timeout_ms > critical.timeout_ms);
        assert!(critical.timeout_ms <= coordinator.config().emergency_timeout_ms);
        // The whole exponential schedule, worst-case jitter included, fits
        let policy = critical.retry_policy();
        let backoff: Duration = (1..=policy.max_retries).map(|n| policy.delay_for(n)).sum();
        assert!(backoff.mul_f64(1.3) <= Duration::from_millis(critical.timeout_ms / 2));
    }

    #[test]
    fn test_critical_ceiling_beats_size_hint() {
        let coordinator = NetworkAdaptationCoordinator::default();
        coordinator.update_conditions(NetworkConditions::of_type(EffectiveType::TwoG));

        let hints = LoadingHints {
            expected_size_bytes: Some(5 * 1024 * 1024),
            preload: false,
        };
        let normal = coordinator.get_loading_recommendation("angular", Priority::Normal, hints);
        let critical = coordinator.get_loading_recommendation("angular", Priority::Critical, hints);

        assert!(normal.timeout_ms > coordinator.config().conservative_timeout_ms);
        assert!(critical.timeout_ms <= coordinator.config().emergency_timeout_ms);
    }

    #[test]
    fn test_unstable_connection_boosts_retries() {
        let coordinator = NetworkAdaptationCoordinator::default();
        coordinator.update_conditions(NetworkConditions::of_type(EffectiveType::FourG));
        let baseline = recommend(&coordinator, Priority::Normal);

        for _ in 0..3 {
            coordinator.set_online(false);
            coordinator.set_online(true);
        }
        assert!(coordinator.is_unstable());

        let rec = recommend(&coordinator, Priority::Normal);
        assert_eq!(rec.strategy, LoadingStrategy::Conservative);
        assert!(!rec.should_preload);
        assert!(rec.max_retries > 3);
        assert!(rec.retry_delay_ms > baseline.retry_delay_ms);
    }

    #[test]
    fn test_measured_bandwidth_demotes_4g() {
        let coordinator = NetworkAdaptationCoordinator::default();
        coordinator.update_conditions(NetworkConditions::of_type(EffectiveType::FourG));

        // 10KB in one second is far below the 50KB/s floor
        coordinator.record_transfer(10 * 1024, Duration::from_secs(1));

        let rec = recommend(&coordinator, Priority::Normal);
        assert_eq!(rec.strategy, LoadingStrategy::Conservative);
    }

    #[test]
    fn test_defaults_before_first_snapshot() {
        let coordinator = NetworkAdaptationCoordinator::default();
        let rec = recommend(&coordinator, Priority::Normal);
        let config = coordinator.config();
        assert_eq!(rec.timeout_ms, config.default_timeout_ms);
        assert_eq!(rec.max_retries, config.default_max_retries);
    }

    #[test]
    fn test_update_config_patch() {
        let coordinator = NetworkAdaptationCoordinator::default();
        coordinator.update_config(&AdaptationConfigPatch {
            aggressive_timeout_ms: Some(1200),
            ..Default::default()
        });
        coordinator.update_conditions(NetworkConditions::of_type(EffectiveType::FourG));

        let rec = recommend(&coordinator, Priority::Normal);
        assert_eq!(rec.timeout_ms, 1200);
        assert_eq!(coordinator.config().conservative_timeout_ms, 15_000);
    }

    #[test]
    fn test_subscription_delivery_and_unsubscribe() {
        let coordinator = NetworkAdaptationCoordinator::default();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        let subscription = coordinator.on_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        coordinator.update_conditions(NetworkConditions::of_type(EffectiveType::ThreeG));
        // Same snapshot again is not an event
        coordinator.update_conditions(NetworkConditions::of_type(EffectiveType::ThreeG));
        coordinator.set_online(false);
        coordinator.set_online(false);
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        subscription.unsubscribe();
        coordinator.set_online(true);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_bandwidth_monitor() {
        let monitor = BandwidthMonitor::new(Duration::from_secs(5), 10);
        assert_eq!(monitor.current_bandwidth(), 0.0);

        monitor.record(1024 * 1024, Duration::from_secs(1));
        monitor.record(2048 * 1024, Duration::from_secs(1));

        assert!(monitor.current_bandwidth() > 1_000_000.0);
        assert_eq!(monitor.total_bytes(), 3 * 1024 * 1024);
    }

    #[test]
    fn test_effective_type_parse_and_order() {
        assert_eq!(EffectiveType::parse("4g"), Some(EffectiveType::FourG));
        assert_eq!(EffectiveType::parse("slow-2g"), Some(EffectiveType::Slow2g));
        assert_eq!(EffectiveType::parse("carrier-pigeon"), None);
        assert!(EffectiveType::TwoG < EffectiveType::ThreeG);

        let conditions: NetworkConditions = serde_json::from_str(
            r#"{"effectiveType":"3g","downlinkMbps":1.5,"rttMs":300,"saveData":false}"#,
        )
        .unwrap();
        assert_eq!(conditions.effective_type, EffectiveType::ThreeG);
    }
}
