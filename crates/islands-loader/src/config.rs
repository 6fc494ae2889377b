//! Loader configuration

use crate::cache::CacheConfig;
use crate::fallback::FallbackConfig;
use crate::network::AdaptationConfig;
use crate::registry::FrameworkManifest;
use crate::{LoaderError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Strategy defaults used before any network signal is known.
///
/// These apply only until the first conditions snapshot (or a slow
/// bandwidth measurement) arrives. From then on the per-connection values
/// in [`AdaptationConfig`] decide timeouts and retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoadingStrategyConfig {
    /// Request deadline while no conditions are known (milliseconds)
    pub timeout_ms: u64,
    /// Retry budget while no conditions are known
    pub max_retries: u32,
}

impl Default for LoadingStrategyConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_retries: 3,
        }
    }
}

/// Framework loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoaderConfig {
    /// Maximum concurrent network fetches
    pub max_concurrent_loads: usize,
    /// Bundle cache options
    pub cache_config: CacheConfig,
    /// Defaults until the first network signal arrives
    pub loading_strategy: LoadingStrategyConfig,
    /// Persist bundles in the supplied storage; memory only otherwise
    pub enable_service_worker: bool,
    /// Run the fallback chain when the primary path fails
    pub fallback_enabled: bool,
    /// Loads slower than this are counted as slow
    pub target_load_time_ms: u64,
    /// Base URL bundles are fetched from
    pub origin: String,
    /// Known frameworks
    pub frameworks: Vec<FrameworkManifest>,
    /// Network adaptation thresholds
    pub adaptation: AdaptationConfig,
    /// Fallback path options
    pub fallback: FallbackConfig,
    /// Bundle store name
    pub cache_name: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent_loads: 4,
            cache_config: CacheConfig::default(),
            loading_strategy: LoadingStrategyConfig::default(),
            enable_service_worker: true,
            fallback_enabled: true,
            target_load_time_ms: 3_000,
            origin: "http://localhost/".to_string(),
            frameworks: Vec::new(),
            adaptation: AdaptationConfig::default(),
            fallback: FallbackConfig::default(),
            cache_name: "islands-frameworks-v1".to_string(),
        }
    }
}

impl LoaderConfig {
    /// Parse a JSON options object
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_loads == 0 {
            return Err(LoaderError::Configuration(
                "maxConcurrentLoads must be at least 1".into(),
            ));
        }
        if self.cache_config.max_size == 0 {
            return Err(LoaderError::Configuration(
                "cacheConfig.maxSize must be greater than zero".into(),
            ));
        }
        if self.origin.trim().is_empty() {
            return Err(LoaderError::Configuration("origin must not be empty".into()));
        }
        if self.cache_name.trim().is_empty() {
            return Err(LoaderError::Configuration("cacheName must not be empty".into()));
        }
        Ok(())
    }

    /// Adaptation thresholds with the strategy defaults folded in
    pub fn effective_adaptation(&self) -> AdaptationConfig {
        AdaptationConfig {
            default_timeout_ms: self.loading_strategy.timeout_ms,
            default_max_retries: self.loading_strategy.max_retries,
            ..self.adaptation.clone()
        }
    }

    /// Target load time
    pub fn target_load_time(&self) -> Duration {
        Duration::from_millis(self.target_load_time_ms)
    }

    /// Set origin
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Add a framework
    pub fn with_framework(mut self, manifest: FrameworkManifest) -> Self {
        self.frameworks.push(manifest);
        self
    }

    /// Set maximum concurrent loads
    pub fn with_max_concurrent_loads(mut self, max: usize) -> Self {
        self.max_concurrent_loads = max;
        self
    }

    /// Set cache options
    pub fn with_cache_config(mut self, cache_config: CacheConfig) -> Self {
        self.cache_config = cache_config;
        self
    }

    /// Set strategy defaults
    pub fn with_loading_strategy(mut self, timeout: Duration, max_retries: u32) -> Self {
        self.loading_strategy = LoadingStrategyConfig {
            timeout_ms: timeout.as_millis() as u64,
            max_retries,
        };
        self
    }

    /// Enable or disable persistent storage
    pub fn with_service_worker(mut self, enabled: bool) -> Self {
        self.enable_service_worker = enabled;
        self
    }

    /// Enable or disable the fallback chain
    pub fn with_fallback_enabled(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    /// Set adaptation thresholds
    pub fn with_adaptation(mut self, adaptation: AdaptationConfig) -> Self {
        self.adaptation = adaptation;
        self
    }

    /// Set fallback options
    pub fn with_fallback(mut self, fallback: FallbackConfig) -> Self {
        self.fallback = fallback;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EvictionPolicy;

    #[test]
    fn test_from_json_recognized_fields() {
        let config = LoaderConfig::from_json(
            r#"{
                "maxConcurrentLoads": 2,
                "cacheConfig": { "maxSize": 1048576, "maxAge": 3600000, "evictionPolicy": "lfu" },
                "loadingStrategy": { "timeoutMs": 4000, "maxRetries": 5 },
                "enableServiceWorker": false,
                "fallbackEnabled": false,
                "targetLoadTimeMs": 1500,
                "origin": "https://cdn.example.com/islands/",
                "frameworks": [{ "id": "preact", "latestVersion": "10.19.0" }]
            }"#,
        )
        .unwrap();

        assert_eq!(config.max_concurrent_loads, 2);
        assert_eq!(config.cache_config.max_size, 1_048_576);
        assert_eq!(config.cache_config.max_age_ms, 3_600_000);
        assert_eq!(config.cache_config.eviction_policy, EvictionPolicy::Lfu);
        assert_eq!(config.loading_strategy.max_retries, 5);
        assert!(!config.enable_service_worker);
        assert!(!config.fallback_enabled);
        assert_eq!(config.frameworks.len(), 1);

        let adaptation = config.effective_adaptation();
        assert_eq!(adaptation.default_timeout_ms, 4000);
        assert_eq!(adaptation.default_max_retries, 5);
    }

    #[test]
    fn test_loading_strategy_yields_to_known_conditions() {
        use crate::network::{
            EffectiveType, LoadingHints, NetworkAdaptationCoordinator, NetworkConditions,
        };
        use crate::Priority;

        let config = LoaderConfig::from_json(r#"{"loadingStrategy":{"timeoutMs":20000,"maxRetries":1}}"#)
            .unwrap();
        let coordinator = NetworkAdaptationCoordinator::new(config.effective_adaptation());

        let before = coordinator.get_loading_recommendation("vue", Priority::Normal, LoadingHints::default());
        assert_eq!(before.timeout_ms, 20_000);
        assert_eq!(before.max_retries, 1);

        coordinator.update_conditions(NetworkConditions::of_type(EffectiveType::FourG));
        let after = coordinator.get_loading_recommendation("vue", Priority::Normal, LoadingHints::default());
        let adaptation = config.effective_adaptation();
        assert_eq!(after.timeout_ms, adaptation.aggressive_timeout_ms);
        assert_eq!(after.max_retries, adaptation.aggressive_max_retries);
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = LoaderConfig::from_json("{}").unwrap();
        assert_eq!(config.max_concurrent_loads, 4);
        assert!(config.fallback_enabled);
        assert_eq!(config.cache_name, "islands-frameworks-v1");
    }

    #[test]
    fn test_validation() {
        assert!(LoaderConfig::default().validate().is_ok());
        assert!(LoaderConfig::default()
            .with_max_concurrent_loads(0)
            .validate()
            .is_err());
        assert!(LoaderConfig::default().with_origin("  ").validate().is_err());
        assert!(LoaderConfig::from_json(r#"{"cacheConfig":{"maxSize":0}}"#).is_err());
        assert!(matches!(
            LoaderConfig::from_json("{not json"),
            Err(LoaderError::Configuration(_))
        ));
    }
}
