//! Error types for framework loading

use crate::fallback::DegradationStrategy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Stage of the loading pipeline at which a request finally failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureStage {
    /// Cache layer (lookup, integrity, storage)
    Cache,
    /// Primary network fetch
    Network,
    /// Retry budget of the primary path
    Retry,
    /// Direct/retrying fallback path
    Fallback,
    /// Client offline, request captured for replay
    Offline,
    /// Service shutting down
    Shutdown,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureStage::Cache => "cache",
            FailureStage::Network => "network",
            FailureStage::Retry => "retry",
            FailureStage::Fallback => "fallback",
            FailureStage::Offline => "offline",
            FailureStage::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while loading framework bundles
#[derive(Error, Debug, Clone)]
pub enum LoaderError {
    /// Entry not present in the cache (internal signal)
    #[error("Cache miss: {0}")]
    CacheMiss(String),

    /// Stored or fetched bytes do not match their checksum
    #[error("Checksum mismatch for {key}: expected {expected}, got {actual}")]
    CacheCorruption {
        key: String,
        expected: String,
        actual: String,
    },

    /// Transport-level failure
    #[error("Network failure for {framework_id}: {message}")]
    NetworkFailure {
        framework_id: String,
        status: Option<u16>,
        message: String,
    },

    /// Request deadline exceeded
    #[error("Loading {framework_id} timed out after {after_ms}ms")]
    Timeout { framework_id: String, after_ms: u64 },

    /// Origin served a different version than requested
    #[error("Version mismatch for {framework_id}: requested {requested}, received {received}")]
    VersionMismatch {
        framework_id: String,
        requested: String,
        received: String,
    },

    /// Service is shutting down
    #[error("Loader is shutting down")]
    ShutdownInProgress,

    /// Caller asked for a framework the registry does not know
    #[error("Unknown framework: {0}")]
    UnknownFramework(String),

    /// A single entry is larger than the whole cache budget
    #[error("Entry {key} is {size} bytes, cache budget is {max_size} bytes")]
    EntryTooLarge { key: String, size: u64, max_size: u64 },

    /// Client is offline
    #[error("Offline: {0} queued for replay")]
    Offline(String),

    /// Bundle store I/O failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration or manifest
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Every recovery path failed
    #[error("Loading {framework_id} failed at {stage} stage: {cause}")]
    LoadFailed {
        framework_id: String,
        stage: FailureStage,
        degradation: DegradationStrategy,
        cause: Box<LoaderError>,
    },
}

impl LoaderError {
    /// Build a transport failure without an HTTP status
    pub fn network(framework_id: impl Into<String>, message: impl Into<String>) -> Self {
        LoaderError::NetworkFailure {
            framework_id: framework_id.into(),
            status: None,
            message: message.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            LoaderError::NetworkFailure { status, .. } => match status {
                None => true,
                Some(code) => *code >= 500 || *code == 408 || *code == 429,
            },
            LoaderError::VersionMismatch { .. } => true,
            LoaderError::CacheCorruption { .. } => true,
            _ => false,
        }
    }

    /// Stage the error belongs to
    pub fn stage(&self) -> FailureStage {
        match self {
            LoaderError::CacheMiss(_)
            | LoaderError::CacheCorruption { .. }
            | LoaderError::EntryTooLarge { .. }
            | LoaderError::Storage(_) => FailureStage::Cache,
            LoaderError::ShutdownInProgress => FailureStage::Shutdown,
            LoaderError::Offline(_) => FailureStage::Offline,
            LoaderError::LoadFailed { stage, .. } => *stage,
            _ => FailureStage::Network,
        }
    }

    /// Server-requested delay for rate limited responses
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LoaderError::NetworkFailure {
                status: Some(429), ..
            } => Some(Duration::from_secs(1)),
            _ => None,
        }
    }

    /// Degradation strategy attached to a terminal failure
    pub fn degradation(&self) -> Option<&DegradationStrategy> {
        match self {
            LoaderError::LoadFailed { degradation, .. } => Some(degradation),
            _ => None,
        }
    }

    /// Innermost error of a terminal failure chain
    pub fn root_cause(&self) -> &LoaderError {
        match self {
            LoaderError::LoadFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

impl From<std::io::Error> for LoaderError {
    fn from(e: std::io::Error) -> Self {
        LoaderError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for LoaderError {
    fn from(e: serde_json::Error) -> Self {
        LoaderError::Configuration(e.to_string())
    }
}

impl From<url::ParseError> for LoaderError {
    fn from(e: url::ParseError) -> Self {
        LoaderError::Configuration(format!("invalid URL: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::{DegradationLevel, FailureReason};

    #[test]
    fn test_retryable_classification() {
        assert!(LoaderError::network("react", "connection reset").is_retryable());
        assert!(LoaderError::NetworkFailure {
            framework_id: "vue".into(),
            status: Some(503),
            message: "unavailable".into(),
        }
        .is_retryable());
        assert!(!LoaderError::NetworkFailure {
            framework_id: "vue".into(),
            status: Some(404),
            message: "missing".into(),
        }
        .is_retryable());
        assert!(LoaderError::VersionMismatch {
            framework_id: "svelte".into(),
            requested: "4.0.0".into(),
            received: "3.59.0".into(),
        }
        .is_retryable());
        assert!(!LoaderError::Timeout {
            framework_id: "solid".into(),
            after_ms: 500,
        }
        .is_retryable());
        assert!(!LoaderError::UnknownFramework("ember".into()).is_retryable());
        assert!(!LoaderError::ShutdownInProgress.is_retryable());
    }

    #[test]
    fn test_timeout_display() {
        let err = LoaderError::Timeout {
            framework_id: "react".into(),
            after_ms: 5000,
        };
        let msg = err.to_string();
        assert!(msg.contains("timed out"));
        assert!(msg.contains("5000ms"));
    }

    #[test]
    fn test_load_failed_carries_stage_and_root_cause() {
        let err = LoaderError::LoadFailed {
            framework_id: "preact".into(),
            stage: FailureStage::Fallback,
            degradation: DegradationStrategy::for_reason(FailureReason::NetworkError),
            cause: Box::new(LoaderError::network("preact", "dns failure")),
        };

        assert_eq!(err.stage(), FailureStage::Fallback);
        assert!(err.to_string().contains("fallback stage"));
        assert!(matches!(
            err.root_cause(),
            LoaderError::NetworkFailure { .. }
        ));
        assert_eq!(
            err.degradation().map(|d| d.functionality_level),
            Some(DegradationLevel::Reduced)
        );
    }

    #[test]
    fn test_rate_limit_retry_after() {
        let err = LoaderError::NetworkFailure {
            framework_id: "lit".into(),
            status: Some(429),
            message: "slow down".into(),
        };
        assert!(err.is_retryable());
        assert!(err.retry_after().is_some());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LoaderError>();
    }
}
