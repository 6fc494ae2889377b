//! Transport boundary and bundle fetching

use crate::cache::{headers, CacheEntry};
use crate::integrity;
use crate::registry::FrameworkRegistry;
use crate::storage::Headers;
use crate::{LoaderError, Priority, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Per-request transport options
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Deadline for a single attempt
    pub timeout: Duration,
    /// Ask the origin for a compressed encoding
    pub compression_required: bool,
    pub priority: Priority,
    /// Skip intermediate HTTP caches
    pub bypass_cache: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            compression_required: false,
            priority: Priority::Normal,
            bypass_cache: false,
        }
    }
}

impl FetchOptions {
    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Require compression
    pub fn with_compression(mut self, required: bool) -> Self {
        self.compression_required = required;
        self
    }

    /// Bypass intermediate caches
    pub fn bypassing_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

/// Raw transport response
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    /// Lowercase header names
    pub headers: Headers,
    pub body: Bytes,
}

impl FetchResponse {
    /// 200 response with the given body
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            headers: Headers::new(),
            body: body.into(),
        }
    }

    /// Empty response with the given status
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Add a header
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Header value by (case-insensitive) name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Turn non-2xx statuses into a [`LoaderError::NetworkFailure`]
    pub fn error_for_status(self, framework_id: &str) -> Result<Self> {
        if (200..300).contains(&self.status) {
            return Ok(self);
        }

        let message = match self.status {
            404 => "bundle not found".to_string(),
            408 => "request timeout".to_string(),
            429 => "rate limited".to_string(),
            status => format!("HTTP {}", status),
        };
        Err(LoaderError::NetworkFailure {
            framework_id: framework_id.to_string(),
            status: Some(self.status),
            message,
        })
    }
}

/// Fetch-style transport used by both the primary and fallback paths
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch `url`; non-2xx statuses are returned, not raised
    async fn fetch(&self, url: &Url, options: &FetchOptions) -> Result<FetchResponse>;
}

/// Configuration for the HTTP transport
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Transparent gzip/brotli decoding
    pub compression: bool,
    /// User agent
    pub user_agent: String,
    /// Idle connections kept per host
    pub max_idle_per_host: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            compression: true,
            user_agent: format!("islands-loader/{}", env!("CARGO_PKG_VERSION")),
            max_idle_per_host: 8,
        }
    }
}

/// reqwest-backed transport
pub struct HttpTransport {
    client: Client,
    config: ClientConfig,
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .pool_max_idle_per_host(config.max_idle_per_host);

        if config.compression {
            builder = builder.gzip(true).brotli(true);
        }

        let client = builder
            .build()
            .map_err(|e| LoaderError::Configuration(e.to_string()))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &Url, options: &FetchOptions) -> Result<FetchResponse> {
        let mut request = self.client.get(url.clone()).timeout(options.timeout);

        // With transparent decoding on, reqwest negotiates encodings itself
        if options.compression_required && !self.config.compression {
            request = request.header(header::ACCEPT_ENCODING, "br, gzip");
        }
        if options.bypass_cache {
            request = request.header(header::CACHE_CONTROL, "no-cache");
        }

        debug!(url = %url, priority = %options.priority, "Fetching bundle");

        let response = request.send().await.map_err(|e| transport_error(url, e))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(|e| transport_error(url, e))?;

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}

fn transport_error(url: &Url, e: reqwest::Error) -> LoaderError {
    let message = if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    };
    LoaderError::NetworkFailure {
        framework_id: url.to_string(),
        status: e.status().map(|s| s.as_u16()),
        message,
    }
}

/// Fetches one framework version from the origin and validates it
#[derive(Clone)]
pub struct BundleFetcher {
    transport: Arc<dyn Transport>,
    registry: Arc<FrameworkRegistry>,
}

impl BundleFetcher {
    /// Create a fetcher
    pub fn new(transport: Arc<dyn Transport>, registry: Arc<FrameworkRegistry>) -> Self {
        Self {
            transport,
            registry,
        }
    }

    /// Framework registry
    pub fn registry(&self) -> &Arc<FrameworkRegistry> {
        &self.registry
    }

    /// Fetch `framework_id@version`, checking the served version and checksum.
    ///
    /// The returned entry is ready to be cached.
    pub async fn fetch(
        &self,
        framework_id: &str,
        version: &str,
        options: &FetchOptions,
    ) -> Result<CacheEntry> {
        let manifest = self.registry.get(framework_id)?;
        let url = self.registry.bundle_url(framework_id, version)?;

        let response = self
            .transport
            .fetch(&url, options)
            .await
            .map_err(|e| match e {
                LoaderError::NetworkFailure {
                    status, message, ..
                } => LoaderError::NetworkFailure {
                    framework_id: framework_id.to_string(),
                    status,
                    message,
                },
                other => other,
            })?
            .error_for_status(framework_id)?;

        if let Some(received) = response.header(headers::VERSION) {
            if received != version {
                warn!(
                    framework_id,
                    requested = version,
                    received,
                    "Origin served a different version"
                );
                return Err(LoaderError::VersionMismatch {
                    framework_id: framework_id.to_string(),
                    requested: version.to_string(),
                    received: received.to_string(),
                });
            }
        }

        let expected = response
            .header(headers::CHECKSUM)
            .map(str::to_string)
            .or_else(|| manifest.checksums.get(version).cloned());
        if let Some(expected) = expected {
            if let Err(actual) = integrity::verify(&response.body, &expected) {
                warn!(framework_id, version, %expected, %actual, "Fetched bundle failed checksum");
                return Err(LoaderError::CacheCorruption {
                    key: crate::cache::cache_key(framework_id, version),
                    expected,
                    actual,
                });
            }
        }

        let dependencies = match response.header(headers::DEPENDENCIES) {
            Some(deps) => deps
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(String::from)
                .collect(),
            None => manifest.dependencies.clone(),
        };
        let compressed = response
            .header(header::CONTENT_ENCODING.as_str())
            .map_or(false, |enc| enc != "identity");

        Ok(CacheEntry::new(framework_id, version, response.body)
            .with_dependencies(dependencies)
            .with_priority(options.priority)
            .with_compressed(compressed))
    }
}
