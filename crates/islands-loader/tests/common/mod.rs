//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use islands_loader::{
    FetchOptions, FetchResponse, FrameworkLoaderService, FrameworkManifest, LoaderConfig,
    LoaderError, Result, Transport,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

pub const ORIGIN: &str = "https://cdn.example.com/islands/";

/// In-memory transport with per-framework scripted responses.
///
/// Unscripted requests succeed with a body derived from the URL.
pub struct ScriptedTransport {
    delay: Mutex<Duration>,
    scripts: Mutex<HashMap<String, VecDeque<Result<FetchResponse>>>>,
    calls: Mutex<Vec<String>>,
    hang_after: Mutex<HashMap<String, usize>>,
    online: AtomicBool,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            delay: Mutex::new(Duration::ZERO),
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            hang_after: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }

    pub fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.delay.lock().unwrap() = delay;
        self
    }

    /// Queue outcomes for the next requests of a framework
    pub fn script(&self, framework_id: &str, outcomes: Vec<Result<FetchResponse>>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(framework_id.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Let `calls` requests of a framework through, then never answer again
    pub fn hang_after(&self, framework_id: &str, calls: usize) {
        self.hang_after
            .lock()
            .unwrap()
            .insert(framework_id.to_string(), calls);
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Framework ids fetched, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, framework_id: &str) -> usize {
        self.calls().iter().filter(|id| *id == framework_id).count()
    }

    /// Highest number of simultaneous fetches observed
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

pub fn body_for(framework_id: &str, version: &str) -> String {
    format!("export default '{}@{}';", framework_id, version)
}

pub fn server_error(framework_id: &str) -> Result<FetchResponse> {
    Err(LoaderError::NetworkFailure {
        framework_id: framework_id.to_string(),
        status: Some(503),
        message: "service unavailable".into(),
    })
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(&self, url: &Url, _options: &FetchOptions) -> Result<FetchResponse> {
        // <origin>/<id>/<version>/index.js
        let segments: Vec<&str> = url
            .path()
            .trim_start_matches("/islands/")
            .split('/')
            .collect();
        let framework_id = segments.first().copied().unwrap_or_default().to_string();
        let version = segments.get(1).copied().unwrap_or_default().to_string();

        if !self.online.load(Ordering::SeqCst) {
            return Err(LoaderError::network(framework_id, "network unreachable"));
        }

        self.calls.lock().unwrap().push(framework_id.clone());
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        let limit = self.hang_after.lock().unwrap().get(&framework_id).copied();
        if limit.is_some_and(|limit| self.call_count(&framework_id) > limit) {
            std::future::pending::<()>().await;
        }

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&framework_id)
            .and_then(|queue| queue.pop_front());

        match scripted {
            Some(outcome) => outcome,
            None => Ok(FetchResponse::ok(body_for(&framework_id, &version))),
        }
    }
}

/// Config with a small set of frameworks under [`ORIGIN`]
pub fn config() -> LoaderConfig {
    LoaderConfig::default()
        .with_origin(ORIGIN)
        .with_framework(FrameworkManifest::new("scheduler", "0.23.0"))
        .with_framework(
            FrameworkManifest::new("react", "18.2.0").with_dependencies(vec!["scheduler".into()]),
        )
        .with_framework(
            FrameworkManifest::new("react-dom", "18.2.0").with_dependencies(vec!["react".into()]),
        )
        .with_framework(FrameworkManifest::new("vue", "3.4.0"))
        .with_framework(FrameworkManifest::new("svelte", "4.2.0"))
        .with_framework(FrameworkManifest::new("preact", "10.19.0"))
        .with_framework(FrameworkManifest::new("solid", "1.8.0"))
}

pub async fn service(
    transport: Arc<ScriptedTransport>,
    config: LoaderConfig,
) -> FrameworkLoaderService {
    FrameworkLoaderService::builder(config)
        .transport(transport)
        .build()
        .await
        .unwrap()
}

/// Yield until `condition` holds (bounded so a bug fails instead of hanging)
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}
