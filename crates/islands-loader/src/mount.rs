//! Hydration boundary
//!
//! The loader never renders anything. Each framework registers a
//! [`MountAdapter`] that receives a validated bundle and a target selector.

use crate::loader::Framework;
use crate::{LoaderError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Mount capability for one framework runtime
#[async_trait]
pub trait MountAdapter: Send + Sync {
    /// Hydrate `target` with the framework bundle
    async fn mount(&self, framework: &Framework, target: &str, props: &serde_json::Value)
        -> Result<()>;

    /// Tear down whatever was mounted at `target`
    async fn unmount(&self, target: &str) -> Result<()>;
}

/// Mount adapters keyed by framework id, plus the currently mounted targets
#[derive(Default)]
pub struct MountRegistry {
    adapters: DashMap<String, Arc<dyn MountAdapter>>,
    mounted: DashMap<String, String>,
}

impl MountRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the adapter for a framework
    pub fn register(&self, framework_id: impl Into<String>, adapter: Arc<dyn MountAdapter>) {
        let framework_id = framework_id.into();
        debug!(framework_id = %framework_id, "Registered mount adapter");
        self.adapters.insert(framework_id, adapter);
    }

    /// Adapter for a framework
    pub fn adapter(&self, framework_id: &str) -> Result<Arc<dyn MountAdapter>> {
        self.adapters
            .get(framework_id)
            .map(|a| a.value().clone())
            .ok_or_else(|| {
                LoaderError::Configuration(format!(
                    "no mount adapter registered for {}",
                    framework_id
                ))
            })
    }

    /// Framework currently mounted at `target`
    pub fn mounted_at(&self, target: &str) -> Option<String> {
        self.mounted.get(target).map(|id| id.value().clone())
    }

    /// Number of mounted targets
    pub fn mounted_count(&self) -> usize {
        self.mounted.len()
    }

    /// Mount `framework` at `target`, unmounting a different framework first
    pub async fn mount(
        &self,
        framework: &Framework,
        target: &str,
        props: &serde_json::Value,
    ) -> Result<()> {
        let adapter = self.adapter(&framework.id)?;

        if let Some(previous) = self.mounted_at(target) {
            if previous != framework.id {
                self.unmount(&previous, target).await?;
            }
        }

        adapter.mount(framework, target, props).await?;
        self.mounted.insert(target.to_string(), framework.id.clone());

        info!(
            framework_id = %framework.id,
            version = %framework.version,
            target,
            "Hydrated island"
        );
        Ok(())
    }

    /// Unmount `framework_id` from `target`; returns whether anything was mounted
    pub async fn unmount(&self, framework_id: &str, target: &str) -> Result<bool> {
        let adapter = self.adapter(framework_id)?;

        match self.mounted_at(target) {
            Some(id) if id == framework_id => {
                adapter.unmount(target).await?;
                self.mounted.remove(target);
                debug!(framework_id, target, "Dehydrated island");
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::LoadSource;
    use bytes::Bytes;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MountAdapter for Recording {
        async fn mount(
            &self,
            framework: &Framework,
            target: &str,
            props: &serde_json::Value,
        ) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("mount {} {} {}", framework.id, target, props));
            Ok(())
        }

        async fn unmount(&self, target: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("unmount {}", target));
            Ok(())
        }
    }

    fn framework(id: &str) -> Framework {
        Framework {
            id: id.into(),
            version: "1.0.0".into(),
            bundle: Bytes::from_static(b"bundle"),
            dependencies: Vec::new(),
            checksum: crate::integrity::checksum(b"bundle"),
            compressed: false,
            source: LoadSource::Network,
            load_time: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_mount_and_unmount() {
        let registry = MountRegistry::new();
        let adapter = Arc::new(Recording::default());
        registry.register("preact", adapter.clone());

        registry
            .mount(&framework("preact"), "#cart", &serde_json::json!({"items": 2}))
            .await
            .unwrap();
        assert_eq!(registry.mounted_at("#cart").as_deref(), Some("preact"));

        assert!(registry.unmount("preact", "#cart").await.unwrap());
        assert!(!registry.unmount("preact", "#cart").await.unwrap());
        assert_eq!(registry.mounted_count(), 0);

        let calls = adapter.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), [r#"mount preact #cart {"items":2}"#, "unmount #cart"]);
    }

    #[tokio::test]
    async fn test_remount_with_other_framework_unmounts_first() {
        let registry = MountRegistry::new();
        let preact = Arc::new(Recording::default());
        let solid = Arc::new(Recording::default());
        registry.register("preact", preact.clone());
        registry.register("solid", solid.clone());

        let props = serde_json::Value::Null;
        registry.mount(&framework("preact"), "#nav", &props).await.unwrap();
        registry.mount(&framework("solid"), "#nav", &props).await.unwrap();

        assert_eq!(registry.mounted_at("#nav").as_deref(), Some("solid"));
        assert_eq!(preact.calls.lock().unwrap().last().map(String::as_str), Some("unmount #nav"));
    }

    #[tokio::test]
    async fn test_missing_adapter() {
        let registry = MountRegistry::new();
        let err = registry
            .mount(&framework("vue"), "#app", &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, LoaderError::Configuration(_)));
    }
}
