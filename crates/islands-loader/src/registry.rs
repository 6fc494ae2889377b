//! Known frameworks and where their bundles live

use crate::{LoaderError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use url::Url;

/// Default origin path for a bundle
pub const DEFAULT_PATH_TEMPLATE: &str = "{id}/{version}/index.js";

/// One framework the loader is allowed to fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameworkManifest {
    pub id: String,
    /// Origin-relative path with `{id}` and `{version}` placeholders
    #[serde(default = "default_path")]
    pub path: String,
    /// Version used when a request names none
    pub latest_version: String,
    /// Frameworks that must be loaded first, in order
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Pinned checksums by version
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
}

fn default_path() -> String {
    DEFAULT_PATH_TEMPLATE.to_string()
}

impl FrameworkManifest {
    /// Manifest with the default path template
    pub fn new(id: impl Into<String>, latest_version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: default_path(),
            latest_version: latest_version.into(),
            dependencies: Vec::new(),
            checksums: BTreeMap::new(),
        }
    }

    /// Set path template
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set dependencies
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Pin the checksum of one version
    pub fn with_checksum(mut self, version: impl Into<String>, checksum: impl Into<String>) -> Self {
        self.checksums.insert(version.into(), checksum.into());
        self
    }

    fn render_path(&self, version: &str) -> String {
        self.path
            .replace("{id}", &self.id)
            .replace("{version}", version)
            .trim_start_matches('/')
            .to_string()
    }
}

/// Framework identifier validation: non-empty, no whitespace, no path tricks
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 214
        && !id.contains("..")
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
}

/// Registry of known frameworks under one origin
#[derive(Debug, Clone)]
pub struct FrameworkRegistry {
    origin: Url,
    manifests: HashMap<String, FrameworkManifest>,
}

impl FrameworkRegistry {
    /// Build a registry, validating ids, versions and dependency references
    pub fn new(origin: &str, manifests: Vec<FrameworkManifest>) -> Result<Self> {
        let mut origin = Url::parse(origin)?;
        if origin.cannot_be_a_base() {
            return Err(LoaderError::Configuration(format!(
                "origin {} cannot be used as a base URL",
                origin
            )));
        }
        if !origin.path().ends_with('/') {
            let path = format!("{}/", origin.path());
            origin.set_path(&path);
        }

        let mut map = HashMap::with_capacity(manifests.len());
        for manifest in manifests {
            if !is_valid_id(&manifest.id) {
                return Err(LoaderError::Configuration(format!(
                    "invalid framework id {:?}",
                    manifest.id
                )));
            }
            if manifest.latest_version.trim().is_empty() {
                return Err(LoaderError::Configuration(format!(
                    "framework {} has no latest version",
                    manifest.id
                )));
            }
            if map.insert(manifest.id.clone(), manifest).is_some() {
                return Err(LoaderError::Configuration("duplicate framework id".into()));
            }
        }

        for manifest in map.values() {
            if let Some(missing) = manifest
                .dependencies
                .iter()
                .find(|dep| !map.contains_key(dep.as_str()))
            {
                return Err(LoaderError::Configuration(format!(
                    "framework {} depends on unknown framework {}",
                    manifest.id, missing
                )));
            }
        }

        Ok(Self {
            origin,
            manifests: map,
        })
    }

    /// Origin base URL
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Manifest for a framework, failing fast on unknown ids
    pub fn get(&self, framework_id: &str) -> Result<&FrameworkManifest> {
        self.manifests
            .get(framework_id)
            .ok_or_else(|| LoaderError::UnknownFramework(framework_id.to_string()))
    }

    /// Whether the id is known
    pub fn contains(&self, framework_id: &str) -> bool {
        self.manifests.contains_key(framework_id)
    }

    /// Known ids, sorted
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.manifests.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Requested version, or the latest one
    pub fn resolve_version(&self, framework_id: &str, version: Option<&str>) -> Result<String> {
        let manifest = self.get(framework_id)?;
        Ok(match version {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => manifest.latest_version.clone(),
        })
    }

    /// Absolute bundle URL for a framework version
    pub fn bundle_url(&self, framework_id: &str, version: &str) -> Result<Url> {
        let manifest = self.get(framework_id)?;
        Ok(self.origin.join(&manifest.render_path(version))?)
    }

    /// Transitive dependencies in load order (dependencies first), excluding
    /// the framework itself. Cycles are a configuration error.
    pub fn load_order(&self, framework_id: &str) -> Result<Vec<String>> {
        let mut order = Vec::new();
        let mut done = HashSet::new();
        let mut visiting = Vec::new();
        self.visit(framework_id, &mut visiting, &mut done, &mut order)?;
        order.pop();
        Ok(order)
    }

    fn visit(
        &self,
        framework_id: &str,
        visiting: &mut Vec<String>,
        done: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        if done.contains(framework_id) {
            return Ok(());
        }
        if visiting.iter().any(|v| v == framework_id) {
            visiting.push(framework_id.to_string());
            return Err(LoaderError::Configuration(format!(
                "dependency cycle: {}",
                visiting.join(" -> ")
            )));
        }

        visiting.push(framework_id.to_string());
        for dep in &self.get(framework_id)?.dependencies {
            self.visit(dep, visiting, done, order)?;
        }
        visiting.pop();

        done.insert(framework_id.to_string());
        order.push(framework_id.to_string());
        Ok(())
    }
}
