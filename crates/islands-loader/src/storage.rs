//! Persistent bundle store
//!
//! The cache keeps bundle bodies in a named store and carries all of its
//! metadata as string headers next to each body. Two stores are provided:
//! an in-memory one and a directory-backed one.

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

/// Header map carried with every stored bundle
pub type Headers = BTreeMap<String, String>;

/// A stored response: body plus metadata headers
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBundle {
    pub headers: Headers,
    pub body: Bytes,
}

impl StoredBundle {
    /// Create a stored bundle
    pub fn new(headers: Headers, body: Bytes) -> Self {
        Self { headers, body }
    }

    /// Header value by name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Handle to one named bundle store
#[async_trait]
pub trait BundleStore: Send + Sync {
    /// Look up a stored bundle by key
    async fn lookup(&self, key: &str) -> Result<Option<StoredBundle>>;

    /// Store (or replace) a bundle
    async fn put(&self, key: &str, bundle: StoredBundle) -> Result<()>;

    /// Delete a bundle, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// All stored keys
    async fn keys(&self) -> Result<Vec<String>>;
}

/// Opens named bundle stores
#[async_trait]
pub trait BundleStorage: Send + Sync {
    /// Open (creating if needed) the store with the given name
    async fn open(&self, name: &str) -> Result<Arc<dyn BundleStore>>;
}

/// In-memory bundle storage
#[derive(Default)]
pub struct MemoryStorage {
    stores: DashMap<String, Arc<MemoryStore>>,
}

impl MemoryStorage {
    /// Create empty storage
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BundleStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn BundleStore>> {
        let store = self
            .stores
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::default()))
            .clone();
        Ok(store as Arc<dyn BundleStore>)
    }
}

/// In-memory bundle store
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredBundle>,
}

#[async_trait]
impl BundleStore for MemoryStore {
    async fn lookup(&self, key: &str) -> Result<Option<StoredBundle>> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn put(&self, key: &str, bundle: StoredBundle) -> Result<()> {
        self.entries.insert(key.to_string(), bundle);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.iter().map(|e| e.key().clone()).collect())
    }
}

/// Directory-backed bundle storage
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    /// Use `root` as the parent directory of all stores
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BundleStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn BundleStore>> {
        let dir = self.root.join(encode_key(name));
        fs::create_dir_all(&dir).await?;
        info!("Opened bundle store {} at {}", name, dir.display());
        Ok(Arc::new(DiskStore { dir }) as Arc<dyn BundleStore>)
    }
}

#[derive(Serialize, Deserialize)]
struct Sidecar {
    key: String,
    headers: Headers,
}

/// One bundle store directory.
///
/// Layout: `<dir>/<shard>/<hex key>.bin` for the body and `.json` for the
/// headers. The header file is written last and marks the entry complete.
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    fn body_path(&self, key: &str) -> PathBuf {
        self.entry_path(key, "bin")
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.entry_path(key, "json")
    }

    fn entry_path(&self, key: &str, extension: &str) -> PathBuf {
        let hex = encode_key(key);
        let shard = &hex[..hex.len().min(2)];
        self.dir.join(shard).join(format!("{}.{}", hex, extension))
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);
    fs::write(&tmp_path, data).await?;
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl BundleStore for DiskStore {
    async fn lookup(&self, key: &str) -> Result<Option<StoredBundle>> {
        let meta = match fs::read(self.meta_path(key)).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let sidecar: Sidecar = serde_json::from_slice(&meta)?;

        let body = match fs::read(self.body_path(key)).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(StoredBundle {
            headers: sidecar.headers,
            body: Bytes::from(body),
        }))
    }

    async fn put(&self, key: &str, bundle: StoredBundle) -> Result<()> {
        let sidecar = Sidecar {
            key: key.to_string(),
            headers: bundle.headers,
        };
        let meta = serde_json::to_vec(&sidecar)?;

        write_atomic(&self.body_path(key), &bundle.body).await?;
        write_atomic(&self.meta_path(key), &meta).await?;

        debug!("Stored bundle {} ({} bytes)", key, bundle.body.len());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let existed = remove_if_exists(&self.meta_path(key)).await?;
        remove_if_exists(&self.body_path(key)).await?;
        Ok(existed)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();

        let mut shards = fs::read_dir(&self.dir).await?;
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }

            let mut files = fs::read_dir(shard.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let data = fs::read(&path).await?;
                match serde_json::from_slice::<Sidecar>(&data) {
                    Ok(sidecar) => keys.push(sidecar.key),
                    Err(e) => debug!("Skipping unreadable sidecar {}: {}", path.display(), e),
                }
            }
        }

        Ok(keys)
    }
}

/// Filesystem-safe lowercase hex encoding of a key
fn encode_key(key: &str) -> String {
    key.bytes().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn bundle(body: &'static [u8]) -> StoredBundle {
        let mut headers = Headers::new();
        headers.insert("x-framework-id".into(), "react".into());
        StoredBundle::new(headers, Bytes::from_static(body))
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let storage = MemoryStorage::new();
        let store = storage.open("bundles").await.unwrap();

        store.put("react@18.2.0", bundle(b"react")).await.unwrap();
        let found = store.lookup("react@18.2.0").await.unwrap().unwrap();
        assert_eq!(found.body, Bytes::from_static(b"react"));
        assert_eq!(found.header("x-framework-id"), Some("react"));

        assert_eq!(store.keys().await.unwrap(), vec!["react@18.2.0".to_string()]);
        assert!(store.delete("react@18.2.0").await.unwrap());
        assert!(!store.delete("react@18.2.0").await.unwrap());
        assert!(store.lookup("react@18.2.0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_storage_reopens_same_store() {
        let storage = MemoryStorage::new();
        storage
            .open("bundles")
            .await
            .unwrap()
            .put("vue@3.4.0", bundle(b"vue"))
            .await
            .unwrap();

        let reopened = storage.open("bundles").await.unwrap();
        assert!(reopened.lookup("vue@3.4.0").await.unwrap().is_some());

        let other = storage.open("other").await.unwrap();
        assert!(other.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disk_store_roundtrip() {
        let dir = tempdir().unwrap();
        let storage = DiskStorage::new(dir.path());
        let store = storage.open("bundles").await.unwrap();

        store.put("svelte@4.2.0", bundle(b"svelte")).await.unwrap();
        store.put("solid/web@1.8.0", bundle(b"solid")).await.unwrap();

        let found = store.lookup("svelte@4.2.0").await.unwrap().unwrap();
        assert_eq!(found.body, Bytes::from_static(b"svelte"));

        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["solid/web@1.8.0", "svelte@4.2.0"]);

        assert!(store.delete("svelte@4.2.0").await.unwrap());
        assert!(store.lookup("svelte@4.2.0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disk_store_survives_reopen() {
        let dir = tempdir().unwrap();

        {
            let store = DiskStorage::new(dir.path()).open("bundles").await.unwrap();
            store.put("preact@10.19.0", bundle(b"preact")).await.unwrap();
        }

        let store = DiskStorage::new(dir.path()).open("bundles").await.unwrap();
        assert_eq!(store.keys().await.unwrap(), vec!["preact@10.19.0".to_string()]);
    }

    #[test]
    fn test_encode_key_is_path_safe() {
        let encoded = encode_key("../etc@1");
        assert!(encoded.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
