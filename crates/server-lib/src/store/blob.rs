//! Blob storage for native model artifacts
//!
//! Blobs are addressed by bucket and key. Locations are rendered as
//! `<scheme>://<bucket>/<key>` and recorded in the ledger verbatim.

use super::StoreError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

/// Addressable location of a stored blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLocation {
    pub scheme: String,
    pub bucket: String,
    pub key: String,
}

impl BlobLocation {
    pub fn new(scheme: impl Into<String>, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parse `<scheme>://<bucket>/<key>`
    pub fn parse(location: &str) -> Option<Self> {
        let url = Url::parse(location).ok()?;
        let bucket = url.host_str()?.to_string();
        let key = url.path().trim_start_matches('/').to_string();
        if key.is_empty() {
            return None;
        }
        Some(Self {
            scheme: url.scheme().to_string(),
            bucket,
            key,
        })
    }
}

impl fmt::Display for BlobLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.key)
    }
}

/// Object storage holding one bucket of model blobs
#[async_trait]
pub trait BlobStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Keys starting with `prefix`, in no particular order
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Blob contents, `None` when the key does not exist
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put(&self, key: &str, data: &[u8]) -> Result<BlobLocation, StoreError>;

    /// Returns false when the key did not exist
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

fn check_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() || key.contains('/') || key.contains('\\') || key.starts_with('.') {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Bucket stored as a directory on the local filesystem
#[derive(Debug)]
pub struct LocalBlobStore {
    dir: PathBuf,
    bucket: String,
}

impl LocalBlobStore {
    pub const SCHEME: &'static str = "local";

    /// Open (creating if needed) `<root>/<bucket>`
    pub async fn open(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Result<Self, StoreError> {
        let bucket = bucket.into();
        let dir = root.into().join(&bucket);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::Blob {
                key: dir.display().to_string(),
                source,
            })?;
        Ok(Self { dir, bucket })
    }

    fn io_error(key: &str) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
        move |source| StoreError::Blob {
            key: key.to_string(),
            source,
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(Self::io_error(prefix))?;

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(Self::io_error(prefix))? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with(prefix) && !name.ends_with(".tmp") {
                keys.push(name);
            }
        }
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        check_key(key)?;
        match tokio::fs::read(self.dir.join(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_error(key)(e)),
        }
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<BlobLocation, StoreError> {
        check_key(key)?;
        let path = self.dir.join(key);
        let temp_path = self.dir.join(format!("{}.tmp", key));

        // Write to temp file first so readers never see a partial blob
        tokio::fs::write(&temp_path, data)
            .await
            .map_err(Self::io_error(key))?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(Self::io_error(key))?;

        debug!(key = %key, size = data.len(), "Blob written");
        Ok(BlobLocation::new(Self::SCHEME, &self.bucket, key))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        check_key(key)?;
        match tokio::fs::remove_file(self.dir.join(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::io_error(key)(e)),
        }
    }
}

/// In-process bucket, used for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    bucket: String,
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub const SCHEME: &'static str = "mem";

    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            blobs: RwLock::new(BTreeMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.blobs.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .blobs
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        check_key(key)?;
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<BlobLocation, StoreError> {
        check_key(key)?;
        self.blobs
            .write()
            .await
            .insert(key.to_string(), data.to_vec());
        Ok(BlobLocation::new(Self::SCHEME, &self.bucket, key))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        check_key(key)?;
        Ok(self.blobs.write().await.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_location_display_and_parse() {
        let location = BlobLocation::new("local", "models-bucket", "sklearn_model3.pkl");
        assert_eq!(location.to_string(), "local://models-bucket/sklearn_model3.pkl");
        assert_eq!(BlobLocation::parse(&location.to_string()), Some(location));
    }

    #[test]
    fn test_parse_gcs_style_location() {
        let location = BlobLocation::parse("gs://bucket-hardgameflaskapp-models/sklearn_model1.pkl")
            .unwrap();
        assert_eq!(location.scheme, "gs");
        assert_eq!(location.bucket, "bucket-hardgameflaskapp-models");
        assert_eq!(location.key, "sklearn_model1.pkl");
    }

    #[test]
    fn test_parse_rejects_bare_key() {
        assert!(BlobLocation::parse("sklearn_model1.pkl").is_none());
        assert!(BlobLocation::parse("mem://bucket/").is_none());
    }

    #[tokio::test]
    async fn test_local_store_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalBlobStore::open(temp_dir.path(), "bucket").await.unwrap();

        let location = store.put("sklearn_model1.pkl", b"weights").await.unwrap();
        assert_eq!(location.to_string(), "local://bucket/sklearn_model1.pkl");
        assert!(temp_dir.path().join("bucket").join("sklearn_model1.pkl").exists());

        let data = store.get("sklearn_model1.pkl").await.unwrap();
        assert_eq!(data.as_deref(), Some(&b"weights"[..]));
    }

    #[tokio::test]
    async fn test_local_store_missing_blob_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalBlobStore::open(temp_dir.path(), "bucket").await.unwrap();
        assert!(store.get("sklearn_model9.pkl").await.unwrap().is_none());
        assert!(!store.delete("sklearn_model9.pkl").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_store_list_filters_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalBlobStore::open(temp_dir.path(), "bucket").await.unwrap();
        store.put("sklearn_model1.pkl", b"a").await.unwrap();
        store.put("sklearn_model2.pkl", b"b").await.unwrap();
        store.put("notes.txt", b"c").await.unwrap();

        let mut keys = store.list("sklearn_model").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["sklearn_model1.pkl", "sklearn_model2.pkl"]);
    }

    #[tokio::test]
    async fn test_keys_cannot_escape_bucket() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalBlobStore::open(temp_dir.path(), "bucket").await.unwrap();
        assert!(matches!(
            store.put("../escape.pkl", b"x").await,
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store_overwrite_and_delete() {
        let store = MemoryBlobStore::new("bucket");
        store.put("sklearn_model1.pkl", b"old").await.unwrap();
        store.put("sklearn_model1.pkl", b"new").await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(
            store.get("sklearn_model1.pkl").await.unwrap().as_deref(),
            Some(&b"new"[..])
        );
        assert!(store.delete("sklearn_model1.pkl").await.unwrap());
        assert!(store.is_empty().await);
    }
}
