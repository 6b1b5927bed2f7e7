//! Model registry
//!
//! Pairs the blob store with the ledger. Native artifacts are stored under
//! `sklearn_model<N>.pkl`; each published blob gets one ledger row carrying
//! the same `N`, its location and its checksum.

use super::{BlobLocation, BlobStore, Ledger, StoreError};
use crate::models::ModelVersionRecord;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Key prefix shared by every native model blob
pub const MODEL_FILE_PREFIX: &str = "sklearn_model";

static MODEL_FILE_PATTERN: OnceLock<Regex> = OnceLock::new();

fn model_file_pattern() -> &'static Regex {
    MODEL_FILE_PATTERN.get_or_init(|| {
        Regex::new(r"^sklearn_model(\d+)\.pkl$").expect("model file pattern is valid")
    })
}

/// Blob key for a model version
pub fn model_file_name(version: u32) -> String {
    format!("{}{}.pkl", MODEL_FILE_PREFIX, version)
}

/// Version encoded in a blob key, `None` if the key does not follow the pattern
pub fn parse_model_version(file_name: &str) -> Option<u64> {
    model_file_pattern()
        .captures(file_name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Key with the highest encoded version
///
/// Two names encoding the same number (`sklearn_model1.pkl`,
/// `sklearn_model01.pkl`) are malformed; the first one seen wins and the
/// duplicate is logged.
pub fn latest_version<S: AsRef<str>>(file_names: &[S]) -> Option<&str> {
    let mut latest: Option<(u64, &str)> = None;

    for name in file_names {
        let name: &str = name.as_ref();
        let Some(version) = parse_model_version(name) else {
            continue;
        };
        match latest {
            Some((best, best_name)) if version == best => {
                warn!(version, first = %best_name, duplicate = %name, "Duplicate model version in blob names");
            }
            Some((best, _)) if version < best => {}
            _ => latest = Some((version, name)),
        }
    }

    latest.map(|(_, name)| name)
}

/// SHA-256 of a blob, hex encoded
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Blob store and ledger for a single model lineage
#[derive(Clone)]
pub struct ModelRegistry {
    blobs: Arc<dyn BlobStore>,
    ledger: Arc<dyn Ledger>,
}

impl ModelRegistry {
    pub fn new(blobs: Arc<dyn BlobStore>, ledger: Arc<dyn Ledger>) -> Self {
        Self { blobs, ledger }
    }

    pub fn bucket(&self) -> &str {
        self.blobs.bucket()
    }

    /// Model blob keys, ordered by encoded version
    pub async fn list_versions(&self) -> Result<Vec<String>, StoreError> {
        let mut versioned: Vec<(u64, String)> = self
            .blobs
            .list(MODEL_FILE_PREFIX)
            .await?
            .into_iter()
            .filter_map(|name| parse_model_version(&name).map(|v| (v, name)))
            .collect();
        versioned.sort();
        Ok(versioned.into_iter().map(|(_, name)| name).collect())
    }

    /// Key of the blob with the highest encoded version
    pub async fn latest_model_file(&self) -> Result<Option<String>, StoreError> {
        let names = self.list_versions().await?;
        Ok(latest_version(&names).map(str::to_string))
    }

    /// Blob contents, `None` (logged) when the blob is absent
    pub async fn download(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let data = self.blobs.get(key).await?;
        match &data {
            Some(bytes) => debug!(key = %key, size = bytes.len(), "Model downloaded"),
            None => warn!(key = %key, bucket = %self.bucket(), "Model file not found in blob store"),
        }
        Ok(data)
    }

    pub async fn upload(&self, key: &str, data: &[u8]) -> Result<BlobLocation, StoreError> {
        let location = self.blobs.put(key, data).await?;
        info!(location = %location, size = data.len(), "Model uploaded");
        Ok(location)
    }

    /// Most recently uploaded ledger row
    pub async fn latest_metadata(&self) -> Result<Option<ModelVersionRecord>, StoreError> {
        self.ledger.latest_by_upload_date().await
    }

    /// One past the highest recorded version, 1 for an empty ledger
    pub async fn next_version(&self) -> Result<u32, StoreError> {
        match self.ledger.latest_by_version().await? {
            None => Ok(1),
            Some(last) => last.version.checked_add(1).ok_or_else(|| {
                StoreError::InvalidRow(format!("version {} has no successor", last.version))
            }),
        }
    }

    /// Append a ledger row for `location` under the next version
    pub async fn record_metadata(&self, location: &str) -> Result<ModelVersionRecord, StoreError> {
        let version = self.next_version().await?;
        self.record_version(version, location, None).await
    }

    async fn record_version(
        &self,
        version: u32,
        location: &str,
        checksum: Option<String>,
    ) -> Result<ModelVersionRecord, StoreError> {
        let record = ModelVersionRecord {
            version,
            upload_date: chrono::Utc::now(),
            model_file_url: location.to_string(),
            checksum,
        };
        self.ledger.insert(&record).await?;
        Ok(record)
    }

    /// Upload an artifact as the next version and record it
    ///
    /// The version is computed once and used for both the blob key and the
    /// ledger row. Upload happens first: a failed ledger write leaves an
    /// orphaned blob for `reconcile_orphans`, never a row without a blob.
    pub async fn publish(&self, artifact: &[u8]) -> Result<ModelVersionRecord, StoreError> {
        let version = self.next_version().await?;
        let key = model_file_name(version);
        let location = self.upload(&key, artifact).await?;

        let record = self
            .record_version(version, &location.to_string(), Some(compute_checksum(artifact)))
            .await?;
        info!(version = record.version, location = %record.model_file_url, "Model version recorded");
        Ok(record)
    }

    /// Blob key referenced by a ledger row
    ///
    /// Bare keys without a scheme are accepted as-is.
    pub fn resolve_key(&self, record: &ModelVersionRecord) -> Result<String, StoreError> {
        let url = &record.model_file_url;
        if !url.contains("://") {
            return Ok(url.clone());
        }

        match BlobLocation::parse(url) {
            Some(location) if location.bucket == self.bucket() => Ok(location.key),
            _ => Err(StoreError::ForeignLocation {
                location: url.clone(),
                bucket: self.bucket().to_string(),
            }),
        }
    }

    /// Download the blob a ledger row points at, verifying its checksum
    pub async fn download_record(
        &self,
        record: &ModelVersionRecord,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let key = self.resolve_key(record)?;
        let Some(data) = self.download(&key).await? else {
            return Ok(None);
        };

        if let Some(expected) = &record.checksum {
            let actual = compute_checksum(&data);
            if &actual != expected {
                return Err(StoreError::ChecksumMismatch {
                    key,
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(Some(data))
    }

    /// Model blobs with no ledger row, optionally deleting them
    ///
    /// Must not run concurrently with `publish`: a blob uploaded but not yet
    /// recorded looks orphaned.
    pub async fn reconcile_orphans(&self, delete: bool) -> Result<Vec<String>, StoreError> {
        let recorded: HashSet<String> = self
            .ledger
            .all()
            .await?
            .iter()
            .filter_map(|record| self.resolve_key(record).ok())
            .collect();

        let orphans: Vec<String> = self
            .list_versions()
            .await?
            .into_iter()
            .filter(|key| !recorded.contains(key))
            .collect();

        if delete {
            for key in &orphans {
                if self.blobs.delete(key).await? {
                    info!(key = %key, "Deleted orphaned model blob");
                }
            }
        }

        Ok(orphans)
    }
}
