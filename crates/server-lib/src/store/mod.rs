//! Versioned model storage
//!
//! This module provides:
//! - Blob storage for native model artifacts
//! - The ledger of published model versions
//! - The registry tying blob names, versions and ledger rows together

mod blob;
mod ledger;
mod registry;


pub use blob::{BlobLocation, BlobStore, LocalBlobStore, MemoryBlobStore};
pub use ledger::{Ledger, MemoryLedger, SqliteLedger};
pub use registry::{
    compute_checksum, latest_version, model_file_name, parse_model_version, ModelRegistry,
    MODEL_FILE_PREFIX,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ledger query failed: {0}")]
    Ledger(#[from] sqlx::Error),

    #[error("ledger row is invalid: {0}")]
    InvalidRow(String),

    #[error("{0} is unavailable")]
    Unavailable(String),

    #[error("blob storage failed for {key}: {source}")]
    Blob {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid blob key {0:?}")]
    InvalidKey(String),

    #[error("model location {location} is outside bucket {bucket}")]
    ForeignLocation { location: String, bucket: String },

    #[error("checksum mismatch for {key}: ledger has {expected}, blob has {actual}")]
    ChecksumMismatch {
        key: String,
        expected: String,
        actual: String,
    },
}

impl StoreError {
    /// True for failures of the ledger collaborator itself
    pub fn is_ledger_failure(&self) -> bool {
        matches!(
            self,
            StoreError::Ledger(_) | StoreError::InvalidRow(_) | StoreError::Unavailable(_)
        )
    }

    /// True for failures of the blob store collaborator itself
    pub fn is_blob_failure(&self) -> bool {
        matches!(self, StoreError::Blob { .. })
    }
}
