//! Telemetry parsing and feature extraction
//!
//! Maps a batch of raw telemetry records onto the feature matrix and label
//! vector the classifier trains on. Each record becomes exactly one row, in
//! input order.

use crate::models::{TelemetryRecord, NUM_FEATURES};
use ndarray::{Array1, Array2};
use serde_json::Value;
use thiserror::Error;

/// Failure to decode an ingest body
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("request body is not a JSON array of telemetry records: {0}")]
    NotAnArray(#[source] serde_json::Error),

    #[error("telemetry record {index} is invalid: {source}")]
    InvalidRecord {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Decode an ingest body, rejecting the whole batch on the first bad record
pub fn parse_batch(body: &[u8]) -> Result<Vec<TelemetryRecord>, TelemetryError> {
    let values: Vec<Value> = serde_json::from_slice(body).map_err(TelemetryError::NotAnArray)?;

    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            serde_json::from_value(value)
                .map_err(|source| TelemetryError::InvalidRecord { index, source })
        })
        .collect()
}

/// Feature matrix and labels extracted from one batch
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub features: Array2<f64>,
    pub labels: Array1<usize>,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Extracts the fixed feature columns from telemetry records
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, records: &[TelemetryRecord]) -> TrainingSet {
        let mut features = Array2::<f64>::zeros((records.len(), NUM_FEATURES));
        let mut labels = Array1::<usize>::zeros(records.len());

        for (i, record) in records.iter().enumerate() {
            for (j, value) in record.features().0.into_iter().enumerate() {
                features[[i, j]] = value;
            }
            labels[i] = record.label().class();
        }

        TrainingSet { features, labels }
    }
}
