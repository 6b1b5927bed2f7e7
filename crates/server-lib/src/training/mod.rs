//! Model training and export

mod classifier;
mod export;
mod features;

pub use classifier::{ForestParams, HitClassifier, TrainingError, DEFAULT_CLASS};
pub use export::{
    ExportError, ExportedModel, ExportedNode, MobileModel, ModelExporter, EXPORT_FILE_NAME,
    FORMAT_VERSION,
};
pub use features::{parse_batch, FeatureExtractor, TelemetryError, TrainingSet};

use crate::models::TelemetryRecord;
use std::time::Instant;
use tracing::{debug, info};

/// Loads or initializes a classifier and fits it on new telemetry
#[derive(Debug, Clone)]
pub struct Trainer {
    params: ForestParams,
    extractor: FeatureExtractor,
}

impl Trainer {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            extractor: FeatureExtractor::new(),
        }
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    /// A brand-new untrained classifier
    pub fn fresh_model(&self) -> HitClassifier {
        HitClassifier::new(self.params.clone())
    }

    /// Decode the current artifact, or start fresh when there is none
    pub fn load_or_init(&self, artifact: Option<&[u8]>) -> Result<HitClassifier, TrainingError> {
        match artifact {
            Some(bytes) => HitClassifier::from_bytes(bytes),
            None => {
                debug!("No current model artifact, initializing a fresh classifier");
                Ok(self.fresh_model())
            }
        }
    }

    /// Fit the current (or fresh) model on a telemetry batch
    pub fn retrain(
        &self,
        artifact: Option<&[u8]>,
        records: &[TelemetryRecord],
    ) -> Result<HitClassifier, TrainingError> {
        let start = Instant::now();
        let set = self.extractor.extract(records);
        let mut model = self.load_or_init(artifact)?;
        model.fit(&set)?;

        info!(
            samples = set.len(),
            trees = model.trees().len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Model retrained"
        );
        Ok(model)
    }

    /// `retrain` on the blocking thread pool
    pub async fn retrain_blocking(
        &self,
        artifact: Option<Vec<u8>>,
        records: Vec<TelemetryRecord>,
    ) -> Result<HitClassifier, TrainingError> {
        let trainer = self.clone();
        tokio::task::spawn_blocking(move || trainer.retrain(artifact.as_deref(), &records))
            .await
            .map_err(|e| TrainingError::Aborted(e.to_string()))?
    }
}
