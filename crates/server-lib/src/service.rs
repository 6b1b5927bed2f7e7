//! Ingest and fetch orchestration
//!
//! `ingest`: resolve the current model by blob name, retrain it on the
//! batch and publish the result as the next version.
//!
//! `latest_export`: take the most recently uploaded ledger row (seeding an
//! untrained version 1 when the ledger is confirmed empty), download its
//! blob and convert it to the mobile format.

use crate::health::{components, HealthRegistry};
use crate::models::{ModelVersionRecord, TelemetryRecord};
use crate::observability::{ServiceMetrics, StructuredLogger};
use crate::store::{ModelRegistry, StoreError};
use crate::training::{
    ExportError, ExportedModel, HitClassifier, ModelExporter, TelemetryError, Trainer,
    TrainingError,
};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error(transparent)]
    Training(#[from] TrainingError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("model version {version} has no blob at {key}")]
    ModelNotFound { version: u32, key: String },
}

impl ServiceError {
    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Telemetry(_) => "telemetry",
            ServiceError::Training(TrainingError::EmptyTrainingSet) => "telemetry",
            ServiceError::Training(_) => "training",
            ServiceError::Export(_) => "export",
            ServiceError::Store(e) if e.is_ledger_failure() => "ledger",
            ServiceError::Store(e) if e.is_blob_failure() => "blob_store",
            ServiceError::Store(_) => "store",
            ServiceError::ModelNotFound { .. } => "not_found",
        }
    }
}

/// Request-level operations over one model lineage
#[derive(Clone)]
pub struct ModelService {
    registry: ModelRegistry,
    trainer: Trainer,
    exporter: ModelExporter,
    health: HealthRegistry,
    metrics: ServiceMetrics,
    logger: StructuredLogger,
}

impl ModelService {
    pub fn new(
        registry: ModelRegistry,
        trainer: Trainer,
        health: HealthRegistry,
        metrics: ServiceMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            registry,
            trainer,
            exporter: ModelExporter::new(),
            health,
            metrics,
            logger,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn metrics(&self) -> &ServiceMetrics {
        &self.metrics
    }

    /// Retrain on a telemetry batch and publish the result
    pub async fn ingest(
        &self,
        records: Vec<TelemetryRecord>,
    ) -> Result<ModelVersionRecord, ServiceError> {
        let result = self.ingest_inner(records).await;
        self.finish(&result).await;
        result
    }

    async fn ingest_inner(
        &self,
        records: Vec<TelemetryRecord>,
    ) -> Result<ModelVersionRecord, ServiceError> {
        let samples = records.len();
        let current = self.current_artifact().await?;

        let start = Instant::now();
        let model = self.trainer.retrain_blocking(current, records).await?;
        self.metrics
            .observe_training_latency(start.elapsed().as_secs_f64());

        let artifact = model.to_bytes()?;
        let record = self.observe(self.registry.publish(&artifact).await).await?;

        self.metrics.record_ingest(samples);
        self.metrics.set_model_version(record.version);
        self.logger
            .log_model_published(record.version, &record.model_file_url, samples);
        Ok(record)
    }

    /// Native artifact of the highest-numbered model blob, if any
    async fn current_artifact(&self) -> Result<Option<Vec<u8>>, ServiceError> {
        let latest = self.observe(self.registry.latest_model_file().await).await?;
        let Some(key) = latest else {
            debug!("No model blobs yet, training from a fresh classifier");
            return Ok(None);
        };
        Ok(self.observe(self.registry.download(&key).await).await?)
    }

    /// Convert the most recently uploaded model for serving
    pub async fn latest_export(&self) -> Result<ExportedModel, ServiceError> {
        let result = self.latest_export_inner().await;
        self.finish(&result).await;
        result
    }

    async fn latest_export_inner(&self) -> Result<ExportedModel, ServiceError> {
        let record = match self.observe(self.registry.latest_metadata().await).await? {
            Some(record) => record,
            None => self.bootstrap().await?,
        };

        let key = self.registry.resolve_key(&record)?;
        let artifact = self
            .observe(self.registry.download_record(&record).await)
            .await?
            .ok_or_else(|| {
                self.logger.log_blob_missing(&key);
                ServiceError::ModelNotFound {
                    version: record.version,
                    key: key.clone(),
                }
            })?;

        let start = Instant::now();
        let exporter = self.exporter;
        let version = record.version;
        let exported = tokio::task::spawn_blocking(move || -> Result<ExportedModel, ServiceError> {
            let model = HitClassifier::from_bytes(&artifact)?;
            Ok(exporter.export(&model, version)?)
        })
        .await
        .map_err(|e| TrainingError::Aborted(e.to_string()))??;
        self.metrics
            .observe_export_latency(start.elapsed().as_secs_f64());

        self.metrics.set_model_version(exported.version);
        self.logger
            .log_model_served(exported.version, exported.bytes.len());
        Ok(exported)
    }

    /// Seed a confirmed-empty ledger with an untrained version
    async fn bootstrap(&self) -> Result<ModelVersionRecord, ServiceError> {
        let artifact = self.trainer.fresh_model().to_bytes()?;
        let record = self.observe(self.registry.publish(&artifact).await).await?;

        self.metrics.inc_bootstraps();
        self.logger
            .log_bootstrap(record.version, &record.model_file_url);
        Ok(record)
    }

    /// List (and optionally delete) blobs no ledger row points at
    pub async fn reconcile(&self, delete: bool) -> Result<Vec<String>, ServiceError> {
        let orphans = self
            .observe(self.registry.reconcile_orphans(delete).await)
            .await?;
        self.logger.log_orphans(&orphans, delete);
        Ok(orphans)
    }

    /// Probe both collaborators, marking each healthy or unhealthy
    ///
    /// Returns true when both answered.
    pub async fn check_storage(&self) -> bool {
        let ledger = self.registry.latest_metadata().await.map(|_| ());
        let blobs = self.registry.list_versions().await.map(|_| ());

        let mut ok = true;
        for (component, result) in [(components::LEDGER, ledger), (components::BLOB_STORE, blobs)] {
            match result {
                Ok(()) => self.health.set_healthy(component).await,
                Err(e) => {
                    ok = false;
                    warn!(component = %component, error = %e, "Storage collaborator check failed");
                    self.health.set_unhealthy(component, e.to_string()).await;
                }
            }
        }
        ok
    }

    /// Mark the failing collaborator degraded
    async fn observe<T>(&self, result: Result<T, StoreError>) -> Result<T, StoreError> {
        if let Err(e) = &result {
            if e.is_ledger_failure() {
                self.logger.log_ledger_failure(&e.to_string());
                self.health
                    .set_degraded(components::LEDGER, e.to_string())
                    .await;
            } else if e.is_blob_failure() {
                self.health
                    .set_degraded(components::BLOB_STORE, e.to_string())
                    .await;
            }
        }
        result
    }

    /// Both collaborators answered on success; count failures otherwise
    async fn finish<T>(&self, result: &Result<T, ServiceError>) {
        match result {
            Ok(_) => {
                self.health.set_healthy(components::LEDGER).await;
                self.health.set_healthy(components::BLOB_STORE).await;
            }
            Err(e) => self.metrics.inc_errors(e.kind()),
        }
    }
}
