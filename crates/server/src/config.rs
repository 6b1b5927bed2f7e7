//! Server configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use server_lib::training::ForestParams;
use std::path::PathBuf;

/// Server configuration
///
/// Read from an optional `model-server.{toml,json,yaml}` file, then from
/// `MODEL_*` environment variables. Credentials belong in the environment,
/// never in the file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP port
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Bucket holding the native model blobs
    #[serde(default = "default_bucket_name")]
    pub bucket_name: String,

    /// Directory the bucket lives under
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// Ledger database URL
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_n_trees")]
    pub n_trees: usize,

    #[serde(default)]
    pub max_depth: Option<usize>,

    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Report model blobs without ledger rows before serving
    #[serde(default)]
    pub reconcile_on_startup: bool,

    /// Delete the orphans found by startup reconciliation
    #[serde(default)]
    pub delete_orphans: bool,
}

fn default_api_port() -> u16 {
    8080
}

fn default_bucket_name() -> String {
    "bucket-hardgameflaskapp-models".to_string()
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/blobs")
}

fn default_database_url() -> String {
    "sqlite://models.db".to_string()
}

fn default_n_trees() -> usize {
    ForestParams::default().n_trees
}

fn default_seed() -> u64 {
    ForestParams::default().seed
}

impl ServerConfig {
    /// Load configuration from the optional config file and environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("model-server").required(false))
            .add_source(config::Environment::with_prefix("MODEL").try_parsing(true))
            .build()
            .context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Invalid model-server configuration")
    }

    pub fn forest_params(&self) -> ForestParams {
        ForestParams {
            n_trees: self.n_trees,
            max_depth: self.max_depth,
            seed: self.seed,
        }
    }
}
