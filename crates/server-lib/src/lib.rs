//! Library for the gameplay model service
//!
//! This crate provides the core functionality for:
//! - Telemetry parsing and feature extraction
//! - Classifier retraining and mobile model export
//! - Versioned model storage (blob store + ledger)
//! - The HTTP API, health checks and observability

pub mod api;
pub mod health;
pub mod models;
pub mod observability;
pub mod service;
pub mod store;
pub mod training;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ServiceMetrics, StructuredLogger};
pub use service::{ModelService, ServiceError};
