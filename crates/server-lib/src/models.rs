//! Core data models for the model service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of numeric features taken from each telemetry record
pub const NUM_FEATURES: usize = 9;

/// Feature column order shared by the trainer and the exported model
pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "playerX",
    "playerY",
    "enemyX",
    "enemyY",
    "missileX",
    "missileY",
    "enemyMissileX",
    "enemyMissileY",
    "enemyMove",
];

/// Name of the predicted output in the exported model
pub const OUTPUT_NAME: &str = "outcome";

/// One gameplay observation submitted by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub player_x: f64,
    pub player_y: f64,
    pub enemy_x: f64,
    pub enemy_y: f64,
    pub missile_x: f64,
    pub missile_y: f64,
    pub enemy_missile_x: f64,
    pub enemy_missile_y: f64,
    /// Encoded enemy move indicator
    pub enemy_move: f64,
    /// 1.0 when the player was hit, 0.0 otherwise
    pub outcome: f64,
}

impl TelemetryRecord {
    /// Feature values in `FEATURE_NAMES` order
    pub fn features(&self) -> FeatureVector {
        FeatureVector([
            self.player_x,
            self.player_y,
            self.enemy_x,
            self.enemy_y,
            self.missile_x,
            self.missile_y,
            self.enemy_missile_x,
            self.enemy_missile_y,
            self.enemy_move,
        ])
    }

    pub fn label(&self) -> HitLabel {
        HitLabel::from_outcome(self.outcome)
    }
}

/// Feature vector for training and inference
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub [f64; NUM_FEATURES]);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

/// Binary training label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitLabel {
    NoHit,
    Hit,
}

impl HitLabel {
    pub fn from_outcome(outcome: f64) -> Self {
        if outcome >= 0.5 {
            HitLabel::Hit
        } else {
            HitLabel::NoHit
        }
    }

    /// Class index used by the classifier
    pub fn class(self) -> usize {
        match self {
            HitLabel::NoHit => 0,
            HitLabel::Hit => 1,
        }
    }
}

/// One ledger row describing a published model version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersionRecord {
    pub version: u32,
    pub upload_date: DateTime<Utc>,
    pub model_file_url: String,
    /// SHA-256 of the uploaded blob, absent on rows from older producers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}
