//! Hit/no-hit classifier
//!
//! A bagged forest of `linfa-trees` decision trees. Each tree is fit on a
//! bootstrap resample of the training set and predictions are a majority
//! vote. A freshly constructed classifier has no trees and predicts no-hit.
//!
//! The seed fixes the bootstrap rows, not the fitted trees: linfa-trees
//! breaks impurity ties in hash order, so two fits can differ byte-wise.

use super::features::TrainingSet;
use linfa::prelude::*;
use linfa_trees::DecisionTree;
use ndarray::{Array1, Array2, Axis};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Class predicted when no tree has been trained
pub const DEFAULT_CLASS: usize = 0;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("cannot fit a classifier on an empty training set")]
    EmptyTrainingSet,

    #[error("decision tree {tree} failed to fit: {message}")]
    Fit { tree: usize, message: String },

    #[error("failed to encode model artifact: {0}")]
    Encode(#[source] bincode::Error),

    #[error("failed to decode model artifact: {0}")]
    Decode(#[source] bincode::Error),

    #[error("training task aborted: {0}")]
    Aborted(String),
}

/// Forest hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    /// Number of trees in the forest
    pub n_trees: usize,
    /// Maximum depth per tree, unbounded when `None`
    pub max_depth: Option<usize>,
    /// Seed for bootstrap resampling
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            seed: 42,
        }
    }
}

/// Trainable classifier, serialized as the native model artifact
#[derive(Debug, Serialize, Deserialize)]
pub struct HitClassifier {
    params: ForestParams,
    trees: Vec<DecisionTree<f64, usize>>,
    trained_samples: usize,
}

impl HitClassifier {
    /// Create an untrained classifier
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            trees: Vec::new(),
            trained_samples: 0,
        }
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    pub fn trees(&self) -> &[DecisionTree<f64, usize>] {
        &self.trees
    }

    /// Number of rows the current trees were fit on
    pub fn trained_samples(&self) -> usize {
        self.trained_samples
    }

    /// Fit from scratch, replacing any previously trained trees
    pub fn fit(&mut self, set: &TrainingSet) -> Result<(), TrainingError> {
        if set.is_empty() {
            return Err(TrainingError::EmptyTrainingSet);
        }

        let n = set.len();
        let n_trees = self.params.n_trees.max(1);
        let mut rng = SmallRng::seed_from_u64(self.params.seed);
        let mut trees = Vec::with_capacity(n_trees);

        for tree in 0..n_trees {
            let rows: Vec<usize> = (0..n).map(|_| rng.random_range(0..n)).collect();
            let dataset = Dataset::new(
                set.features.select(Axis(0), &rows),
                set.labels.select(Axis(0), &rows),
            );

            let fitted = DecisionTree::params()
                .max_depth(self.params.max_depth)
                .fit(&dataset)
                .map_err(|e| TrainingError::Fit {
                    tree,
                    message: e.to_string(),
                })?;
            trees.push(fitted);
        }

        debug!(trees = trees.len(), samples = n, "Forest fitted");
        self.trees = trees;
        self.trained_samples = n;
        Ok(())
    }

    /// Majority vote across trees, ties go to the lower class
    pub fn predict(&self, features: &Array2<f64>) -> Array1<usize> {
        if self.trees.is_empty() {
            return Array1::from_elem(features.nrows(), DEFAULT_CLASS);
        }

        let votes: Vec<Array1<usize>> = self.trees.iter().map(|t| t.predict(features)).collect();

        (0..features.nrows())
            .map(|row| majority(votes.iter().map(|v| v[row])))
            .collect()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, TrainingError> {
        bincode::serialize(self).map_err(TrainingError::Encode)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TrainingError> {
        bincode::deserialize(bytes).map_err(TrainingError::Decode)
    }
}

pub(crate) fn majority(votes: impl Iterator<Item = usize>) -> usize {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for class in votes {
        *counts.entry(class).or_default() += 1;
    }

    let mut best = (DEFAULT_CLASS, 0);
    for (class, count) in counts {
        if count > best.1 {
            best = (class, count);
        }
    }
    best.0
}
