//! Mobile model export
//!
//! Converts a trained `HitClassifier` into a self-contained inference
//! document that a game client can evaluate without the training library.
//! Each tree is flattened into an indexed node array; a branch sends a row to
//! `left` when `row[feature] < threshold` and to `right` otherwise.

use super::classifier::{majority, HitClassifier, DEFAULT_CLASS};
use crate::models::{FeatureVector, FEATURE_NAMES, NUM_FEATURES, OUTPUT_NAME};
use linfa_trees::{DecisionTree, TreeNode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Format revision written into every exported document
pub const FORMAT_VERSION: u32 = 1;

/// File name the exported model is served under
pub const EXPORT_FILE_NAME: &str = "model.mlmodel";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("tree {tree} has a branch node without both children")]
    MalformedTree { tree: usize },

    #[error("failed to encode mobile model: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One node of a flattened decision tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExportedNode {
    Branch {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        class: usize,
    },
}

/// Inference-only model document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobileModel {
    pub format_version: u32,
    pub model_version: u32,
    pub input_features: Vec<String>,
    pub output: String,
    pub class_labels: Vec<usize>,
    pub default_class: usize,
    /// Node 0 of each tree is its root
    pub trees: Vec<Vec<ExportedNode>>,
}

impl MobileModel {
    /// Evaluate the document the way a client would
    pub fn predict(&self, features: &FeatureVector) -> usize {
        if self.trees.is_empty() {
            return self.default_class;
        }
        majority(self.trees.iter().map(|nodes| walk(nodes, features.as_slice())))
    }
}

fn walk(nodes: &[ExportedNode], row: &[f64]) -> usize {
    let mut index = 0;
    loop {
        match &nodes[index] {
            ExportedNode::Leaf { class } => return *class,
            ExportedNode::Branch {
                feature,
                threshold,
                left,
                right,
            } => {
                index = if row[*feature] < *threshold { *left } else { *right };
            }
        }
    }
}

/// Exported artifact ready to be served
#[derive(Debug, Clone)]
pub struct ExportedModel {
    pub version: u32,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Converts native classifiers into mobile documents
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelExporter;

impl ModelExporter {
    pub fn new() -> Self {
        Self
    }

    pub fn convert(
        &self,
        classifier: &HitClassifier,
        version: u32,
    ) -> Result<MobileModel, ExportError> {
        let trees = classifier
            .trees()
            .iter()
            .enumerate()
            .map(|(i, tree)| flatten(tree).ok_or(ExportError::MalformedTree { tree: i }))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(MobileModel {
            format_version: FORMAT_VERSION,
            model_version: version,
            input_features: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            output: OUTPUT_NAME.to_string(),
            class_labels: vec![0, 1],
            default_class: DEFAULT_CLASS,
            trees,
        })
    }

    pub fn export(
        &self,
        classifier: &HitClassifier,
        version: u32,
    ) -> Result<ExportedModel, ExportError> {
        let document = self.convert(classifier, version)?;
        Ok(ExportedModel {
            version,
            file_name: EXPORT_FILE_NAME.to_string(),
            bytes: serde_json::to_vec(&document)?,
        })
    }
}

/// Flatten a tree in pre-order; `None` if a branch is missing a child
fn flatten(tree: &DecisionTree<f64, usize>) -> Option<Vec<ExportedNode>> {
    let mut nodes = Vec::new();
    push_node(tree.root_node(), &mut nodes)?;
    Some(nodes)
}

fn push_node(node: &TreeNode<f64, usize>, nodes: &mut Vec<ExportedNode>) -> Option<usize> {
    let index = nodes.len();

    if let Some(class) = node.prediction() {
        nodes.push(ExportedNode::Leaf { class });
        return Some(index);
    }

    let (feature, threshold, _) = node.split();
    debug_assert!(feature < NUM_FEATURES);
    // Placeholder until both children are placed
    nodes.push(ExportedNode::Leaf {
        class: DEFAULT_CLASS,
    });

    let children = node.children();
    let left = push_node(children.first()?.as_deref()?, nodes)?;
    let right = push_node(children.get(1)?.as_deref()?, nodes)?;

    nodes[index] = ExportedNode::Branch {
        feature,
        threshold,
        left,
        right,
    };
    Some(index)
}
