//! Evaluator for exported decision-tree ensembles.
//!
//! Both the gradient-boosted model and the random forest are stored as flat
//! node arrays in JSON. Every tree is validated on load so evaluation never
//! has to bounds-check or guard against cycles.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use shared::NUM_CLASSES;
use std::path::Path;

use super::error::{FeatureShapeError, ModelLoadError};
use super::types::ProbabilityVector;

#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("Tree JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid ensemble: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsembleKind {
    GradientBoosting,
    RandomForest,
}

impl EnsembleKind {
    pub fn stage(&self) -> &'static str {
        match self {
            EnsembleKind::GradientBoosting => "gradient boosting",
            EnsembleKind::RandomForest => "random forest",
        }
    }

    fn default_split_rule(&self) -> SplitRule {
        match self {
            EnsembleKind::GradientBoosting => SplitRule::LessThan,
            EnsembleKind::RandomForest => SplitRule::LessOrEqual,
        }
    }
}

/// Comparison used at split nodes: the sample goes left when it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitRule {
    LessThan,
    LessOrEqual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
        #[serde(default)]
        default_left: bool,
    },
    Leaf {
        values: Vec<f32>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    /// Output class of a boosted tree. Forest trees vote for every class.
    #[serde(default)]
    pub class: usize,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEnsemble {
    kind: EnsembleKind,
    n_features: usize,
    n_classes: usize,
    #[serde(default)]
    split_rule: Option<SplitRule>,
    #[serde(default)]
    base_margin: Vec<f32>,
    trees: Vec<Tree>,
}

impl TreeEnsemble {
    pub fn from_json(json: &str) -> Result<Self, TreeError> {
        let ensemble: TreeEnsemble = serde_json::from_str(json)?;
        ensemble.validate()?;
        Ok(ensemble)
    }

    pub fn load(path: &Path, expected: EnsembleKind) -> Result<Self, ModelLoadError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ModelLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let ensemble = Self::from_json(&raw).map_err(|e| ModelLoadError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if ensemble.kind != expected {
            return Err(ModelLoadError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("expected a {} model, found {}", expected.stage(), ensemble.kind.stage()),
            });
        }
        log::info!(
            "Loaded {} ensemble with {} trees from {}",
            ensemble.kind.stage(),
            ensemble.trees.len(),
            path.display()
        );
        Ok(ensemble)
    }

    pub fn kind(&self) -> EnsembleKind {
        self.kind
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    fn split_rule(&self) -> SplitRule {
        self.split_rule
            .unwrap_or_else(|| self.kind.default_split_rule())
    }

    fn validate(&self) -> Result<(), TreeError> {
        let invalid = |msg: String| Err(TreeError::Invalid(msg));

        if self.n_classes != NUM_CLASSES {
            return invalid(format!("expected {} classes, found {}", NUM_CLASSES, self.n_classes));
        }
        if self.n_features == 0 {
            return invalid("ensemble has no input features".to_string());
        }
        if self.trees.is_empty() {
            return invalid("ensemble has no trees".to_string());
        }
        if !self.base_margin.is_empty() && self.base_margin.len() != self.n_classes {
            return invalid(format!(
                "base_margin has {} entries, expected {}",
                self.base_margin.len(),
                self.n_classes
            ));
        }

        let leaf_width = match self.kind {
            EnsembleKind::GradientBoosting => 1,
            EnsembleKind::RandomForest => self.n_classes,
        };

        for (t, tree) in self.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return invalid(format!("tree {} is empty", t));
            }
            if tree.class >= self.n_classes {
                return invalid(format!("tree {} targets class {}", t, tree.class));
            }
            for (i, node) in tree.nodes.iter().enumerate() {
                match node {
                    Node::Split {
                        feature,
                        threshold,
                        left,
                        right,
                        ..
                    } => {
                        if *feature >= self.n_features {
                            return invalid(format!("tree {} node {} splits on feature {}", t, i, feature));
                        }
                        if threshold.is_nan() {
                            return invalid(format!("tree {} node {} has a NaN threshold", t, i));
                        }
                        // Children after their parent rules out cycles.
                        for child in [*left, *right] {
                            if child <= i || child >= tree.nodes.len() {
                                return invalid(format!(
                                    "tree {} node {} has out-of-order child {}",
                                    t, i, child
                                ));
                            }
                        }
                    }
                    Node::Leaf { values } => {
                        if values.len() != leaf_width {
                            return invalid(format!(
                                "tree {} leaf {} has {} values, expected {}",
                                t,
                                i,
                                values.len(),
                                leaf_width
                            ));
                        }
                        if values.iter().any(|v| !v.is_finite()) {
                            return invalid(format!("tree {} leaf {} is not finite", t, i));
                        }
                        if self.kind == EnsembleKind::RandomForest {
                            if values.iter().any(|v| *v < 0.0) {
                                return invalid(format!("tree {} leaf {} has negative counts", t, i));
                            }
                            if values.iter().sum::<f32>() <= 0.0 {
                                return invalid(format!("tree {} leaf {} has no counts", t, i));
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn leaf<'a>(&self, tree: &'a Tree, x: &ArrayView1<f32>, rule: SplitRule) -> &'a [f32] {
        let mut index = 0;
        loop {
            match &tree.nodes[index] {
                Node::Leaf { values } => return values,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    default_left,
                } => {
                    let value = x[*feature];
                    let go_left = if value.is_nan() {
                        *default_left
                    } else {
                        match rule {
                            SplitRule::LessThan => value < *threshold,
                            SplitRule::LessOrEqual => value <= *threshold,
                        }
                    };
                    index = if go_left { *left } else { *right };
                }
            }
        }
    }

    pub fn predict_proba(&self, x: ArrayView1<f32>) -> Result<ProbabilityVector, FeatureShapeError> {
        if x.len() != self.n_features {
            return Err(FeatureShapeError {
                stage: self.kind.stage(),
                expected: self.n_features,
                actual: x.len(),
            });
        }
        let rule = self.split_rule();

        match self.kind {
            EnsembleKind::GradientBoosting => {
                let mut margins = [0.0f32; NUM_CLASSES];
                for (margin, base) in margins.iter_mut().zip(&self.base_margin) {
                    *margin = *base;
                }
                for tree in &self.trees {
                    margins[tree.class] += self.leaf(tree, &x, rule)[0];
                }
                Ok(ProbabilityVector::softmax(&margins))
            }
            EnsembleKind::RandomForest => {
                let mut votes = [0.0f32; NUM_CLASSES];
                for tree in &self.trees {
                    let leaf = self.leaf(tree, &x, rule);
                    let total: f32 = leaf.iter().sum();
                    for (vote, count) in votes.iter_mut().zip(leaf) {
                        *vote += count / total;
                    }
                }
                let n_trees = self.trees.len() as f32;
                Ok(ProbabilityVector::new(votes.map(|v| v / n_trees)))
            }
        }
    }
}
