use ndarray::{Array1, Array4};
use shared::NUM_CLASSES;

use super::error::FeatureShapeError;

/// Preprocessed image, laid out `[1, height, width, 3]`.
pub type ImageTensor = Array4<f32>;

/// Compressed latent representation fed to both tree ensembles.
pub type LatentVector = Array1<f32>;

/// One score per class, indexed by the configured class order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbabilityVector([f32; NUM_CLASSES]);

impl ProbabilityVector {
    pub fn new(values: [f32; NUM_CLASSES]) -> Self {
        Self(values)
    }

    pub fn from_slice(stage: &'static str, values: &[f32]) -> Result<Self, FeatureShapeError> {
        let values: [f32; NUM_CLASSES] =
            values.try_into().map_err(|_| FeatureShapeError {
                stage,
                expected: NUM_CLASSES,
                actual: values.len(),
            })?;
        Ok(Self(values))
    }

    /// Numerically stable softmax over raw scores.
    pub fn softmax(margins: &[f32; NUM_CLASSES]) -> Self {
        let max = margins.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps = margins.map(|m| (m - max).exp());
        let total: f32 = exps.iter().sum();
        Self(exps.map(|e| e / total))
    }

    pub fn values(&self) -> &[f32; NUM_CLASSES] {
        &self.0
    }

    pub fn get(&self, index: usize) -> f32 {
        self.0[index]
    }

    pub fn sum(&self) -> f32 {
        self.0.iter().sum()
    }

    /// Index of the largest entry. Ties resolve to the lowest index.
    pub fn argmax(&self) -> usize {
        let mut best = 0;
        for (index, &value) in self.0.iter().enumerate().skip(1) {
            if value > self.0[best] {
                best = index;
            }
        }
        best
    }
}
