use shared::NUM_CLASSES;

use super::bundle::EnsemblePair;
use super::error::FeatureShapeError;
use super::types::{LatentVector, ProbabilityVector};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub classifier: f32,
    pub boosted: f32,
    pub forest: f32,
}

pub const FUSION_WEIGHTS: FusionWeights = FusionWeights {
    classifier: 0.4,
    boosted: 0.4,
    forest: 0.2,
};

impl FusionWeights {
    pub fn as_array(&self) -> [f32; 3] {
        [self.classifier, self.boosted, self.forest]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedPrediction {
    pub winner: usize,
    pub probabilities: ProbabilityVector,
}

/// Weighted average of the three class distributions.
pub fn combine(
    classifier: &ProbabilityVector,
    boosted: &ProbabilityVector,
    forest: &ProbabilityVector,
    weights: &FusionWeights,
) -> ProbabilityVector {
    let mut fused = [0.0f32; NUM_CLASSES];
    for (k, slot) in fused.iter_mut().enumerate() {
        *slot = weights.classifier * classifier.get(k)
            + weights.boosted * boosted.get(k)
            + weights.forest * forest.get(k);
    }
    ProbabilityVector::new(fused)
}

pub fn fuse(
    classifier_probs: &ProbabilityVector,
    latent: &LatentVector,
    ensembles: &EnsemblePair,
) -> Result<FusedPrediction, FeatureShapeError> {
    let boosted = ensembles.boosted.predict_proba(latent.view())?;
    let forest = ensembles.forest.predict_proba(latent.view())?;
    log::debug!(
        "Component distributions: classifier={:?} boosted={:?} forest={:?}",
        classifier_probs.values(),
        boosted.values(),
        forest.values()
    );

    let probabilities = combine(classifier_probs, &boosted, &forest, &FUSION_WEIGHTS);
    Ok(FusedPrediction {
        winner: probabilities.argmax(),
        probabilities,
    })
}
