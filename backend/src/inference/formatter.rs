use shared::{ClassProbability, Prediction, TumorClass};

use super::types::ProbabilityVector;
use crate::config::ClassOrder;

/// Predictions of this class below `ADVISORY_MIN_CONFIDENCE` get a
/// follow-up note, since subtle gliomas are often read as clean scans.
pub const ADVISORY_CLASS: TumorClass = TumorClass::NoTumor;
pub const ADVISORY_MIN_CONFIDENCE: f32 = 60.0;

#[derive(Debug, Clone, PartialEq)]
pub struct LowConfidenceAdvisory {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormattedPrediction {
    pub class: TumorClass,
    pub label: String,
    /// Winning probability as a percentage.
    pub confidence: f32,
    pub distribution: Vec<(TumorClass, f32)>,
    pub advisory: Option<LowConfidenceAdvisory>,
}

pub fn format(fused: &ProbabilityVector, classes: &ClassOrder) -> FormattedPrediction {
    let winner = fused.argmax();
    let class = classes.class_at(winner);
    let confidence = fused.get(winner) * 100.0;

    let distribution = classes
        .classes()
        .iter()
        .enumerate()
        .map(|(i, c)| (*c, fused.get(i) * 100.0))
        .collect();

    let advisory = (class == ADVISORY_CLASS && confidence < ADVISORY_MIN_CONFIDENCE).then(|| {
        LowConfidenceAdvisory {
            message: format!(
                "Prediction is '{}' at only {:.1}% confidence. Possible subtle lesion; radiologist review recommended.",
                class, confidence
            ),
        }
    });

    FormattedPrediction {
        class,
        label: class.to_string(),
        confidence,
        distribution,
        advisory,
    }
}

impl From<FormattedPrediction> for Prediction {
    fn from(formatted: FormattedPrediction) -> Self {
        Prediction {
            class: formatted.class,
            label: formatted.label,
            confidence: formatted.confidence,
            distribution: formatted
                .distribution
                .into_iter()
                .map(|(class, percent)| ClassProbability {
                    class,
                    label: class.to_string(),
                    percent,
                })
                .collect(),
            advisory: formatted.advisory.map(|a| a.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_confidence_no_tumor_gets_advisory() {
        let probs = ProbabilityVector::new([0.30, 0.10, 0.55, 0.05]);
        let out = format(&probs, &ClassOrder::default());
        assert_eq!(out.class, TumorClass::NoTumor);
        assert_eq!(out.label, "No Tumor");
        assert!((out.confidence - 55.0).abs() < 1e-4);
        let advisory = out.advisory.expect("advisory expected");
        assert!(advisory.message.contains("No Tumor"));
    }

    #[test]
    fn test_confident_no_tumor_has_no_advisory() {
        let probs = ProbabilityVector::new([0.10, 0.10, 0.75, 0.05]);
        let out = format(&probs, &ClassOrder::default());
        assert_eq!(out.class, TumorClass::NoTumor);
        assert!(out.advisory.is_none());
    }

    #[test]
    fn test_advisory_only_for_no_tumor() {
        let probs = ProbabilityVector::new([0.40, 0.30, 0.20, 0.10]);
        let out = format(&probs, &ClassOrder::default());
        assert_eq!(out.class, TumorClass::Glioma);
        assert!(out.advisory.is_none());
    }

    #[test]
    fn test_class_order_maps_indices() {
        let order = ClassOrder::try_from(vec![
            TumorClass::Pituitary,
            TumorClass::NoTumor,
            TumorClass::Meningioma,
            TumorClass::Glioma,
        ])
        .unwrap();
        let probs = ProbabilityVector::new([0.9, 0.05, 0.03, 0.02]);
        let out = format(&probs, &order);
        assert_eq!(out.class, TumorClass::Pituitary);
        assert_eq!(out.distribution[3].0, TumorClass::Glioma);
    }

    #[test]
    fn test_into_shared_prediction() {
        let probs = ProbabilityVector::new([0.0, 1.0, 0.0, 0.0]);
        let prediction: Prediction = format(&probs, &ClassOrder::default()).into();
        assert_eq!(prediction.label, "Meningioma");
        assert_eq!(prediction.confidence, 100.0);
        assert_eq!(prediction.distribution.len(), 4);
        assert!(prediction.advisory.is_none());
    }
}
