use std::sync::Arc;

use super::bundle::{EnsemblePair, ModelBundle};
use super::error::PipelineError;
use super::features;
use super::formatter::{self, FormattedPrediction};
use super::fusion;
use super::preprocess;
use super::types::{ImageTensor, LatentVector, ProbabilityVector};
use crate::config::{ClassOrder, ImageConfig, PipelineConfig};

/// The learned stages of the pipeline. `ModelBundle` is the production
/// implementation.
pub trait FeatureSource: Send + Sync {
    fn classifier_probs(&self, tensor: &ImageTensor) -> Result<ProbabilityVector, PipelineError>;
    fn extract_latent(&self, tensor: &ImageTensor) -> Result<LatentVector, PipelineError>;
    fn ensembles(&self) -> &EnsemblePair;
}

impl FeatureSource for ModelBundle {
    fn classifier_probs(&self, tensor: &ImageTensor) -> Result<ProbabilityVector, PipelineError> {
        features::classifier_probs(tensor, self)
    }

    fn extract_latent(&self, tensor: &ImageTensor) -> Result<LatentVector, PipelineError> {
        features::extract_latent(tensor, self)
    }

    fn ensembles(&self) -> &EnsemblePair {
        ModelBundle::ensembles(self)
    }
}

/// End-to-end classification of raw image bytes.
pub struct Predictor<S = ModelBundle> {
    source: Arc<S>,
    image: ImageConfig,
    classes: ClassOrder,
}

impl<S> Clone for Predictor<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            image: self.image.clone(),
            classes: self.classes,
        }
    }
}

impl<S: FeatureSource> Predictor<S> {
    pub fn new(source: Arc<S>, config: &PipelineConfig) -> Self {
        Self {
            source,
            image: config.image.clone(),
            classes: config.classes,
        }
    }

    pub fn classes(&self) -> &ClassOrder {
        &self.classes
    }

    pub fn predict(&self, image_data: &[u8]) -> Result<FormattedPrediction, PipelineError> {
        let tensor = preprocess::preprocess(image_data, &self.image)?;
        let cnn_probs = self.source.classifier_probs(&tensor)?;
        let latent = self.source.extract_latent(&tensor)?;
        let fused = fusion::fuse(&cnn_probs, &latent, self.source.ensembles())?;
        let formatted = formatter::format(&fused.probabilities, &self.classes);
        log::info!(
            "Predicted {} with {:.2}% confidence",
            formatted.label,
            formatted.confidence
        );
        if let Some(advisory) = &formatted.advisory {
            log::warn!("{}", advisory.message);
        }
        Ok(formatted)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::inference::error::ImageDecodeError;
    use crate::inference::trees::TreeEnsemble;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use ndarray::Array1;
    use serde_json::json;
    use shared::TumorClass;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Stand-in for the learned stages. The classifier output and latent
    /// vector are derived from the tensor so identical inputs give identical
    /// outputs.
    pub(crate) struct FakeSource {
        pub calls: AtomicUsize,
        pub classifier: ProbabilityVector,
        ensembles: EnsemblePair,
    }

    impl FakeSource {
        pub(crate) fn new(classifier: ProbabilityVector, forest_leaf: [f32; 4]) -> Self {
            let trees: Vec<_> = (0..4)
                .map(|class| {
                    let right = if class == 0 { 1.0 } else { 0.0 };
                    json!({
                        "class": class,
                        "nodes": [
                            {"type": "split", "feature": 0, "threshold": 0.0, "left": 1, "right": 2},
                            {"type": "leaf", "values": [0.0]},
                            {"type": "leaf", "values": [right]}
                        ]
                    })
                })
                .collect();
            let boosted = json!({
                "kind": "gradient_boosting",
                "n_features": 2,
                "n_classes": 4,
                "trees": trees
            });
            let forest = json!({
                "kind": "random_forest",
                "n_features": 2,
                "n_classes": 4,
                "trees": [{"nodes": [{"type": "leaf", "values": forest_leaf}]}]
            });
            Self {
                calls: AtomicUsize::new(0),
                classifier,
                ensembles: EnsemblePair {
                    boosted: TreeEnsemble::from_json(&boosted.to_string()).unwrap(),
                    forest: TreeEnsemble::from_json(&forest.to_string()).unwrap(),
                },
            }
        }
    }

    impl FeatureSource for FakeSource {
        fn classifier_probs(&self, _tensor: &ImageTensor) -> Result<ProbabilityVector, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.classifier)
        }

        fn extract_latent(&self, tensor: &ImageTensor) -> Result<LatentVector, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Array1::from(vec![tensor.mean().unwrap_or(0.0), 1.0]))
        }

        fn ensembles(&self) -> &EnsemblePair {
            &self.ensembles
        }
    }

    pub(crate) fn png_bytes(color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(32, 32, Rgb(color));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn predictor(source: FakeSource) -> Predictor<FakeSource> {
        Predictor::new(Arc::new(source), &PipelineConfig::default())
    }

    #[test]
    fn test_full_pipeline_with_fake_stages() {
        let predictor = predictor(FakeSource::new(
            ProbabilityVector::new([0.0, 0.0, 0.0, 1.0]),
            [0.0, 0.0, 0.0, 1.0],
        ));
        let out = predictor.predict(&png_bytes([200, 200, 200])).unwrap();
        assert_eq!(out.class, TumorClass::Pituitary);
        let total: f32 = out.distribution.iter().map(|(_, p)| p).sum();
        assert!((total - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_same_bytes_same_result() {
        let predictor = predictor(FakeSource::new(
            ProbabilityVector::new([0.3, 0.2, 0.4, 0.1]),
            [1.0, 1.0, 1.0, 1.0],
        ));
        let bytes = png_bytes([10, 120, 240]);
        let first = predictor.predict(&bytes).unwrap();
        let second = predictor.predict(&bytes).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_decode_error_skips_models() {
        let source = Arc::new(FakeSource::new(
            ProbabilityVector::new([0.25; 4]),
            [1.0, 0.0, 0.0, 0.0],
        ));
        let predictor = Predictor::new(Arc::clone(&source), &PipelineConfig::default());
        let err = predictor.predict(b"garbage").unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ImageDecode(ImageDecodeError::Decode(_))
        ));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_low_confidence_no_tumor_advisory() {
        // Bright image: caffe mean is positive, boosted margins tilt to glioma.
        let predictor = predictor(FakeSource::new(
            ProbabilityVector::new([0.2, 0.1, 0.7, 0.0]),
            [0.2, 0.2, 0.4, 0.2],
        ));
        let out = predictor.predict(&png_bytes([250, 250, 250])).unwrap();
        assert_eq!(out.class, TumorClass::NoTumor);
        assert!(out.confidence < 60.0);
        assert!(out.advisory.is_some());
    }
}
