use ndarray::Array1;
use tch::{Device, Tensor};

use super::bundle::ModelBundle;
use super::error::{FeatureShapeError, PipelineError};
use super::network;
use super::types::{ImageTensor, LatentVector, ProbabilityVector};
use crate::config::ClassifierOutput;

fn image_input(tensor: &ImageTensor, device: Device) -> Result<Tensor, PipelineError> {
    let data = tensor
        .as_slice()
        .ok_or(PipelineError::TensorLayout("image tensor is not contiguous"))?;
    let shape: Vec<i64> = tensor.shape().iter().map(|&d| d as i64).collect();
    network::to_tensor(data, &shape, device)
}

/// Class distribution from the classifier's own head.
pub fn classifier_probs(
    tensor: &ImageTensor,
    bundle: &ModelBundle,
) -> Result<ProbabilityVector, PipelineError> {
    let input = image_input(tensor, bundle.classifier.device())?;
    let output = network::to_vec(&bundle.classifier.forward(&input)?)?;
    let probs = ProbabilityVector::from_slice("classifier", &output)?;
    Ok(match bundle.classifier_output {
        ClassifierOutput::Probabilities => probs,
        ClassifierOutput::Logits => ProbabilityVector::softmax(probs.values()),
    })
}

/// Bottleneck features, standardized, then compressed by the encoder.
pub fn extract_latent(
    tensor: &ImageTensor,
    bundle: &ModelBundle,
) -> Result<LatentVector, PipelineError> {
    let input = image_input(tensor, bundle.classifier.device())?;
    let features = Array1::from(network::to_vec(&bundle.feature_extractor.forward(&input)?)?);
    let scaled = bundle.scaler.transform(features.view())?;

    let scaled_values = scaled.to_vec();
    let encoder_input = network::to_tensor(
        &scaled_values,
        &[1, scaled_values.len() as i64],
        bundle.autoencoder.device(),
    )?;
    let latent = network::to_vec(&bundle.encoder.forward(&encoder_input)?)?;
    if latent.len() != bundle.latent_width {
        return Err(FeatureShapeError {
            stage: "encoder",
            expected: bundle.latent_width,
            actual: latent.len(),
        }
        .into());
    }
    log::debug!("Extracted latent vector of width {}", latent.len());
    Ok(Array1::from(latent))
}
