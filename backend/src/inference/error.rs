use std::path::PathBuf;

/// Startup failures. Any of these leaves the process without a bundle.
#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("Missing artifact {name} at {path}")]
    MissingArtifact { name: &'static str, path: PathBuf },
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Corrupt artifact {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("Model {model} has no layer named {layer}: {reason}")]
    MissingLayer {
        model: &'static str,
        layer: String,
        reason: String,
    },
    #[error("Incompatible artifacts: {0}")]
    Incompatible(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ImageDecodeError {
    #[error("Empty upload")]
    Empty,
    #[error("Upload too large: {0} bytes")]
    TooLarge(usize),
    #[error("Unreadable image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Tensor layout error: {0}")]
    Layout(String),
}

/// Width disagreement between a stage and the vector it was handed.
#[derive(Debug, thiserror::Error)]
#[error("{stage} expects {expected} features, got {actual}")]
pub struct FeatureShapeError {
    pub stage: &'static str,
    pub expected: usize,
    pub actual: usize,
}

/// Per-request failures, caught at the request boundary.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    ImageDecode(#[from] ImageDecodeError),
    #[error(transparent)]
    FeatureShape(#[from] FeatureShapeError),
    #[error("Model error: {0}")]
    Model(#[from] tch::TchError),
    #[error("Model handle poisoned: {0}")]
    Poisoned(&'static str),
    #[error("Tensor layout error: {0}")]
    TensorLayout(&'static str),
}
