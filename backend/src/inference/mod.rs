pub mod bundle;
pub mod error;
pub mod features;
pub mod formatter;
pub mod fusion;
pub mod network;
pub mod predictor;
pub mod preprocess;
pub mod scaler;
pub mod trees;
pub mod types;

pub use bundle::{EnsemblePair, ModelBundle};
pub use error::{FeatureShapeError, ImageDecodeError, ModelLoadError, PipelineError};
pub use formatter::{FormattedPrediction, LowConfidenceAdvisory};
pub use fusion::{FUSION_WEIGHTS, FusedPrediction, FusionWeights};
pub use predictor::{FeatureSource, Predictor};
pub use types::{ImageTensor, LatentVector, ProbabilityVector};
