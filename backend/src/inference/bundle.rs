use lazy_static::lazy_static;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tch::Device;

use super::error::ModelLoadError;
use super::network::{LayerView, Network};
use super::scaler::StandardScaler;
use super::trees::{EnsembleKind, TreeEnsemble};
use crate::config::{ClassifierOutput, ModelsConfig, PipelineConfig};
use shared::NUM_CLASSES;

lazy_static! {
    static ref BUNDLE: Mutex<Option<Arc<ModelBundle>>> = Mutex::new(None);
}

/// The two tree-based predictors that consume the latent vector.
#[derive(Debug, Clone)]
pub struct EnsemblePair {
    pub boosted: TreeEnsemble,
    pub forest: TreeEnsemble,
}

/// Everything inference needs, loaded once and shared read-only.
pub struct ModelBundle {
    pub(crate) classifier: Network,
    pub(crate) feature_extractor: LayerView,
    pub(crate) autoencoder: Network,
    pub(crate) encoder: LayerView,
    pub(crate) scaler: StandardScaler,
    pub(crate) ensembles: EnsemblePair,
    pub(crate) classifier_output: ClassifierOutput,
    pub(crate) bottleneck_width: usize,
    pub(crate) latent_width: usize,
    pub(crate) image_size: u32,
}

#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub classifier: PathBuf,
    pub autoencoder: PathBuf,
    pub scaler: PathBuf,
    pub boosted_trees: PathBuf,
    pub random_forest: PathBuf,
}

impl ArtifactPaths {
    pub fn from_config(models: &ModelsConfig) -> Self {
        Self {
            classifier: models.artifact_path(&models.classifier),
            autoencoder: models.artifact_path(&models.autoencoder),
            scaler: models.artifact_path(&models.scaler),
            boosted_trees: models.artifact_path(&models.boosted_trees),
            random_forest: models.artifact_path(&models.random_forest),
        }
    }

    /// Fails on the first missing file before any artifact is parsed.
    pub fn verify(&self) -> Result<(), ModelLoadError> {
        let entries = [
            ("classifier", &self.classifier),
            ("autoencoder", &self.autoencoder),
            ("scaler", &self.scaler),
            ("boosted_trees", &self.boosted_trees),
            ("random_forest", &self.random_forest),
        ];
        for (name, path) in entries {
            if !path.is_file() {
                return Err(ModelLoadError::MissingArtifact {
                    name,
                    path: path.clone(),
                });
            }
        }
        Ok(())
    }
}

impl ModelBundle {
    pub fn load_from(config: &PipelineConfig) -> Result<Self, ModelLoadError> {
        let models = &config.models;
        let paths = ArtifactPaths::from_config(models);
        paths.verify()?;

        let device = Device::cuda_if_available();
        log::info!("Loading model bundle from {} on {:?}", models.dir.display(), device);

        let classifier = Network::load("classifier", &paths.classifier, device)?;
        let feature_extractor = classifier.view(&models.bottleneck_layer);
        let autoencoder = Network::load("autoencoder", &paths.autoencoder, device)?;
        let encoder = autoencoder.view(&models.latent_layer);
        let scaler = StandardScaler::load(&paths.scaler)?;
        let boosted = TreeEnsemble::load(&paths.boosted_trees, EnsembleKind::GradientBoosting)?;
        let forest = TreeEnsemble::load(&paths.random_forest, EnsembleKind::RandomForest)?;

        let bundle = Self {
            classifier,
            feature_extractor,
            autoencoder,
            encoder,
            scaler,
            ensembles: EnsemblePair { boosted, forest },
            classifier_output: models.classifier_output,
            bottleneck_width: models.bottleneck_width,
            latent_width: models.latent_width,
            image_size: config.image.size,
        };
        bundle.check_compatibility(&paths)?;
        log::info!("Model bundle ready");
        Ok(bundle)
    }

    /// Probes every stage with zeros so shape mismatches between artifacts
    /// surface at startup instead of on the first request.
    fn check_compatibility(&self, paths: &ArtifactPaths) -> Result<(), ModelLoadError> {
        let side = self.image_size as i64;
        let image_shape = [1, side, side, 3];
        let bottleneck_shape = [1, self.bottleneck_width as i64];

        let classes = self
            .classifier
            .probe_width(&image_shape)
            .map_err(|e| ModelLoadError::Corrupt {
                path: paths.classifier.clone(),
                reason: e.to_string(),
            })?;
        expect_width("classifier output", classes, NUM_CLASSES)?;

        let bottleneck = self
            .feature_extractor
            .probe_width(&image_shape)
            .map_err(|e| ModelLoadError::MissingLayer {
                model: "classifier",
                layer: self.feature_extractor.layer().to_string(),
                reason: e.to_string(),
            })?;
        expect_width("bottleneck layer", bottleneck, self.bottleneck_width)?;

        let reconstruction = self
            .autoencoder
            .probe_width(&bottleneck_shape)
            .map_err(|e| ModelLoadError::Corrupt {
                path: paths.autoencoder.clone(),
                reason: e.to_string(),
            })?;
        expect_width("autoencoder reconstruction", reconstruction, self.bottleneck_width)?;

        let latent = self
            .encoder
            .probe_width(&bottleneck_shape)
            .map_err(|e| ModelLoadError::MissingLayer {
                model: "autoencoder",
                layer: self.encoder.layer().to_string(),
                reason: e.to_string(),
            })?;
        expect_width("latent layer", latent, self.latent_width)?;

        log::info!(
            "Probed widths: classes={} bottleneck={} reconstruction={} latent={}",
            classes,
            bottleneck,
            reconstruction,
            latent
        );

        expect_width("scaler", self.scaler.n_features(), self.bottleneck_width)?;
        for ensemble in [&self.ensembles.boosted, &self.ensembles.forest] {
            expect_width(ensemble.kind().stage(), ensemble.n_features(), self.latent_width)?;
        }
        Ok(())
    }

    pub fn ensembles(&self) -> &EnsemblePair {
        &self.ensembles
    }
}

fn expect_width(what: &str, actual: usize, expected: usize) -> Result<(), ModelLoadError> {
    if actual != expected {
        return Err(ModelLoadError::Incompatible(format!(
            "{} has width {}, expected {}",
            what, actual, expected
        )));
    }
    Ok(())
}

/// Returns the process-wide bundle, loading it on first use. Concurrent
/// callers wait for the first load. A failed load is not cached.
pub fn load(config: &PipelineConfig) -> Result<Arc<ModelBundle>, ModelLoadError> {
    let mut slot = BUNDLE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(bundle) = slot.as_ref() {
        return Ok(Arc::clone(bundle));
    }
    let bundle = Arc::new(ModelBundle::load_from(config)?);
    *slot = Some(Arc::clone(&bundle));
    Ok(bundle)
}

pub fn is_loaded() -> bool {
    BUNDLE
        .lock()
        .map(|slot| slot.is_some())
        .unwrap_or(false)
}
