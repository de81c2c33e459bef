use crate::inference::preprocess::MAX_IMAGE_BYTES;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use shared::{NUM_CLASSES, TumorClass};
use std::path::{Path, PathBuf};
use strum::IntoEnumIterator;

pub const DEFAULT_CONFIG_PATH: &str = "config/hdfnet.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {value}")]
    Override { key: &'static str, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub version: f32,
    pub models: ModelsConfig,
    pub image: ImageConfig,
    pub classes: ClassOrder,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub dir: PathBuf,
    pub classifier: String,
    pub autoencoder: String,
    pub scaler: String,
    pub boosted_trees: String,
    pub random_forest: String,
    pub bottleneck_layer: String,
    pub latent_layer: String,
    pub bottleneck_width: usize,
    pub latent_width: usize,
    pub classifier_output: ClassifierOutput,
}

/// What the classifier's final layer emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierOutput {
    Probabilities,
    Logits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub size: u32,
    pub resize_filter: ResizeFilter,
    pub normalization: Normalization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    Bilinear,
    CatmullRom,
    Lanczos3,
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Bilinear => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Pixel convention the classifier was trained under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// RGB to BGR, then ImageNet mean subtraction without scaling.
    Caffe,
    /// RGB kept, values divided by 255.
    UnitRange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest single upload buffered by the predict endpoint.
    pub max_image_bytes: usize,
    pub max_parts: usize,
}

/// Class-index order of the trained artifacts. Always a permutation of the
/// four classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<TumorClass>", into = "Vec<TumorClass>")]
pub struct ClassOrder([TumorClass; NUM_CLASSES]);

impl ClassOrder {
    pub fn class_at(&self, index: usize) -> TumorClass {
        self.0[index]
    }

    pub fn classes(&self) -> &[TumorClass; NUM_CLASSES] {
        &self.0
    }

    pub fn labels(&self) -> Vec<String> {
        self.0.iter().map(|c| c.to_string()).collect()
    }
}

impl Default for ClassOrder {
    fn default() -> Self {
        let mut classes = [TumorClass::Glioma; NUM_CLASSES];
        for (slot, class) in classes.iter_mut().zip(TumorClass::iter()) {
            *slot = class;
        }
        Self(classes)
    }
}

impl TryFrom<Vec<TumorClass>> for ClassOrder {
    type Error = String;

    fn try_from(classes: Vec<TumorClass>) -> Result<Self, Self::Error> {
        let order: [TumorClass; NUM_CLASSES] = classes
            .clone()
            .try_into()
            .map_err(|_| format!("expected {} classes, got {}", NUM_CLASSES, classes.len()))?;
        for class in TumorClass::iter() {
            if !order.contains(&class) {
                return Err(format!("class order is missing {:?}", class));
            }
        }
        Ok(Self(order))
    }
}

impl From<ClassOrder> for Vec<TumorClass> {
    fn from(order: ClassOrder) -> Self {
        order.0.to_vec()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: 1.0,
            models: ModelsConfig::default(),
            image: ImageConfig::default(),
            classes: ClassOrder::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("models"),
            classifier: "EnsembleNiT_cnn.pt".to_string(),
            autoencoder: "EnsembleNiT_cae.pt".to_string(),
            scaler: "EnsembleNiT_scaler.json".to_string(),
            boosted_trees: "EnsembleNiT_xgb.json".to_string(),
            random_forest: "EnsembleNiT_rf.json".to_string(),
            bottleneck_layer: "bottleneck".to_string(),
            latent_layer: "latent".to_string(),
            bottleneck_width: 256,
            latent_width: 32,
            classifier_output: ClassifierOutput::Probabilities,
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            size: 224,
            resize_filter: ResizeFilter::CatmullRom,
            normalization: Normalization::Caffe,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            max_image_bytes: MAX_IMAGE_BYTES,
            max_parts: 16,
        }
    }
}

impl PipelineConfig {
    /// Reads `HDFNET_CONFIG` (or the default path when it exists), then applies
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("HDFNET_CONFIG") {
            Ok(path) => Self::load_from_path(path)?,
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::load_from_path(DEFAULT_CONFIG_PATH)?
            }
            Err(_) => {
                log::warn!("No config file found, using built-in defaults");
                Self::default()
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loaded pipeline config from {}", path.display());
        Self::from_yaml_str(&config_str)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("HDFNET_MODELS_DIR") {
            self.models.dir = PathBuf::from(dir);
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::Override {
                key: "PORT",
                value: port.clone(),
            })?;
        }
        Ok(())
    }
}

impl ModelsConfig {
    pub fn artifact_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }
}
