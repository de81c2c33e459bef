use ndarray::{Array1, ArrayView1};
use serde::Deserialize;
use std::path::Path;

use super::error::{FeatureShapeError, ModelLoadError};

#[derive(Debug, Deserialize)]
struct ScalerFile {
    n_features_in: usize,
    #[serde(default)]
    mean: Option<Vec<f32>>,
    #[serde(default)]
    scale: Option<Vec<f32>>,
}

/// Fitted per-feature standardization: `(x - mean) / scale`.
///
/// A missing mean or scale means the scaler was fitted with centering or
/// scaling disabled, and that half of the transform is skipped.
#[derive(Debug, Clone)]
pub struct StandardScaler {
    n_features: usize,
    mean: Option<Array1<f32>>,
    scale: Option<Array1<f32>>,
}

impl StandardScaler {
    pub fn new(
        n_features: usize,
        mean: Option<Vec<f32>>,
        scale: Option<Vec<f32>>,
    ) -> Result<Self, String> {
        if n_features == 0 {
            return Err("scaler has no features".to_string());
        }
        for (name, values) in [("mean", &mean), ("scale", &scale)] {
            if let Some(values) = values {
                if values.len() != n_features {
                    return Err(format!(
                        "{} has {} entries, expected {}",
                        name,
                        values.len(),
                        n_features
                    ));
                }
                if values.iter().any(|v| !v.is_finite()) {
                    return Err(format!("{} contains non-finite values", name));
                }
            }
        }
        if let Some(scale) = &scale {
            if scale.iter().any(|s| *s == 0.0) {
                return Err("scale contains zeros".to_string());
            }
        }
        Ok(Self {
            n_features,
            mean: mean.map(Array1::from),
            scale: scale.map(Array1::from),
        })
    }

    pub fn load(path: &Path) -> Result<Self, ModelLoadError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ModelLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ScalerFile = serde_json::from_str(&raw).map_err(|e| ModelLoadError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::new(file.n_features_in, file.mean, file.scale).map_err(|reason| {
            ModelLoadError::Corrupt {
                path: path.to_path_buf(),
                reason,
            }
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn transform(&self, features: ArrayView1<f32>) -> Result<Array1<f32>, FeatureShapeError> {
        if features.len() != self.n_features {
            return Err(FeatureShapeError {
                stage: "scaler",
                expected: self.n_features,
                actual: features.len(),
            });
        }
        let mut scaled = features.to_owned();
        if let Some(mean) = &self.mean {
            scaled -= mean;
        }
        if let Some(scale) = &self.scale {
            scaled /= scale;
        }
        Ok(scaled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::Write;

    #[test]
    fn test_transform_centers_and_scales() {
        let scaler =
            StandardScaler::new(3, Some(vec![1.0, 2.0, 3.0]), Some(vec![2.0, 0.5, 1.0])).unwrap();
        let out = scaler.transform(array![3.0, 2.0, 0.0].view()).unwrap();
        assert_eq!(out, array![1.0, 0.0, -3.0]);
    }

    #[test]
    fn test_transform_without_mean() {
        let scaler = StandardScaler::new(2, None, Some(vec![4.0, 2.0])).unwrap();
        let out = scaler.transform(array![8.0, 1.0].view()).unwrap();
        assert_eq!(out, array![2.0, 0.5]);
    }

    #[test]
    fn test_width_mismatch() {
        let scaler = StandardScaler::new(256, None, None).unwrap();
        let err = scaler.transform(array![1.0, 2.0].view()).unwrap_err();
        assert_eq!(err.stage, "scaler");
        assert_eq!(err.expected, 256);
        assert_eq!(err.actual, 2);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(StandardScaler::new(2, Some(vec![0.0]), None).is_err());
        assert!(StandardScaler::new(2, None, Some(vec![1.0, 0.0])).is_err());
        assert!(StandardScaler::new(0, None, None).is_err());
    }

    #[test]
    fn test_load_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"n_features_in": 2, "mean": [1.0, 1.0], "scale": null}}"#).unwrap();
        let scaler = StandardScaler::load(file.path()).unwrap();
        assert_eq!(scaler.n_features(), 2);
        assert_eq!(scaler.transform(array![2.0, 3.0].view()).unwrap(), array![1.0, 2.0]);
    }

    #[test]
    fn test_load_corrupt_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            StandardScaler::load(file.path()),
            Err(ModelLoadError::Corrupt { .. })
        ));
    }
}
