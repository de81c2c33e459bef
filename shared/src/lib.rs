use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};
use uuid::Uuid;

pub const NUM_CLASSES: usize = 4;

/// Diagnostic categories the classifier was trained on.
///
/// Declaration order is the canonical class-index order (alphabetical, as the
/// training folders were enumerated). The order actually used at inference is
/// taken from the pipeline config and must match the trained artifacts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter, EnumString,
)]
#[serde(rename_all = "snake_case")]
pub enum TumorClass {
    #[strum(serialize = "glioma", to_string = "Glioma")]
    Glioma,
    #[strum(serialize = "meningioma", to_string = "Meningioma")]
    Meningioma,
    #[strum(serialize = "no_tumor", serialize = "notumor", to_string = "No Tumor")]
    #[serde(alias = "notumor")]
    NoTumor,
    #[strum(serialize = "pituitary", to_string = "Pituitary")]
    Pituitary,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ClassProbability {
    pub class: TumorClass,
    pub label: String,
    pub percent: f32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Prediction {
    pub class: TumorClass,
    pub label: String,
    pub confidence: f32,
    pub distribution: Vec<ClassProbability>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub advisory: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PredictionResult {
    pub id: Uuid,
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub image_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prediction: Option<Prediction>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PredictResponse {
    pub results: Vec<PredictionResult>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ClassesResponse {
    pub classes: Vec<TumorClass>,
    pub labels: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub bundle_loaded: bool,
    pub fusion_weights: [f32; 3],
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_class_display_names() {
        let labels: Vec<String> = TumorClass::iter().map(|c| c.to_string()).collect();
        assert_eq!(labels, vec!["Glioma", "Meningioma", "No Tumor", "Pituitary"]);
    }

    #[test]
    fn test_class_parses_folder_names() {
        assert_eq!(TumorClass::from_str("notumor").unwrap(), TumorClass::NoTumor);
        assert_eq!(TumorClass::from_str("no_tumor").unwrap(), TumorClass::NoTumor);
        assert_eq!(TumorClass::from_str("No Tumor").unwrap(), TumorClass::NoTumor);
        assert!(TumorClass::from_str("astrocytoma").is_err());
    }

    #[test]
    fn test_class_deserializes_folder_alias() {
        let classes: Vec<TumorClass> =
            serde_json::from_str(r#"["glioma", "notumor", "no_tumor"]"#).unwrap();
        assert_eq!(
            classes,
            vec![TumorClass::Glioma, TumorClass::NoTumor, TumorClass::NoTumor]
        );
    }

    #[test]
    fn test_prediction_omits_missing_advisory() {
        let prediction = Prediction {
            class: TumorClass::Glioma,
            label: "Glioma".into(),
            confidence: 91.5,
            distribution: vec![],
            advisory: None,
        };
        let json = serde_json::to_value(&prediction).unwrap();
        assert!(json.get("advisory").is_none());
        assert_eq!(json["class"], "glioma");
    }
}
