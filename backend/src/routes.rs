use actix_multipart::{Field, Multipart};
use actix_web::{Error, HttpResponse, web};
use futures::{StreamExt, TryStreamExt};
use log::{error, info};
use sha2::{Digest, Sha256};
use shared::{
    ClassesResponse, ErrorResponse, HealthResponse, PredictResponse, Prediction, PredictionResult,
};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::inference::bundle;
use crate::inference::{FUSION_WEIGHTS, FeatureSource, ImageDecodeError, Predictor};

/// Caps on what a single predict request may buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_image_bytes: usize,
    pub max_parts: usize,
}

impl From<&ServerConfig> for UploadLimits {
    fn from(server: &ServerConfig) -> Self {
        Self {
            max_image_bytes: server.max_image_bytes,
            max_parts: server.max_parts,
        }
    }
}

enum Upload {
    Image(Vec<u8>),
    TooLarge(usize),
}

pub fn configure_routes<S: FeatureSource + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/predict").route(web::post().to(handle_predict::<S>)))
        .service(web::resource("/api/classes").route(web::get().to(get_classes::<S>)))
        .service(web::resource("/api/health").route(web::get().to(health)));
}

pub fn calculate_image_hash(image_data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image_data);
    hex::encode(hasher.finalize())
}

/// Reads one part, buffering at most `limit` bytes. Anything past the limit
/// is counted and discarded.
async fn read_part(field: &mut Field, limit: usize) -> Result<Upload, Error> {
    let mut image_data = Vec::new();
    let mut total = 0usize;
    while let Some(chunk) = field.next().await {
        let chunk = chunk?;
        total = total.saturating_add(chunk.len());
        if total <= limit {
            image_data.extend_from_slice(&chunk);
        } else if !image_data.is_empty() {
            image_data = Vec::new();
        }
    }
    if total > limit {
        Ok(Upload::TooLarge(total))
    } else {
        Ok(Upload::Image(image_data))
    }
}

async fn handle_predict<S: FeatureSource + 'static>(
    predictor: web::Data<Predictor<S>>,
    limits: web::Data<UploadLimits>,
    mut payload: Multipart,
) -> Result<HttpResponse, Error> {
    let mut uploads: Vec<(Option<String>, Upload)> = Vec::new();
    let mut parts = 0usize;

    while let Some(mut field) = payload.try_next().await? {
        parts += 1;
        if parts > limits.max_parts {
            error!("Rejected upload with more than {} parts", limits.max_parts);
            return Ok(HttpResponse::PayloadTooLarge().json(ErrorResponse {
                error: format!("At most {} parts per request", limits.max_parts),
            }));
        }
        let file_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string);
        match read_part(&mut field, limits.max_image_bytes).await? {
            Upload::Image(image_data) if image_data.is_empty() => {}
            upload => uploads.push((file_name, upload)),
        }
    }

    if uploads.is_empty() {
        return Ok(HttpResponse::BadRequest().json(ErrorResponse {
            error: "No image provided".into(),
        }));
    }

    let mut results = Vec::with_capacity(uploads.len());
    for (file_name, upload) in uploads {
        let id = Uuid::new_v4();
        let image_data = match upload {
            Upload::Image(image_data) => image_data,
            Upload::TooLarge(size) => {
                let e = ImageDecodeError::TooLarge(size);
                error!("Prediction failed for {}: {}", id, e);
                results.push(PredictionResult {
                    id,
                    file_name,
                    image_sha256: None,
                    prediction: None,
                    error: Some(e.to_string()),
                });
                continue;
            }
        };
        let image_sha256 = Some(calculate_image_hash(&image_data));
        let predictor = predictor.clone();

        let outcome = web::block(move || predictor.predict(&image_data)).await;
        let (prediction, error) = match outcome {
            Ok(Ok(formatted)) => (Some(Prediction::from(formatted)), None),
            Ok(Err(e)) => {
                error!("Prediction failed for {}: {}", id, e);
                (None, Some(e.to_string()))
            }
            Err(e) => {
                error!("Prediction task for {} did not complete: {}", id, e);
                (None, Some("Prediction task failed".to_string()))
            }
        };

        results.push(PredictionResult {
            id,
            file_name,
            image_sha256,
            prediction,
            error,
        });
    }

    info!("Processed {} image(s)", results.len());
    Ok(HttpResponse::Ok().json(PredictResponse { results }))
}

async fn get_classes<S: FeatureSource + 'static>(
    predictor: web::Data<Predictor<S>>,
) -> HttpResponse {
    let classes = predictor.classes();
    HttpResponse::Ok().json(ClassesResponse {
        classes: classes.classes().to_vec(),
        labels: classes.labels(),
    })
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        bundle_loaded: bundle::is_loaded(),
        fusion_weights: FUSION_WEIGHTS.as_array(),
    })
}
