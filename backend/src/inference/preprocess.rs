use image::{RgbImage, imageops};
use ndarray::Array4;

use super::error::ImageDecodeError;
use super::types::ImageTensor;
use crate::config::{ImageConfig, Normalization};

pub const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024;

/// ImageNet channel means in BGR order.
const CAFFE_BGR_MEAN: [f32; 3] = [103.939, 116.779, 123.68];

/// Decodes any supported format and forces three-channel RGB. Grayscale is
/// replicated across channels and alpha is dropped.
pub fn decode(image_data: &[u8]) -> Result<RgbImage, ImageDecodeError> {
    if image_data.is_empty() {
        return Err(ImageDecodeError::Empty);
    }
    if image_data.len() > MAX_IMAGE_BYTES {
        return Err(ImageDecodeError::TooLarge(image_data.len()));
    }
    let img = image::load_from_memory(image_data)?;
    Ok(img.to_rgb8())
}

pub fn preprocess(image_data: &[u8], config: &ImageConfig) -> Result<ImageTensor, ImageDecodeError> {
    let rgb = decode(image_data)?;
    log::debug!("Decoded {}x{} image", rgb.width(), rgb.height());
    preprocess_rgb(&rgb, config)
}

pub fn preprocess_rgb(image: &RgbImage, config: &ImageConfig) -> Result<ImageTensor, ImageDecodeError> {
    let size = config.size;
    if size == 0 || image.width() == 0 || image.height() == 0 {
        return Err(ImageDecodeError::Layout(format!(
            "cannot map {}x{} image to {}x{}",
            image.width(),
            image.height(),
            size,
            size
        )));
    }

    let resized = if image.dimensions() == (size, size) {
        image.clone()
    } else {
        imageops::resize(image, size, size, config.resize_filter.into())
    };

    let side = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, side, side, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let [r, g, b] = pixel.0.map(f32::from);
        let channels = match config.normalization {
            Normalization::Caffe => [
                b - CAFFE_BGR_MEAN[0],
                g - CAFFE_BGR_MEAN[1],
                r - CAFFE_BGR_MEAN[2],
            ],
            Normalization::UnitRange => [r / 255.0, g / 255.0, b / 255.0],
        };
        for (c, value) in channels.into_iter().enumerate() {
            tensor[[0, y as usize, x as usize, c]] = value;
        }
    }
    Ok(tensor)
}
