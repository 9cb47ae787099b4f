use crate::core::loader::{IMAGE_SIDE, PIXELS_PER_IMAGE};
use image::imageops::FilterType;
use image::GrayImage;

#[derive(Debug, thiserror::Error)]
pub enum ImageProcessingError {
    #[error("Image processing error: {0}")]
    Decode(#[from] image::ImageError),
}

/// A single image shaped for the classifier: 1024 floats in [0,1].
#[derive(Clone, Debug)]
pub struct NormalizedImage {
    pub pixels: Vec<f32>,
    /// The 32x32 grayscale image before inversion, kept for display.
    pub preview: GrayImage,
}

/// Normalize an arbitrary input image into the classifier's input layout.
///
/// The intensity inversion and the row/column transpose match the
/// orientation convention of the training tables, which store strokes as
/// bright values over a dark background in column-major order. The bulk
/// CSV path intentionally performs neither step; changing either side
/// breaks inference on models trained with the other.
pub fn normalize(bytes: &[u8]) -> Result<NormalizedImage, ImageProcessingError> {
    let decoded = image::load_from_memory(bytes)?;
    let gray = decoded.to_luma8();
    let resized = image::imageops::resize(
        &gray,
        IMAGE_SIDE as u32,
        IMAGE_SIDE as u32,
        FilterType::Triangle,
    );

    let mut pixels = Vec::with_capacity(PIXELS_PER_IMAGE);
    for row in 0..IMAGE_SIDE {
        for column in 0..IMAGE_SIDE {
            // Transposed read: output (row, column) takes input (column, row).
            let value = resized.get_pixel(row as u32, column as u32).0[0];
            let inverted = 255 - value;
            pixels.push(inverted as f32 / 255.0);
        }
    }

    Ok(NormalizedImage {
        pixels,
        preview: resized,
    })
}

/// Normalize an already-decoded grayscale image. Used by tests and by
/// callers that hold a raster rather than an encoded file.
pub fn normalize_gray(gray: &GrayImage) -> NormalizedImage {
    let resized = image::imageops::resize(
        gray,
        IMAGE_SIDE as u32,
        IMAGE_SIDE as u32,
        FilterType::Triangle,
    );

    let mut pixels = Vec::with_capacity(PIXELS_PER_IMAGE);
    for row in 0..IMAGE_SIDE {
        for column in 0..IMAGE_SIDE {
            let value = resized.get_pixel(row as u32, column as u32).0[0];
            pixels.push((255 - value) as f32 / 255.0);
        }
    }

    NormalizedImage {
        pixels,
        preview: resized,
    }
}
