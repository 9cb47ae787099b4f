use super::batcher::ImageBatcher;
use super::dataset::Sample;
use super::loader::NUM_CLASSES;
use super::network::CharCrnn;
use super::normalize::{self, ImageProcessingError};
use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use image::GrayImage;

/// The 28 Arabic character glyphs, indexed by class.
pub const CHARACTERS: [&str; 28] = [
    "أ", "ب", "ت", "ث", "ج", "ح", "خ", "د", "ذ", "ر", "ز", "س", "ش", "ص", "ض", "ط", "ظ", "ع",
    "غ", "ف", "ق", "ك", "ل", "م", "ن", "ه", "و", "ي",
];

#[derive(Debug, thiserror::Error)]
pub enum PredictionError {
    #[error(transparent)]
    Image(#[from] ImageProcessingError),
    #[error("Prediction error: model produced {got} probabilities, expected {expected}")]
    OutputWidth { got: usize, expected: usize },
    #[error("Prediction error: could not read model output: {0}")]
    Output(String),
}

/// The outcome of classifying a single image.
#[derive(Clone, Debug)]
pub struct Prediction {
    /// Zero-indexed class in [0,27].
    pub class_index: usize,
    /// Probability of the winning class, in [0,1].
    pub confidence: f32,
    /// The normalized 32x32 grayscale image, for display.
    pub image: GrayImage,
}

impl Prediction {
    pub fn glyph(&self) -> &'static str {
        CHARACTERS[self.class_index]
    }
}

/// Classify a single raw image with a trained model.
///
/// The image goes through the same normalization as any inference input;
/// a normalization failure propagates with no partial result.
pub fn predict<B: Backend>(
    model: &CharCrnn<B>,
    device: &B::Device,
    image_bytes: &[u8],
) -> Result<Prediction, PredictionError> {
    let normalized = normalize::normalize(image_bytes)?;

    let sample = Sample {
        pixels: normalized.pixels,
        // Placeholder, targets are unused at inference.
        label: 0,
    };
    let batcher = ImageBatcher::<B>::new();
    let batch = batcher.batch(vec![sample], device);

    let probabilities = model
        .forward_probabilities(batch.images)
        .into_data()
        .to_vec::<f32>()
        .map_err(|err| PredictionError::Output(format!("{:?}", err)))?;

    if probabilities.len() != NUM_CLASSES {
        return Err(PredictionError::OutputWidth {
            got: probabilities.len(),
            expected: NUM_CLASSES,
        });
    }

    let (class_index, confidence) = top_class(&probabilities).ok_or_else(|| {
        PredictionError::OutputWidth {
            got: 0,
            expected: NUM_CLASSES,
        }
    })?;

    Ok(Prediction {
        class_index,
        confidence,
        image: normalized.preview,
    })
}

/// Index and value of the maximum probability. Ties break on the first
/// occurrence.
pub(crate) fn top_class(probabilities: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &value) in probabilities.iter().enumerate() {
        if best.map_or(true, |(_, best_value)| value > best_value) {
            best = Some((index, value));
        }
    }
    best
}
