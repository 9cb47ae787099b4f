use super::dataset::Sample;
use super::loader::{IMAGE_SIDE, PIXELS_PER_IMAGE};
use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;

/// A batch of shaped images, ready for the model.
///
/// The batcher's responsibility is to convert a Vec of samples into the
/// stacked tensors the network consumes.
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// Stacked images: shape [batch_size, 1, 32, 32, 1]
    pub images: Tensor<B, 5>,
    /// Class labels: shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

#[derive(Clone, Debug)]
pub struct ImageBatcher<B: Backend> {
    _phantom: core::marker::PhantomData<B>,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new() -> Self {
        Self {
            _phantom: core::marker::PhantomData,
        }
    }
}

impl<B: Backend> Default for ImageBatcher<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Batcher<B, Sample, ImageBatch<B>> for ImageBatcher<B> {
    /// Convert a Vec of samples into stacked tensors.
    ///
    /// Every sample carries exactly 1024 pixels, so the flat buffer can be
    /// preallocated and reshaped without bounds checks per element.
    fn batch(&self, items: Vec<Sample>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        assert!(batch_size > 0, "Cannot create a batch from an empty Vec");

        let mut all_pixels = Vec::with_capacity(batch_size * PIXELS_PER_IMAGE);
        let mut all_targets = Vec::with_capacity(batch_size);

        for item in items.iter() {
            all_pixels.extend_from_slice(&item.pixels);
            all_targets.push(item.label);
        }

        let images = Tensor::<B, 5>::from_data(
            TensorData::new(all_pixels, [batch_size, 1, IMAGE_SIDE, IMAGE_SIDE, 1]),
            device,
        );

        let targets = Tensor::<B, 1, Int>::from_data(
            TensorData::new(all_targets, [batch_size]),
            device,
        );

        ImageBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InnerBackend;

    #[test]
    fn test_batch_has_five_dimensional_image_tensor() {
        let device = Default::default();
        let batcher = ImageBatcher::<InnerBackend>::new();

        let items: Vec<Sample> = (0..3)
            .map(|index| Sample {
                pixels: vec![0.5; PIXELS_PER_IMAGE],
                label: index,
            })
            .collect();

        let batch = batcher.batch(items, &device);
        assert_eq!(batch.images.dims(), [3, 1, 32, 32, 1]);
        assert_eq!(batch.targets.dims(), [3]);

        let targets = batch.targets.to_data().to_vec::<i64>().expect("targets");
        assert_eq!(targets, vec![0, 1, 2]);
    }
}
