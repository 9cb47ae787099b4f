use super::batcher::ImageBatcher;
use super::dataset::{CharacterDataset, Sample};
use super::network::CharCrnn;
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataloader::Dataset;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("Cannot evaluate an empty dataset")]
    EmptyDataset,
}

/// Loss and accuracy of a model over a labeled test set.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TestMetrics {
    pub loss: f32,
    pub accuracy: f32,
}

/// Score the model over the test samples with batched forward passes.
pub fn evaluate<B: Backend>(
    model: &CharCrnn<B>,
    device: &B::Device,
    dataset: &CharacterDataset,
    batch_size: usize,
) -> Result<TestMetrics, EvaluationError> {
    let dataset_len = dataset.len();
    if dataset_len == 0 || batch_size == 0 {
        return Err(EvaluationError::EmptyDataset);
    }

    let batcher = ImageBatcher::<B>::new();
    let loss_fn = CrossEntropyLossConfig::new().init(device);

    let mut total_loss = 0.0;
    let mut num_batches = 0;
    let mut correct = 0;
    let mut seen = 0;

    for start_index in (0..dataset_len).step_by(batch_size) {
        let end_index = (start_index + batch_size).min(dataset_len);
        let items: Vec<Sample> = (start_index..end_index)
            .filter_map(|index| dataset.get(index))
            .collect();

        if items.is_empty() {
            continue;
        }

        let batch_len = items.len();
        let batch = batcher.batch(items, device);

        let logits = model.forward(batch.images);
        let predictions: Tensor<B, 1, Int> = logits.clone().argmax(1).squeeze(1);
        correct += predictions
            .equal(batch.targets.clone())
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>() as usize;

        total_loss += loss_fn
            .forward(logits, batch.targets)
            .into_scalar()
            .elem::<f32>();
        num_batches += 1;
        seen += batch_len;
    }

    Ok(TestMetrics {
        loss: total_loss / num_batches as f32,
        accuracy: correct as f32 / seen as f32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InnerBackend;
    use crate::core::loader::PIXELS_PER_IMAGE;
    use crate::core::network::{CharCrnn, NetworkConfig};

    fn labeled_dataset(count: usize) -> CharacterDataset {
        let samples = (0..count)
            .map(|index| Sample {
                pixels: vec![0.25; PIXELS_PER_IMAGE],
                label: (index % 28) as i64,
            })
            .collect();
        CharacterDataset::new(samples)
    }

    #[test]
    fn test_metrics_are_finite_and_bounded() {
        let device = Default::default();
        let config = NetworkConfig::new(false);
        let model = CharCrnn::<InnerBackend>::new(&config, &device);

        let metrics = evaluate(&model, &device, &labeled_dataset(6), 4).expect("evaluate failed");
        assert!(metrics.loss.is_finite());
        assert!(metrics.loss > 0.0);
        assert!((0.0..=1.0).contains(&metrics.accuracy));
    }

    #[test]
    fn test_empty_dataset_is_rejected() {
        let device = Default::default();
        let config = NetworkConfig::new(false);
        let model = CharCrnn::<InnerBackend>::new(&config, &device);

        let result = evaluate(&model, &device, &labeled_dataset(0), 4);
        assert!(matches!(result, Err(EvaluationError::EmptyDataset)));
    }
}
