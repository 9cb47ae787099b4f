use super::batcher::{ImageBatch, ImageBatcher};
use super::dataset::{CharacterDataset, Sample};
use super::network::CharCrnn;
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataloader::Dataset;
use burn::module::AutodiffModule;
use burn::nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

pub const DEFAULT_EPOCHS: usize = 20;
pub const DEFAULT_BATCH_SIZE: usize = 128;
/// Trailing fraction of the provided samples reserved for validation.
pub const VALIDATION_FRACTION: f64 = 0.2;
pub const INITIAL_LEARNING_RATE: f64 = 1e-3;
/// Epochs without validation improvement before training stops.
pub const EARLY_STOPPING_PATIENCE: usize = 5;
/// Epochs without validation improvement before the learning rate shrinks.
pub const PLATEAU_PATIENCE: usize = 5;
pub const PLATEAU_FACTOR: f64 = 0.2;

#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("Training error: {0}")]
    InvalidOptions(&'static str),
    #[error(
        "Training error: not enough samples for a 20% validation split \
         (training: {training}, validation: {validation})"
    )]
    NotEnoughSamples { training: usize, validation: usize },
}

#[derive(Clone, Debug)]
pub struct TrainOptions {
    pub epochs: usize,
    pub batch_size: usize,
}

impl Default for TrainOptions {
    fn default() -> Self {
        TrainOptions {
            epochs: DEFAULT_EPOCHS,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Metrics for one completed epoch.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    pub loss: f32,
    pub accuracy: f32,
    pub val_loss: f32,
    pub val_accuracy: f32,
}

/// Ordered per-epoch metrics, append-only while training runs.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
}

/// Progress notification emitted after each completed epoch. This is the
/// only integration point with whatever surface is watching the run.
#[derive(Clone, Debug)]
pub struct ProgressEvent {
    pub epoch_index: usize,
    pub total_epochs: usize,
    pub loss: f32,
    pub accuracy: f32,
    pub val_loss: f32,
    pub val_accuracy: f32,
}

/// Early stopping on validation loss. Improvement resets the counter;
/// a full patience window without improvement requests a stop.
struct EarlyStopping {
    best: f32,
    wait: usize,
    patience: usize,
}

impl EarlyStopping {
    fn new(patience: usize) -> Self {
        EarlyStopping {
            best: f32::INFINITY,
            wait: 0,
            patience,
        }
    }

    /// Returns true when this epoch improved on the best seen loss.
    fn observe(&mut self, val_loss: f32) -> bool {
        if val_loss < self.best {
            self.best = val_loss;
            self.wait = 0;
            true
        } else {
            self.wait += 1;
            false
        }
    }

    fn should_stop(&self) -> bool {
        self.wait >= self.patience
    }

    fn best(&self) -> f32 {
        self.best
    }
}

/// Learning-rate reduction on plateau: after a patience window without
/// improvement the rate shrinks by a fixed factor and the window restarts.
struct PlateauSchedule {
    best: f32,
    wait: usize,
    patience: usize,
    factor: f64,
}

impl PlateauSchedule {
    fn new(patience: usize, factor: f64) -> Self {
        PlateauSchedule {
            best: f32::INFINITY,
            wait: 0,
            patience,
            factor,
        }
    }

    /// Feed one epoch's validation loss, returning the rate to use next.
    fn observe(&mut self, val_loss: f32, learning_rate: f64) -> f64 {
        if val_loss < self.best {
            self.best = val_loss;
            self.wait = 0;
            return learning_rate;
        }

        self.wait += 1;
        if self.wait >= self.patience {
            self.wait = 0;
            let reduced = learning_rate * self.factor;
            tracing::info!(
                learning_rate = reduced,
                "Validation loss plateau detected, reducing learning rate"
            );
            return reduced;
        }

        learning_rate
    }
}

/// Average of accumulated per-batch losses; zero when nothing ran.
fn compute_average_loss(total_loss: f32, num_batches: usize) -> f32 {
    if num_batches > 0 {
        total_loss / num_batches as f32
    } else {
        0.0
    }
}

fn compute_accuracy(correct: usize, total: usize) -> f32 {
    if total > 0 {
        correct as f32 / total as f32
    } else {
        0.0
    }
}

/// Number of rows whose highest score matches the target class.
fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let predictions: Tensor<B, 1, Int> = logits.argmax(1).squeeze(1);
    predictions
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize
}

/// Run a single batch through forward, backward, and the optimizer step.
/// Returns the updated model, the batch loss, and the correct count.
fn process_training_batch<B, O>(
    model: CharCrnn<B>,
    optimizer: &mut O,
    loss_fn: &CrossEntropyLoss<B>,
    batch: ImageBatch<B>,
    learning_rate: f64,
) -> (CharCrnn<B>, f32, usize)
where
    B: AutodiffBackend,
    O: Optimizer<CharCrnn<B>, B>,
{
    let logits = model.forward(batch.images);
    let correct = count_correct(logits.clone(), batch.targets.clone());

    let loss = loss_fn.forward(logits, batch.targets);

    // Extract the scalar before backward to avoid keeping the loss tensor.
    let loss_value = loss.clone().into_scalar().elem::<f32>();

    let grads = loss.backward();
    let grads_params = GradientsParams::from_grads(grads, &model);
    let updated_model = optimizer.step(learning_rate, model, grads_params);

    (updated_model, loss_value, correct)
}

fn run_training_epoch<B, O>(
    dataset: &impl Dataset<Sample>,
    batcher: &ImageBatcher<B>,
    device: &B::Device,
    model: CharCrnn<B>,
    optimizer: &mut O,
    loss_fn: &CrossEntropyLoss<B>,
    batch_size: usize,
    learning_rate: f64,
) -> (CharCrnn<B>, f32, f32)
where
    B: AutodiffBackend,
    O: Optimizer<CharCrnn<B>, B>,
{
    let mut current_model = model;
    let mut total_loss = 0.0;
    let mut num_batches = 0;
    let mut correct = 0;
    let mut seen = 0;
    let dataset_len = dataset.len();

    for start_index in (0..dataset_len).step_by(batch_size) {
        let end_index = (start_index + batch_size).min(dataset_len);
        let items: Vec<_> = (start_index..end_index)
            .filter_map(|index| dataset.get(index))
            .collect();

        if items.is_empty() {
            continue;
        }

        let batch_len = items.len();
        let batch = batcher.batch(items, device);

        let (updated_model, loss_value, batch_correct) =
            process_training_batch(current_model, optimizer, loss_fn, batch, learning_rate);
        current_model = updated_model;

        total_loss += loss_value;
        num_batches += 1;
        correct += batch_correct;
        seen += batch_len;
    }

    let avg_loss = compute_average_loss(total_loss, num_batches);
    let accuracy = compute_accuracy(correct, seen);
    (current_model, avg_loss, accuracy)
}

fn run_validation_epoch<B: Backend>(
    dataset: &impl Dataset<Sample>,
    batcher: &ImageBatcher<B>,
    device: &B::Device,
    model: &CharCrnn<B>,
    loss_fn: &CrossEntropyLoss<B>,
    batch_size: usize,
) -> (f32, f32) {
    let mut total_loss = 0.0;
    let mut num_batches = 0;
    let mut correct = 0;
    let mut seen = 0;
    let dataset_len = dataset.len();

    for start_index in (0..dataset_len).step_by(batch_size) {
        let end_index = (start_index + batch_size).min(dataset_len);
        let items: Vec<_> = (start_index..end_index)
            .filter_map(|index| dataset.get(index))
            .collect();

        if items.is_empty() {
            continue;
        }

        let batch_len = items.len();
        let batch = batcher.batch(items, device);

        let logits = model.forward(batch.images);
        correct += count_correct(logits.clone(), batch.targets.clone());
        let loss_value = loss_fn
            .forward(logits, batch.targets)
            .into_scalar()
            .elem::<f32>();

        total_loss += loss_value;
        num_batches += 1;
        seen += batch_len;
    }

    (
        compute_average_loss(total_loss, num_batches),
        compute_accuracy(correct, seen),
    )
}

/// Fit the model on the given samples, reporting progress after every
/// epoch through `on_epoch`.
///
/// Two termination policies watch the validation loss concurrently: early
/// stopping restores the best-seen weights after a patience window, and a
/// plateau schedule shrinks the learning rate on the same signal. The
/// returned history is only produced by a run that completed or stopped
/// early on purpose; an error discards all partial progress.
pub fn train<B: AutodiffBackend>(
    device: &B::Device,
    mut model: CharCrnn<B>,
    dataset: &CharacterDataset,
    options: &TrainOptions,
    mut on_epoch: impl FnMut(&ProgressEvent),
) -> Result<(CharCrnn<B>, TrainingHistory), TrainingError> {
    if options.epochs == 0 {
        return Err(TrainingError::InvalidOptions("epochs must be greater than 0"));
    }
    if options.batch_size == 0 {
        return Err(TrainingError::InvalidOptions(
            "batch_size must be greater than 0",
        ));
    }

    let (dataset_training, dataset_validation) = dataset.split_validation(VALIDATION_FRACTION);
    if dataset_training.is_empty() || dataset_validation.is_empty() {
        return Err(TrainingError::NotEnoughSamples {
            training: dataset_training.len(),
            validation: dataset_validation.len(),
        });
    }

    let mut optimizer = AdamConfig::new().init();
    let batcher_train = ImageBatcher::<B>::new();
    let batcher_valid = ImageBatcher::<B::InnerBackend>::new();
    let loss_train: CrossEntropyLoss<B> = CrossEntropyLossConfig::new().init(device);
    let loss_valid: CrossEntropyLoss<B::InnerBackend> =
        CrossEntropyLossConfig::new().init(device);

    let mut learning_rate = INITIAL_LEARNING_RATE;
    let mut early_stopping = EarlyStopping::new(EARLY_STOPPING_PATIENCE);
    let mut plateau = PlateauSchedule::new(PLATEAU_PATIENCE, PLATEAU_FACTOR);
    let mut best_model: Option<CharCrnn<B>> = None;
    let mut history = TrainingHistory::default();

    for epoch in 0..options.epochs {
        let (updated_model, loss, accuracy) = run_training_epoch(
            &dataset_training,
            &batcher_train,
            device,
            model,
            &mut optimizer,
            &loss_train,
            options.batch_size,
            learning_rate,
        );
        model = updated_model;

        let valid_model = model.valid();
        let (val_loss, val_accuracy) = run_validation_epoch(
            &dataset_validation,
            &batcher_valid,
            device,
            &valid_model,
            &loss_valid,
            options.batch_size,
        );

        if early_stopping.observe(val_loss) {
            best_model = Some(model.clone());
        }
        learning_rate = plateau.observe(val_loss, learning_rate);

        history.epochs.push(EpochMetrics {
            loss,
            accuracy,
            val_loss,
            val_accuracy,
        });

        tracing::info!(
            epoch = epoch + 1,
            total_epochs = options.epochs,
            loss = loss,
            accuracy = accuracy,
            val_loss = val_loss,
            val_accuracy = val_accuracy,
            "Epoch completed",
        );

        on_epoch(&ProgressEvent {
            epoch_index: epoch,
            total_epochs: options.epochs,
            loss,
            accuracy,
            val_loss,
            val_accuracy,
        });

        if early_stopping.should_stop() {
            tracing::info!(
                epoch = epoch + 1,
                best_val_loss = early_stopping.best(),
                "Early stopping triggered, restoring best weights",
            );
            if let Some(best) = best_model.take() {
                model = best;
            }
            break;
        }
    }

    Ok((model, history))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend as TrainBackend;
    use crate::core::loader::PIXELS_PER_IMAGE;
    use crate::core::network::{CharCrnn, NetworkConfig};

    #[test]
    fn test_early_stopping_triggers_after_patience_window() {
        let mut stopping = EarlyStopping::new(3);
        assert!(stopping.observe(1.0));
        assert!(!stopping.observe(1.5));
        assert!(!stopping.observe(1.5));
        assert!(!stopping.should_stop());
        assert!(!stopping.observe(1.5));
        assert!(stopping.should_stop());
        assert_eq!(stopping.best(), 1.0);
    }

    #[test]
    fn test_early_stopping_resets_on_improvement() {
        let mut stopping = EarlyStopping::new(2);
        stopping.observe(1.0);
        stopping.observe(1.2);
        assert!(stopping.observe(0.9));
        assert!(!stopping.should_stop());
    }

    #[test]
    fn test_plateau_reduces_rate_and_restarts_window() {
        let mut plateau = PlateauSchedule::new(2, 0.2);
        let mut rate = 1e-3;

        rate = plateau.observe(1.0, rate);
        assert_eq!(rate, 1e-3);

        rate = plateau.observe(1.4, rate);
        assert_eq!(rate, 1e-3);
        rate = plateau.observe(1.4, rate);
        assert!((rate - 2e-4).abs() < 1e-12);

        // The window restarts after a reduction.
        rate = plateau.observe(1.4, rate);
        assert!((rate - 2e-4).abs() < 1e-12);
    }

    #[test]
    fn test_average_loss_guards_empty_runs() {
        assert_eq!(compute_average_loss(0.0, 0), 0.0);
        assert_eq!(compute_average_loss(6.0, 3), 2.0);
    }

    fn tiny_dataset(count: usize) -> CharacterDataset {
        let samples = (0..count)
            .map(|index| Sample {
                pixels: vec![(index % 7) as f32 / 7.0; PIXELS_PER_IMAGE],
                label: (index % 28) as i64,
            })
            .collect();
        CharacterDataset::new(samples)
    }

    #[test]
    fn test_train_produces_one_metrics_entry_per_epoch() {
        let device = Default::default();
        let config = NetworkConfig::new(false);
        let model = CharCrnn::<TrainBackend>::new(&config, &device);

        let options = TrainOptions {
            epochs: 2,
            batch_size: 4,
        };
        let mut events = Vec::new();
        let (_trained, history) = train(&device, model, &tiny_dataset(10), &options, |event| {
            events.push(event.clone())
        })
        .expect("training failed");

        assert_eq!(history.epochs.len(), 2);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].epoch_index, 0);
        assert_eq!(events[0].total_epochs, 2);
        for metrics in &history.epochs {
            assert!(metrics.loss.is_finite());
            assert!((0.0..=1.0).contains(&metrics.accuracy));
            assert!(metrics.val_loss.is_finite());
            assert!((0.0..=1.0).contains(&metrics.val_accuracy));
        }
    }

    #[test]
    fn test_train_rejects_datasets_too_small_to_split() {
        let device = Default::default();
        let config = NetworkConfig::new(false);
        let model = CharCrnn::<TrainBackend>::new(&config, &device);

        let result = train(
            &device,
            model,
            &tiny_dataset(1),
            &TrainOptions::default(),
            |_| {},
        );
        assert!(matches!(
            result,
            Err(TrainingError::NotEnoughSamples { .. })
        ));
    }

    #[test]
    fn test_train_rejects_zero_epochs() {
        let device = Default::default();
        let config = NetworkConfig::new(false);
        let model = CharCrnn::<TrainBackend>::new(&config, &device);

        let options = TrainOptions {
            epochs: 0,
            batch_size: 4,
        };
        let result = train(&device, model, &tiny_dataset(10), &options, |_| {});
        assert!(matches!(result, Err(TrainingError::InvalidOptions(_))));
    }
}
