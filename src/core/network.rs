use super::artifact;
use super::loader::{IMAGE_SIDE, NUM_CLASSES};
use super::registry::{self, CollapseFrame, OpSpec};
use burn::nn;
use burn::nn::attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig};
use burn::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Filter widths of the three convolution blocks.
const CONV_WIDTHS: [usize; 3] = [32, 64, 128];
const DROPOUT_RATE: f64 = 0.3;
const LSTM_HIDDEN: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum ModelBuildError {
    #[error("Model save/load verification failed: {0}")]
    Verification(String),
    #[error("Rebuilt model produced output shape {got:?}, expected {expected:?}")]
    OutputShape { got: Vec<usize>, expected: Vec<usize> },
}

/// Topology parameters persisted alongside the weights.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    pub num_classes: usize,
    pub lstm_hidden: usize,
    pub use_attention: bool,
}

impl NetworkConfig {
    pub fn new(use_attention: bool) -> Self {
        NetworkConfig {
            num_classes: NUM_CLASSES,
            lstm_hidden: LSTM_HIDDEN,
            use_attention,
        }
    }

    /// Custom operations this topology depends on.
    pub fn custom_ops(&self) -> Vec<OpSpec> {
        vec![registry::COLLAPSE_LEADING.spec()]
    }
}

/// Convolutional-recurrent classifier over 32x32 character images.
///
/// Input is the shaped tensor [batch, 1, 32, 32, 1]. The frame axis is
/// collapsed, three convolution blocks extract an 8x8x128 feature map,
/// the map is read as a sequence of spatial steps for the LSTM, and a
/// dense head scores the 28 classes.
#[derive(Module, Debug)]
pub struct CharCrnn<B: Backend> {
    collapse: CollapseFrame,
    conv1: nn::conv::Conv2d<B>,
    norm1: nn::BatchNorm<B, 2>,
    pool1: nn::pool::MaxPool2d,
    conv2: nn::conv::Conv2d<B>,
    norm2: nn::BatchNorm<B, 2>,
    pool2: nn::pool::MaxPool2d,
    conv3: nn::conv::Conv2d<B>,
    norm3: nn::BatchNorm<B, 2>,
    drop3: nn::Dropout,
    lstm: nn::Lstm<B>,
    attention: Option<MultiHeadAttention<B>>,
    drop_state: nn::Dropout,
    head: nn::Linear<B>,
}

impl<B: Backend> CharCrnn<B> {
    pub fn new(config: &NetworkConfig, device: &B::Device) -> Self {
        // The collapse step comes from the custom-op registry so the
        // definition used here is the one a later load validates against.
        let collapse = (registry::COLLAPSE_LEADING.build)();

        let conv1 = nn::conv::Conv2dConfig::new([1, CONV_WIDTHS[0]], [3, 3])
            .with_padding(nn::PaddingConfig2d::Same)
            .init(device);
        let norm1 = nn::BatchNormConfig::new(CONV_WIDTHS[0]).init(device);
        let pool1 = nn::pool::MaxPool2dConfig::new([2, 2])
            .with_strides([2, 2])
            .init();

        let conv2 = nn::conv::Conv2dConfig::new([CONV_WIDTHS[0], CONV_WIDTHS[1]], [3, 3])
            .with_padding(nn::PaddingConfig2d::Same)
            .init(device);
        let norm2 = nn::BatchNormConfig::new(CONV_WIDTHS[1]).init(device);
        let pool2 = nn::pool::MaxPool2dConfig::new([2, 2])
            .with_strides([2, 2])
            .init();

        let conv3 = nn::conv::Conv2dConfig::new([CONV_WIDTHS[1], CONV_WIDTHS[2]], [3, 3])
            .with_padding(nn::PaddingConfig2d::Same)
            .init(device);
        let norm3 = nn::BatchNormConfig::new(CONV_WIDTHS[2]).init(device);
        let drop3 = nn::DropoutConfig::new(DROPOUT_RATE).init();

        // Two 2x2 pools halve the 32x32 input twice, leaving an 8x8 map.
        // One spatial axis becomes the sequence, the other folds into the
        // per-step features together with the channels.
        let steps_features = (IMAGE_SIDE / 4) * CONV_WIDTHS[2];
        let lstm = nn::LstmConfig::new(steps_features, config.lstm_hidden, true).init(device);

        let attention = config
            .use_attention
            .then(|| MultiHeadAttentionConfig::new(config.lstm_hidden, 1).init(device));
        let drop_state = nn::DropoutConfig::new(DROPOUT_RATE).init();

        let head_width = if config.use_attention {
            // Sequence output concatenated with the attention context.
            config.lstm_hidden * 2
        } else {
            config.lstm_hidden
        };
        let head = nn::LinearConfig::new(head_width, config.num_classes).init(device);

        Self {
            collapse,
            conv1,
            norm1,
            pool1,
            conv2,
            norm2,
            pool2,
            conv3,
            norm3,
            drop3,
            lstm,
            attention,
            drop_state,
            head,
        }
    }

    /// Forward pass producing unnormalized class scores.
    pub fn forward(&self, images: Tensor<B, 5>) -> Tensor<B, 2> {
        let x = self.collapse.forward(images);
        // Channels-last input, channels-first convolution layout.
        let x = x.permute([0, 3, 1, 2]);

        let x = self
            .pool1
            .forward(self.norm1.forward(burn::tensor::activation::relu(
                self.conv1.forward(x),
            )));
        let x = self
            .pool2
            .forward(self.norm2.forward(burn::tensor::activation::relu(
                self.conv2.forward(x),
            )));
        let x = self
            .drop3
            .forward(self.norm3.forward(burn::tensor::activation::relu(
                self.conv3.forward(x),
            )));

        // Read the feature map as a temporal sequence. The permute puts
        // the sequence axis first and keeps the (spatial, channel) order
        // of the flattened per-step features stable.
        let [batch, channels, height, width] = x.dims();
        let x = x
            .permute([0, 2, 3, 1])
            .reshape([batch, height, width * channels]);

        let (sequence, _state) = self.lstm.forward(x, None);

        let features: Tensor<B, 2> = match &self.attention {
            Some(attention) => {
                let context = attention
                    .forward(MhaInput::self_attn(sequence.clone()))
                    .context;
                let combined = Tensor::cat(vec![sequence, context], 2);
                combined.mean_dim(1).squeeze(1)
            }
            None => {
                let steps = sequence.dims()[1];
                let last = sequence.narrow(1, steps - 1, 1).squeeze(1);
                self.drop_state.forward(last)
            }
        };

        self.head.forward(features)
    }

    /// Class probabilities for inference.
    pub fn forward_probabilities(&self, images: Tensor<B, 5>) -> Tensor<B, 2> {
        burn::tensor::activation::softmax(self.forward(images), 1)
    }
}

/// Construct an untrained classifier and prove it survives a save/reload
/// cycle before handing it out.
///
/// A model that trains fine but cannot be reloaded is only discovered at
/// prediction time otherwise, so the roundtrip through the bundle format
/// (including the custom-op manifest) is part of the build contract.
pub fn build<B: Backend>(
    config: &NetworkConfig,
    device: &B::Device,
    scratch_dir: &Path,
) -> Result<CharCrnn<B>, ModelBuildError> {
    let model = CharCrnn::new(config, device);

    let probe = scratch_dir.join(format!("harfnet-build-check-{}.tar.gz", std::process::id()));
    let verified = verify_roundtrip(&model, config, device, &probe);

    if probe.exists() {
        if let Err(err) = std::fs::remove_file(&probe) {
            tracing::warn!(
                path = %probe.display(),
                error = %err,
                "Could not remove build verification file"
            );
        }
    }

    verified?;
    Ok(model)
}

fn verify_roundtrip<B: Backend>(
    model: &CharCrnn<B>,
    config: &NetworkConfig,
    device: &B::Device,
    probe: &Path,
) -> Result<(), ModelBuildError> {
    artifact::save(model, config, probe)
        .map_err(|err| ModelBuildError::Verification(err.to_string()))?;

    let (reloaded, _) = artifact::load::<B>(probe, device)
        .map_err(|err| ModelBuildError::Verification(err.to_string()))?;

    let output = reloaded.forward(Tensor::<B, 5>::zeros([1, 1, IMAGE_SIDE, IMAGE_SIDE, 1], device));
    let dims = output.dims();
    if dims != [1, config.num_classes] {
        return Err(ModelBuildError::OutputShape {
            got: dims.to_vec(),
            expected: vec![1, config.num_classes],
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InnerBackend;

    fn scratch_dir() -> std::path::PathBuf {
        std::env::temp_dir()
    }

    #[test]
    fn test_forward_scores_28_classes() {
        let device = Default::default();
        let config = NetworkConfig::new(false);
        let model = CharCrnn::<InnerBackend>::new(&config, &device);

        let input = Tensor::<InnerBackend, 5>::zeros([2, 1, 32, 32, 1], &device);
        let output = model.forward(input);
        assert_eq!(output.dims(), [2, 28]);
    }

    #[test]
    fn test_attention_variant_keeps_output_shape() {
        let device = Default::default();
        let config = NetworkConfig::new(true);
        let model = CharCrnn::<InnerBackend>::new(&config, &device);

        let input = Tensor::<InnerBackend, 5>::zeros([1, 1, 32, 32, 1], &device);
        let output = model.forward(input);
        assert_eq!(output.dims(), [1, 28]);
    }

    #[test]
    fn test_probabilities_form_a_distribution() {
        let device = Default::default();
        let config = NetworkConfig::new(false);
        let model = CharCrnn::<InnerBackend>::new(&config, &device);

        let input = Tensor::<InnerBackend, 5>::zeros([1, 1, 32, 32, 1], &device);
        let probabilities = model
            .forward_probabilities(input)
            .into_data()
            .to_vec::<f32>()
            .expect("probabilities");

        assert_eq!(probabilities.len(), 28);
        assert!(probabilities
            .iter()
            .all(|&value| (0.0..=1.0).contains(&value)));
        let total: f32 = probabilities.iter().sum();
        assert!((total - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_build_passes_roundtrip_self_check() {
        let device = Default::default();
        let config = NetworkConfig::new(false);
        let model = build::<InnerBackend>(&config, &device, &scratch_dir()).expect("build failed");

        let input = Tensor::<InnerBackend, 5>::zeros([1, 1, 32, 32, 1], &device);
        assert_eq!(model.forward(input).dims(), [1, 28]);
    }
}
