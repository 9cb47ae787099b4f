use burn::module::AutodiffModule;
use clap::{Parser, Subcommand};
use harfnet::backend::{default_device, Backend, InnerBackend};
use harfnet::config::RuntimeConfig;
use harfnet::core::artifact;
use harfnet::core::dataset::CharacterDataset;
use harfnet::core::evaluate;
use harfnet::core::loader::{self, Upload};
use harfnet::core::network::{self, NetworkConfig};
use harfnet::core::predict;
use harfnet::core::train::{self, ProgressEvent, TrainOptions};
use harfnet::report;
use harfnet::session::Session;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "harfnet", about = "Handwritten Arabic character recognition")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a classifier from feature and label tables
    Train {
        /// Headerless CSV with 1024 pixel columns per row
        features: PathBuf,
        /// Headerless CSV with one label in [1,28] per row
        labels: PathBuf,
        /// Add the self-attention stage after the recurrent layer
        #[arg(long)]
        attention: bool,
        #[arg(long, default_value = "20")]
        epochs: usize,
        #[arg(long, default_value = "128")]
        batch_size: usize,
        /// Where to write the model bundle; defaults to MODEL_SAVE_DIR/model.tar.gz
        #[arg(long)]
        model_out: Option<PathBuf>,
    },
    /// Evaluate a trained model bundle against a labeled test set
    Test {
        model: PathBuf,
        features: PathBuf,
        labels: PathBuf,
        #[arg(long, default_value = "128")]
        batch_size: usize,
    },
    /// Classify a single character image
    Predict { model: PathBuf, image: PathBuf },
    /// Run the full session: train, optionally test, report and predict
    Pipeline {
        features: PathBuf,
        labels: PathBuf,
        #[arg(long)]
        attention: bool,
        #[arg(long, default_value = "20")]
        epochs: usize,
        #[arg(long, default_value = "128")]
        batch_size: usize,
        #[arg(long)]
        test_features: Option<PathBuf>,
        #[arg(long)]
        test_labels: Option<PathBuf>,
        /// Image to classify with the freshly trained model
        #[arg(long)]
        image: Option<PathBuf>,
        /// Where to write the results archive
        #[arg(long)]
        report_out: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .pretty()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = RuntimeConfig::from_env()?;
    let cli = Cli::parse();

    match cli.command {
        Command::Train {
            features,
            labels,
            attention,
            epochs,
            batch_size,
            model_out,
        } => cmd_train(
            &config, &features, &labels, attention, epochs, batch_size, model_out,
        ),
        Command::Test {
            model,
            features,
            labels,
            batch_size,
        } => cmd_test(&config, &model, &features, &labels, batch_size),
        Command::Predict { model, image } => cmd_predict(&config, &model, &image),
        Command::Pipeline {
            features,
            labels,
            attention,
            epochs,
            batch_size,
            test_features,
            test_labels,
            image,
            report_out,
        } => cmd_pipeline(
            &config,
            &features,
            &labels,
            attention,
            epochs,
            batch_size,
            test_features,
            test_labels,
            image,
            report_out,
        ),
    }
}

fn load_dataset(
    config: &RuntimeConfig,
    features: &PathBuf,
    labels: &PathBuf,
) -> anyhow::Result<CharacterDataset> {
    let features = Upload::from_path(features)?;
    let labels = Upload::from_path(labels)?;
    let samples = loader::load(Some(&features), Some(&labels), config.max_upload_bytes)?;
    Ok(CharacterDataset::new(samples))
}

fn print_progress(event: &ProgressEvent) {
    println!(
        "Epoch {}/{} - Loss: {:.4}, Acc: {:.4}, Val Loss: {:.4}, Val Acc: {:.4}",
        event.epoch_index + 1,
        event.total_epochs,
        event.loss,
        event.accuracy,
        event.val_loss,
        event.val_accuracy,
    );
}

fn cmd_train(
    config: &RuntimeConfig,
    features: &PathBuf,
    labels: &PathBuf,
    attention: bool,
    epochs: usize,
    batch_size: usize,
    model_out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let device = default_device(config);
    let dataset = load_dataset(config, features, labels)?;

    let network = NetworkConfig::new(attention);
    let model = network::build::<Backend>(&network, &device, &config.model_save_dir)?;

    let options = TrainOptions { epochs, batch_size };
    let (model, history) = train::train(&device, model, &dataset, &options, print_progress)?;

    let model_path = model_out.unwrap_or_else(|| config.model_save_dir.join("model.tar.gz"));
    artifact::save(&model, &network, &model_path)?;

    let history_path = model_path.with_extension("history.json");
    std::fs::write(&history_path, serde_json::to_vec_pretty(&history)?)?;

    tracing::info!(
        model = %model_path.display(),
        history = %history_path.display(),
        "Training complete"
    );
    Ok(())
}

fn cmd_test(
    config: &RuntimeConfig,
    model: &PathBuf,
    features: &PathBuf,
    labels: &PathBuf,
    batch_size: usize,
) -> anyhow::Result<()> {
    let device = default_device(config);
    let (model, _network) = artifact::load::<InnerBackend>(model, &device)?;
    let dataset = load_dataset(config, features, labels)?;

    let metrics = evaluate::evaluate(&model, &device, &dataset, batch_size)?;
    println!("Test Accuracy: {:.2}%", metrics.accuracy * 100.0);
    println!("Test Loss: {:.4}", metrics.loss);
    Ok(())
}

fn cmd_predict(config: &RuntimeConfig, model: &PathBuf, image: &PathBuf) -> anyhow::Result<()> {
    let device = default_device(config);
    let (model, _network) = artifact::load::<InnerBackend>(model, &device)?;

    let bytes = std::fs::read(image)?;
    let prediction = predict::predict(&model, &device, &bytes)?;

    println!("Predicted: {}", prediction.glyph());
    println!("Confidence: {:.2}%", prediction.confidence * 100.0);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_pipeline(
    config: &RuntimeConfig,
    features: &PathBuf,
    labels: &PathBuf,
    attention: bool,
    epochs: usize,
    batch_size: usize,
    test_features: Option<PathBuf>,
    test_labels: Option<PathBuf>,
    image: Option<PathBuf>,
    report_out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let device = default_device(config);
    let mut session = Session::<Backend>::new();

    let dataset = load_dataset(config, features, labels)?;
    let network = NetworkConfig::new(attention);
    let model = network::build::<Backend>(&network, &device, &config.model_save_dir)?;

    let options = TrainOptions { epochs, batch_size };
    let (model, history) = train::train(&device, model, &dataset, &options, print_progress)?;

    // The bundle lives as long as the session and is cleaned up with it.
    let model_path = config
        .model_save_dir
        .join(format!("harfnet-session-{}.tar.gz", std::process::id()));
    artifact::save(&model, &network, &model_path)?;
    session.track_artifact(&model_path);
    session.replace_model(model, network, history);
    tracing::info!(model = %model_path.display(), "Training complete");

    if let (Some(test_features), Some(test_labels)) = (test_features, test_labels) {
        let test_dataset = load_dataset(config, &test_features, &test_labels)?;
        let metrics = {
            let (model, _) = session
                .model()
                .ok_or_else(|| anyhow::anyhow!("no trained model in session"))?;
            evaluate::evaluate(&model.valid(), &device, &test_dataset, batch_size)?
        };
        println!("Test Accuracy: {:.2}%", metrics.accuracy * 100.0);
        println!("Test Loss: {:.4}", metrics.loss);
        session.set_test_metrics(metrics);
    }

    if let Some(report_out) = report_out {
        let metrics = session.test_metrics();
        let history = session
            .history()
            .ok_or_else(|| anyhow::anyhow!("no training history in session"))?;
        report::export(history, metrics.as_ref(), &report_out)?;
        println!("Results archive written to {}", report_out.display());
    }

    if let Some(image) = image {
        let bytes = std::fs::read(&image)?;
        let prediction = {
            let (model, _) = session
                .model()
                .ok_or_else(|| anyhow::anyhow!("no trained model in session"))?;
            predict::predict(&model.valid(), &device, &bytes)?
        };
        println!("Predicted: {}", prediction.glyph());
        println!("Confidence: {:.2}%", prediction.confidence * 100.0);
    }

    if let Err(err) = session.clear() {
        tracing::warn!(error = %err, "Session cleanup reported failures");
    }
    Ok(())
}
