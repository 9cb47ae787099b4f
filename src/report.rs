use crate::core::artifact::append_entry;
use crate::core::evaluate::TestMetrics;
use crate::core::train::TrainingHistory;
use flate2::write::GzEncoder;
use flate2::Compression;
use plotters::prelude::*;
use std::fs::File;
use std::path::Path;
use tar::Builder;

const PLOT_ENTRY: &str = "training_metrics.png";
const RESULTS_ENTRY: &str = "test_results.txt";

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("No training results available")]
    NoHistory,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not render metrics plot: {0}")]
    Plot(String),
}

/// Export the run's results as a compressed archive holding the metric
/// curves and, when the model was evaluated, a plain-text summary.
pub fn export(
    history: &TrainingHistory,
    test_metrics: Option<&TestMetrics>,
    path: &Path,
) -> Result<(), ReportError> {
    if history.epochs.is_empty() {
        return Err(ReportError::NoHistory);
    }

    let plot_path = std::env::temp_dir().join(format!(
        "harfnet-metrics-{}-{}.png",
        std::process::id(),
        history.epochs.len()
    ));
    render_curves(history, &plot_path)?;
    let plot_bytes = std::fs::read(&plot_path)?;
    if let Err(err) = std::fs::remove_file(&plot_path) {
        tracing::warn!(
            path = %plot_path.display(),
            error = %err,
            "Could not remove intermediate plot file"
        );
    }

    let file = File::create(path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);

    append_entry(&mut builder, PLOT_ENTRY, &plot_bytes)?;

    if let Some(metrics) = test_metrics {
        let text = format!(
            "Test Loss: {:.4}\nTest Accuracy: {:.4}",
            metrics.loss, metrics.accuracy
        );
        append_entry(&mut builder, RESULTS_ENTRY, text.as_bytes())?;
    }

    builder.into_inner()?.finish()?;
    tracing::info!(path = %path.display(), "Report exported");
    Ok(())
}

/// Loss and accuracy curves side by side, one line per split.
fn render_curves(history: &TrainingHistory, path: &Path) -> Result<(), ReportError> {
    let epochs = history.epochs.len();
    let x_max = epochs.max(2) as f32 - 1.0;

    let root = BitMapBackend::new(path, (1200, 400)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;
    let panels = root.split_evenly((1, 2));

    let max_loss = history
        .epochs
        .iter()
        .map(|metrics| metrics.loss.max(metrics.val_loss))
        .fold(0.0f32, f32::max)
        .max(1e-6)
        * 1.05;

    let mut loss_chart = ChartBuilder::on(&panels[0])
        .margin(20)
        .caption("Loss Curve", ("sans-serif", 20))
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(0f32..x_max, 0f32..max_loss)
        .map_err(plot_error)?;
    loss_chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("epoch")
        .draw()
        .map_err(plot_error)?;
    loss_chart
        .draw_series(LineSeries::new(
            history
                .epochs
                .iter()
                .enumerate()
                .map(|(index, metrics)| (index as f32, metrics.loss)),
            &BLUE,
        ))
        .map_err(plot_error)?
        .label("Train Loss")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));
    loss_chart
        .draw_series(LineSeries::new(
            history
                .epochs
                .iter()
                .enumerate()
                .map(|(index, metrics)| (index as f32, metrics.val_loss)),
            &RED,
        ))
        .map_err(plot_error)?
        .label("Val Loss")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));
    loss_chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(plot_error)?;

    let mut accuracy_chart = ChartBuilder::on(&panels[1])
        .margin(20)
        .caption("Accuracy Curve", ("sans-serif", 20))
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(0f32..x_max, 0f32..1.05f32)
        .map_err(plot_error)?;
    accuracy_chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("epoch")
        .draw()
        .map_err(plot_error)?;
    accuracy_chart
        .draw_series(LineSeries::new(
            history
                .epochs
                .iter()
                .enumerate()
                .map(|(index, metrics)| (index as f32, metrics.accuracy)),
            &BLUE,
        ))
        .map_err(plot_error)?
        .label("Train Acc")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));
    accuracy_chart
        .draw_series(LineSeries::new(
            history
                .epochs
                .iter()
                .enumerate()
                .map(|(index, metrics)| (index as f32, metrics.val_accuracy)),
            &RED,
        ))
        .map_err(plot_error)?
        .label("Val Acc")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));
    accuracy_chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(plot_error)?;

    root.present().map_err(plot_error)?;
    Ok(())
}

fn plot_error<E: std::fmt::Display>(err: E) -> ReportError {
    ReportError::Plot(err.to_string())
}
