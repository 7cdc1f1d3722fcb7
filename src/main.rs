use anyhow::{Context, Result};
use cellseg::segmentation::Connectivity;
use cellseg::{
    CancelToken, ExternalClassifier, ForegroundSource, Input, PipelineConfig, PipelineEvent,
    RunOptions, SamplerConfig, SegmentationParams,
};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input video file, or a directory of still images
    input: PathBuf,

    /// Output directory (cleared before the run)
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// Image format for extracted frames and masks
    #[arg(long, default_value = "jpg")]
    format: String,

    /// Also write each instance label map as <frame>_labels.png
    #[arg(long)]
    labels: bool,

    /// Seconds between sampled video frames
    #[arg(long, default_value_t = 1.0)]
    interval: f64,

    /// External classifier to run between extraction and segmentation,
    /// started in the directory holding the frames
    #[arg(long)]
    classifier: Option<String>,

    /// Argument passed to the classifier (repeatable)
    #[arg(long = "classifier-arg", allow_hyphen_values = true)]
    classifier_args: Vec<String>,

    /// Directory of externally produced foreground masks, named like the frames
    /// If not provided, foreground comes from Otsu thresholding
    #[arg(long)]
    masks: Option<PathBuf>,

    /// Side of the square structuring element
    #[arg(long, default_value_t = 4)]
    kernel_size: usize,

    /// Dilation passes for the sure-background region
    #[arg(long, default_value_t = 3)]
    dilate_iterations: usize,

    /// Fraction of peak distance a pixel needs to become a seed
    #[arg(long, default_value_t = 0.3)]
    seed_ratio: f32,

    /// Seed labelling connectivity (4 or 8)
    #[arg(long, default_value = "8", value_parser = parse_connectivity)]
    label_connectivity: Connectivity,

    /// Watershed flood connectivity (4 or 8)
    #[arg(long, default_value = "4", value_parser = parse_connectivity)]
    flood_connectivity: Connectivity,

    /// Segmentation worker threads [default: number of CPUs]
    #[arg(long)]
    workers: Option<usize>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn parse_connectivity(value: &str) -> Result<Connectivity, String> {
    match value {
        "4" => Ok(Connectivity::Four),
        "8" => Ok(Connectivity::Eight),
        other => Err(format!("expected 4 or 8, got {other}")),
    }
}

impl Args {
    fn run_options(&self) -> RunOptions {
        let mut options = RunOptions::new(Input::detect(&self.input), &self.output_dir);
        options.extension = self.format.clone();
        options.write_labels = self.labels;
        options.sampler = SamplerConfig {
            interval_secs: self.interval,
        };
        options.classifier = self.classifier.as_ref().map(|program| {
            ExternalClassifier::new(program).args(self.classifier_args.iter().cloned())
        });
        options.foreground = match &self.masks {
            Some(dir) => ForegroundSource::External(dir.clone()),
            None => ForegroundSource::Threshold,
        };
        options.params = SegmentationParams {
            kernel_size: self.kernel_size,
            dilate_iterations: self.dilate_iterations,
            foreground_ratio: self.seed_ratio,
            label_connectivity: self.label_connectivity,
            flood_connectivity: self.flood_connectivity,
            ..SegmentationParams::default()
        };
        if let Some(workers) = self.workers {
            options.config = PipelineConfig {
                workers,
                queue_depth: workers * 2,
            };
        }
        options
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("cellseg starting");
    tracing::info!("Input: {}", args.input.display());
    tracing::info!("Output: {}", args.output_dir.display());

    let options = args.run_options();
    let started = Instant::now();

    let summary = cellseg::run(&options, &mut report, &CancelToken::new())
        .context("Segmentation run failed")?;

    tracing::info!(
        "Done in {:.1}s: {} frames segmented, {} skipped, results in {}",
        started.elapsed().as_secs_f64(),
        summary.processed,
        summary.skipped.len(),
        summary.output
    );
    for skipped in &summary.skipped {
        tracing::info!("  skipped {} ({}): {}", skipped.id, skipped.stage, skipped.reason);
    }

    Ok(())
}

fn report(event: PipelineEvent) {
    match event {
        PipelineEvent::StageStarted(stage) => tracing::info!("Stage {} started", stage),
        PipelineEvent::StageFinished {
            stage,
            processed,
            skipped,
        } => tracing::info!(
            "Stage {} finished: {} processed, {} skipped",
            stage,
            processed,
            skipped
        ),
        PipelineEvent::FrameExtracted { name, .. } => tracing::debug!("Extracted {}", name),
        PipelineEvent::FrameSegmented { name, regions, .. } => {
            tracing::debug!("Segmented {} into {} cells", name, regions)
        }
        PipelineEvent::FrameSkipped { .. } => {}
        PipelineEvent::HandoffUnavailable { reason } => {
            tracing::warn!("Classifier unavailable, continuing: {}", reason)
        }
    }
}
