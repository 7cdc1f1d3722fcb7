//! Run orchestration.
//!
//! Frames come from a single producer thread through a bounded queue to a
//! pool of segmentation workers. Outcomes are put back into source order
//! before they reach the output sink, and everything a presentation layer
//! needs to know is reported as [`PipelineEvent`]s from the calling thread.

use crate::capture::{self, Frame, FrameSource, ImageDirectorySource, SamplerConfig};
use crate::error::{FrameError, HandoffError, PipelineError};
use crate::handoff::ExternalClassifier;
use crate::output::{prepare_output_dir, DirectoryOutput, OutputSink};
use crate::segmentation::{
    ForegroundSource, SegmentationParams, SegmentationResult, Segmenter, WatershedPipeline,
};
use crossbeam_channel::bounded;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag asking every stage to stop early
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Classify,
    Segment,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Extract => write!(f, "extract"),
            Stage::Classify => write!(f, "classify"),
            Stage::Segment => write!(f, "segment"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    StageStarted(Stage),
    StageFinished {
        stage: Stage,
        processed: usize,
        skipped: usize,
    },
    FrameExtracted {
        index: usize,
        name: String,
    },
    FrameSegmented {
        index: usize,
        name: String,
        regions: usize,
    },
    FrameSkipped {
        stage: Stage,
        id: String,
        reason: String,
    },
    /// The classifier could not be used; the run carries on without it
    HandoffUnavailable {
        reason: String,
    },
}

/// Receiver of progress events
///
/// Implemented for every `FnMut(PipelineEvent)`, so a closure forwarding into
/// a channel is enough to stream events to another thread.
pub trait ProgressSink {
    fn emit(&mut self, event: PipelineEvent);
}

impl<F: FnMut(PipelineEvent)> ProgressSink for F {
    fn emit(&mut self, event: PipelineEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFrame {
    pub stage: Stage,
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub extracted: usize,
    pub processed: usize,
    pub skipped: Vec<SkippedFrame>,
    pub output: String,
    pub cancelled: bool,
}

impl RunSummary {
    fn merge(&mut self, other: RunSummary) {
        self.extracted += other.extracted;
        self.processed += other.processed;
        self.skipped.extend(other.skipped);
        self.cancelled |= other.cancelled;
        if !other.output.is_empty() {
            self.output = other.output;
        }
    }

    fn skip<P: ProgressSink + ?Sized>(&mut self, progress: &mut P, stage: Stage, error: &FrameError) {
        let id = error.subject();
        let reason = format!("{error}");
        tracing::warn!("Skipping {} during {}: {}", id, stage, reason);
        progress.emit(PipelineEvent::FrameSkipped {
            stage,
            id: id.clone(),
            reason: reason.clone(),
        });
        self.skipped.push(SkippedFrame { stage, id, reason });
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Segmentation worker threads
    pub workers: usize,
    /// Frames buffered between the producer and the workers
    pub queue_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let workers = num_cpus::get().max(1);
        Self {
            workers,
            queue_depth: workers * 2,
        }
    }
}

/// Write every frame of `source` through `sink` unchanged
pub fn extract_frames<S, O, P>(
    source: &mut S,
    sink: &mut O,
    progress: &mut P,
    cancel: &CancelToken,
) -> RunSummary
where
    S: FrameSource + ?Sized,
    O: OutputSink + ?Sized,
    P: ProgressSink + ?Sized,
{
    let _span = tracing::info_span!("extract").entered();
    progress.emit(PipelineEvent::StageStarted(Stage::Extract));
    tracing::info!("Extracting frames from {}", source.describe());

    let mut summary = RunSummary {
        output: sink.location(),
        ..Default::default()
    };

    while !cancel.is_cancelled() {
        let Some(item) = source.next_frame() else {
            break;
        };
        match item {
            Ok(frame) => match sink.write_frame(&frame) {
                Ok(()) => {
                    summary.extracted += 1;
                    progress.emit(PipelineEvent::FrameExtracted {
                        index: frame.index,
                        name: frame.name,
                    });
                }
                Err(e) => {
                    let error = FrameError::Write {
                        name: frame.name,
                        reason: format!("{e:#}"),
                    };
                    summary.skip(progress, Stage::Extract, &error);
                }
            },
            Err(error) => summary.skip(progress, Stage::Extract, &error),
        }
    }

    summary.cancelled = cancel.is_cancelled();
    tracing::info!(
        "Extracted {} frames, skipped {}",
        summary.extracted,
        summary.skipped.len()
    );
    progress.emit(PipelineEvent::StageFinished {
        stage: Stage::Extract,
        processed: summary.extracted,
        skipped: summary.skipped.len(),
    });
    summary
}

enum Outcome {
    Segmented {
        name: String,
        result: SegmentationResult,
    },
    Failed(FrameError),
    Cancelled,
}

/// Segment every frame of `source` on a worker pool and write results in order
///
/// The source is drained on its own thread and dropped there once exhausted
/// or cancelled.
pub fn segment_frames<S, G, O, P>(
    source: S,
    segmenter: &G,
    sink: &mut O,
    config: &PipelineConfig,
    progress: &mut P,
    cancel: &CancelToken,
) -> Result<RunSummary, PipelineError>
where
    S: FrameSource,
    G: Segmenter,
    O: OutputSink + ?Sized,
    P: ProgressSink + ?Sized,
{
    let _span = tracing::info_span!("segment").entered();
    progress.emit(PipelineEvent::StageStarted(Stage::Segment));

    let workers = config.workers.max(1);
    let depth = config.queue_depth.max(1);
    tracing::info!(
        "Segmenting {} with {} workers",
        source.describe(),
        workers
    );

    let mut summary = RunSummary {
        output: sink.location(),
        ..Default::default()
    };

    std::thread::scope(|scope| -> Result<(), PipelineError> {
        let (job_tx, job_rx) = bounded::<(usize, Frame)>(depth);
        let (done_tx, done_rx) = bounded::<(usize, Outcome)>(depth);

        let producer_done = done_tx.clone();
        let producer = scope.spawn(move || {
            let mut source = source;
            let mut seq = 0usize;
            while !cancel.is_cancelled() {
                let Some(item) = source.next_frame() else {
                    break;
                };
                let sent = match item {
                    Ok(frame) => job_tx.send((seq, frame)).is_ok(),
                    Err(error) => producer_done.send((seq, Outcome::Failed(error))).is_ok(),
                };
                if !sent {
                    break;
                }
                seq += 1;
            }
            tracing::debug!("Producer done after {} frames", seq);
        });

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let jobs = job_rx.clone();
            let done = done_tx.clone();
            handles.push(scope.spawn(move || {
                for (seq, frame) in jobs.iter() {
                    let outcome = if cancel.is_cancelled() {
                        Outcome::Cancelled
                    } else {
                        match segmenter.segment(&frame) {
                            Ok(result) => Outcome::Segmented {
                                name: frame.name,
                                result,
                            },
                            Err(error) => Outcome::Failed(error),
                        }
                    };
                    if done.send((seq, outcome)).is_err() {
                        break;
                    }
                }
                tracing::debug!("Worker {} finished", worker);
            }));
        }
        drop(job_rx);
        drop(done_tx);

        // Sequence numbers are contiguous, so `next` always arrives eventually
        let mut pending = BTreeMap::new();
        let mut next = 0usize;
        for (seq, outcome) in done_rx.iter() {
            pending.insert(seq, outcome);
            while let Some(outcome) = pending.remove(&next) {
                deliver(outcome, sink, progress, &mut summary);
                next += 1;
            }
        }
        // Only non-empty if a thread died mid-frame
        for (_, outcome) in std::mem::take(&mut pending) {
            deliver(outcome, sink, progress, &mut summary);
        }

        producer.join().map_err(|_| PipelineError::WorkerPanicked)?;
        for handle in handles {
            handle.join().map_err(|_| PipelineError::WorkerPanicked)?;
        }
        Ok(())
    })?;

    summary.cancelled = cancel.is_cancelled();
    tracing::info!(
        "Segmented {} frames, skipped {}",
        summary.processed,
        summary.skipped.len()
    );
    progress.emit(PipelineEvent::StageFinished {
        stage: Stage::Segment,
        processed: summary.processed,
        skipped: summary.skipped.len(),
    });
    Ok(summary)
}

fn deliver<O, P>(outcome: Outcome, sink: &mut O, progress: &mut P, summary: &mut RunSummary)
where
    O: OutputSink + ?Sized,
    P: ProgressSink + ?Sized,
{
    match outcome {
        Outcome::Segmented { name, result } => match sink.write_result(&name, &result) {
            Ok(()) => {
                summary.processed += 1;
                progress.emit(PipelineEvent::FrameSegmented {
                    index: result.index,
                    name,
                    regions: result.region_count(),
                });
            }
            Err(e) => {
                let error = FrameError::Write {
                    name,
                    reason: format!("{e:#}"),
                };
                summary.skip(progress, Stage::Segment, &error);
            }
        },
        Outcome::Failed(error) => summary.skip(progress, Stage::Segment, &error),
        Outcome::Cancelled => {}
    }
}

/// What a run reads from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Video file, sampled once per interval
    Video(PathBuf),
    /// Directory of still images, segmented as they are
    Images(PathBuf),
}

impl Input {
    pub fn detect<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        if path.is_dir() {
            Input::Images(path)
        } else {
            Input::Video(path)
        }
    }
}

/// Everything needed for a full extract / classify / segment run
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input: Input,
    pub output_dir: PathBuf,
    /// Image format extension for extracted frames and masks
    pub extension: String,
    pub write_labels: bool,
    pub sampler: SamplerConfig,
    pub classifier: Option<ExternalClassifier>,
    pub foreground: ForegroundSource,
    pub params: SegmentationParams,
    pub config: PipelineConfig,
}

impl RunOptions {
    pub fn new(input: Input, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input,
            output_dir: output_dir.into(),
            extension: "jpg".to_string(),
            write_labels: false,
            sampler: SamplerConfig::default(),
            classifier: None,
            foreground: ForegroundSource::default(),
            params: SegmentationParams::default(),
            config: PipelineConfig::default(),
        }
    }
}

/// Full run: stage frames into a fresh output directory, optionally hand off
/// to the classifier, then overwrite each staged frame with its mask
///
/// Only failing to open the input or to prepare the output directory is
/// fatal; everything per frame is recorded in the summary.
pub fn run<P: ProgressSink + ?Sized>(
    options: &RunOptions,
    progress: &mut P,
    cancel: &CancelToken,
) -> Result<RunSummary, PipelineError> {
    let mut sink = DirectoryOutput::new(&options.output_dir, &options.extension)
        .map_err(|e| PipelineError::Config(format!("{e:#}")))?
        .with_label_maps(options.write_labels);
    let mut summary = RunSummary::default();

    let staged = match &options.input {
        Input::Video(path) => {
            let mut video = capture::open_video(path, options.sampler)?;
            prepare_output_dir(&options.output_dir)?;
            summary.merge(extract_frames(&mut video, &mut sink, progress, cancel));
            options.output_dir.clone()
        }
        Input::Images(dir) => {
            if same_directory(dir, &options.output_dir) {
                return Err(PipelineError::Config(format!(
                    "output directory {} is the input directory",
                    dir.display()
                )));
            }
            ImageDirectorySource::open(dir)?;
            prepare_output_dir(&options.output_dir)?;
            dir.clone()
        }
    };

    let mut foreground = options.foreground.clone();
    if let Some(classifier) = options.classifier.as_ref().filter(|_| !cancel.is_cancelled()) {
        progress.emit(PipelineEvent::StageStarted(Stage::Classify));
        // Without an explicit directory the tool starts where the frames are
        let classifier = match classifier.working_dir() {
            Some(_) => classifier.clone(),
            None => classifier.clone().current_dir(&staged),
        };
        tracing::info!("Waiting for {} to exit", classifier.program());

        match classifier.run(cancel.clone()) {
            Ok(()) => {}
            Err(error) => {
                tracing::warn!("{}", error);
                if matches!(error, HandoffError::Launch { .. }) {
                    if let ForegroundSource::External(_) = foreground {
                        tracing::warn!("Falling back to thresholded foreground");
                        foreground = ForegroundSource::Threshold;
                    }
                }
                progress.emit(PipelineEvent::HandoffUnavailable {
                    reason: error.to_string(),
                });
            }
        }
        progress.emit(PipelineEvent::StageFinished {
            stage: Stage::Classify,
            processed: 0,
            skipped: 0,
        });
    }

    if cancel.is_cancelled() {
        summary.cancelled = true;
        summary.output = sink.location();
        return Ok(summary);
    }

    let source = ImageDirectorySource::open(&staged)?;
    let segmenter = WatershedPipeline::new(options.params, foreground);
    summary.merge(segment_frames(
        source,
        &segmenter,
        &mut sink,
        &options.config,
        progress,
        cancel,
    )?);

    Ok(summary)
}

fn same_directory(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::MemoryOutput;
    use crate::segmentation::LabelMap;
    use image::{DynamicImage, GrayImage};
    use ndarray::Array2;
    use std::time::Duration;

    /// Yields `count` frames, failing on the indices in `broken`
    struct ScriptedSource {
        next: usize,
        count: usize,
        broken: Vec<usize>,
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Option<Result<Frame, FrameError>> {
            if self.next >= self.count {
                return None;
            }
            let index = self.next;
            self.next += 1;
            if self.broken.contains(&index) {
                return Some(Err(FrameError::DecodeGap {
                    index,
                    reason: "corrupt".to_string(),
                }));
            }
            Some(Ok(Frame::new(
                index,
                format!("frame_{index}"),
                DynamicImage::ImageLuma8(GrayImage::new(4, 4)),
            )))
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    /// Slower on even frames so that workers finish out of order
    struct UnevenSegmenter;

    impl Segmenter for UnevenSegmenter {
        fn segment(&self, frame: &Frame) -> Result<SegmentationResult, FrameError> {
            if frame.index % 2 == 0 {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(SegmentationResult::from_labels(
                frame.index,
                LabelMap::new(Array2::zeros((4, 4))),
            ))
        }
    }

    fn config(workers: usize) -> PipelineConfig {
        PipelineConfig {
            workers,
            queue_depth: 2,
        }
    }

    #[test]
    fn results_arrive_in_source_order() {
        let source = ScriptedSource {
            next: 0,
            count: 12,
            broken: vec![],
        };
        let mut sink = MemoryOutput::default();
        let mut events = Vec::new();
        let summary = segment_frames(
            source,
            &UnevenSegmenter,
            &mut sink,
            &config(4),
            &mut |e: PipelineEvent| events.push(e),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(summary.processed, 12);
        let order: Vec<usize> = sink.results.iter().map(|(_, r)| r.index).collect();
        assert_eq!(order, (0..12).collect::<Vec<_>>());
        assert_eq!(events.first(), Some(&PipelineEvent::StageStarted(Stage::Segment)));
    }

    #[test]
    fn failed_frames_are_skipped_not_fatal() {
        let source = ScriptedSource {
            next: 0,
            count: 10,
            broken: vec![7],
        };
        let mut sink = MemoryOutput::default();
        let summary = segment_frames(
            source,
            &UnevenSegmenter,
            &mut sink,
            &config(3),
            &mut |_: PipelineEvent| {},
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(summary.processed, 9);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].id, "frame_7");
        let names: Vec<&str> = sink.results.iter().map(|(n, _)| n.as_str()).collect();
        assert!(!names.contains(&"frame_7"));
    }

    #[test]
    fn cancelled_run_processes_nothing() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let source = ScriptedSource {
            next: 0,
            count: 5,
            broken: vec![],
        };
        let mut sink = MemoryOutput::default();
        let summary = segment_frames(
            source,
            &UnevenSegmenter,
            &mut sink,
            &config(2),
            &mut |_: PipelineEvent| {},
            &cancel,
        )
        .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.processed, 0);
        assert!(sink.results.is_empty());
    }

    #[test]
    fn extraction_records_gaps() {
        let mut source = ScriptedSource {
            next: 0,
            count: 10,
            broken: vec![7],
        };
        let mut sink = MemoryOutput::default();
        let mut extracted = Vec::new();
        let summary = extract_frames(
            &mut source,
            &mut sink,
            &mut |e: PipelineEvent| {
                if let PipelineEvent::FrameExtracted { index, .. } = e {
                    extracted.push(index);
                }
            },
            &CancelToken::new(),
        );

        assert_eq!(summary.extracted, 9);
        assert_eq!(extracted, vec![0, 1, 2, 3, 4, 5, 6, 8, 9]);
        assert_eq!(sink.frames.len(), 9);
    }
}
