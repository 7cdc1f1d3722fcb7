//! Instance segmentation of cell-culture video.
//!
//! Each sampled frame is thresholded into foreground, seeded from the peaks of
//! its distance transform and split into individual cells by a
//! marker-controlled watershed.

pub mod capture;
pub mod error;
pub mod handoff;
pub mod output;
pub mod pipeline;
pub mod segmentation;

pub use capture::{Frame, FrameSource, ImageDirectorySource, SampledVideo, SamplerConfig, VideoDecoder, VideoInfo};
pub use error::{FrameError, HandoffError, PipelineError};
pub use handoff::ExternalClassifier;
pub use output::{DirectoryOutput, MemoryOutput, OutputSink};
pub use pipeline::{
    extract_frames, run, segment_frames, CancelToken, Input, PipelineConfig, PipelineEvent,
    ProgressSink, RunOptions, RunSummary, Stage,
};
pub use segmentation::{
    segment_frame, ForegroundSource, SegmentationParams, SegmentationResult, Segmenter,
    WatershedPipeline,
};
