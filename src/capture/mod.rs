mod image_dir;
#[cfg(feature = "video")]
mod opencv_video;
mod sampler;

pub use image_dir::ImageDirectorySource;
#[cfg(feature = "video")]
pub use opencv_video::OpenCvDecoder;
pub use sampler::{SampledVideo, SamplerConfig};

use crate::error::{FrameError, PipelineError};
use anyhow::Result;
use image::{DynamicImage, RgbImage};
use std::path::Path;

/// One raster frame taken from a source
///
/// `index` is the sample position (the second, for sampled video) and `name`
/// is the file stem used when the frame or its mask is written out.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: usize,
    pub name: String,
    pub image: DynamicImage,
}

impl Frame {
    pub fn new(index: usize, name: impl Into<String>, image: DynamicImage) -> Self {
        Self {
            index,
            name: name.into(),
            image,
        }
    }

    /// Frame sampled from a video, named `frame_<index>`
    pub fn sampled(index: usize, image: RgbImage) -> Self {
        Self::new(index, format!("frame_{index}"), DynamicImage::ImageRgb8(image))
    }
}

/// Trait for ordered, finite, single-pass frame producers
pub trait FrameSource: Send {
    /// Next frame, or the reason the next index was skipped
    ///
    /// Returns `None` once the source is exhausted.
    fn next_frame(&mut self) -> Option<std::result::Result<Frame, FrameError>>;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// Container metadata, when the backend can report it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub frame_count: u64,
    pub fps: f64,
}

impl VideoInfo {
    /// Whole seconds of footage: `floor(frame_count / fps)`
    pub fn duration_secs(&self) -> u64 {
        if self.fps <= 0.0 {
            return 0;
        }
        (self.frame_count as f64 / self.fps).floor() as u64
    }
}

/// Trait for seekable video decoders
///
/// The decoder is released when dropped.
pub trait VideoDecoder: Send {
    /// Frame count and rate, or `None` if the backend does not know them
    fn info(&self) -> Option<VideoInfo>;

    /// Seek to `millis` and decode the frame presented at or after it
    ///
    /// `Ok(None)` means nothing could be decoded there (end of stream).
    fn frame_at(&mut self, millis: f64) -> Result<Option<RgbImage>>;
}

/// Open a video file and sample it with `config`
#[cfg(feature = "video")]
pub fn open_video(path: &Path, config: SamplerConfig) -> std::result::Result<SampledVideo<OpenCvDecoder>, PipelineError> {
    let decoder = OpenCvDecoder::open(path).map_err(|e| PipelineError::Source {
        path: path.to_path_buf(),
        reason: format!("{e:#}"),
    })?;
    Ok(SampledVideo::new(decoder, config))
}

/// Open a video file and sample it with `config`
#[cfg(not(feature = "video"))]
pub fn open_video(path: &Path, _config: SamplerConfig) -> std::result::Result<SampledVideo<NoDecoder>, PipelineError> {
    Err(PipelineError::Source {
        path: path.to_path_buf(),
        reason: "built without the `video` feature".to_string(),
    })
}

/// Placeholder decoder type for builds without a video backend
#[cfg(not(feature = "video"))]
pub enum NoDecoder {}

#[cfg(not(feature = "video"))]
impl VideoDecoder for NoDecoder {
    fn info(&self) -> Option<VideoInfo> {
        match *self {}
    }

    fn frame_at(&mut self, _millis: f64) -> Result<Option<RgbImage>> {
        match *self {}
    }
}
