use super::{VideoDecoder, VideoInfo};
use anyhow::{bail, Context, Result};
use image::RgbImage;
use opencv::core::Mat;
use opencv::imgproc;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture};
use std::path::{Path, PathBuf};

/// Video file decoder backed by OpenCV's videoio
pub struct OpenCvDecoder {
    capture: VideoCapture,
    path: PathBuf,
}

impl OpenCvDecoder {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Opening video {}", path.display());

        let name = path
            .to_str()
            .with_context(|| format!("Non UTF-8 video path {}", path.display()))?;
        let capture = VideoCapture::from_file(name, videoio::CAP_ANY)
            .with_context(|| format!("Failed to open video {}", path.display()))?;
        if !capture.is_opened()? {
            bail!("No backend could open {}", path.display());
        }

        Ok(Self {
            capture,
            path: path.to_path_buf(),
        })
    }
}

impl VideoDecoder for OpenCvDecoder {
    fn info(&self) -> Option<VideoInfo> {
        let fps = self.capture.get(videoio::CAP_PROP_FPS).ok()?;
        let frame_count = self.capture.get(videoio::CAP_PROP_FRAME_COUNT).ok()?;
        if fps <= 0.0 || frame_count <= 0.0 {
            return None;
        }
        Some(VideoInfo {
            frame_count: frame_count as u64,
            fps,
        })
    }

    fn frame_at(&mut self, millis: f64) -> Result<Option<RgbImage>> {
        self.capture
            .set(videoio::CAP_PROP_POS_MSEC, millis)
            .context("Failed to seek")?;

        let mut frame = Mat::default();
        if !self.capture.read(&mut frame).context("Failed to read frame")? || frame.empty() {
            return Ok(None);
        }

        // OpenCV decodes to BGR
        let mut rgb = Mat::default();
        imgproc::cvt_color(&frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

        let width = rgb.cols() as u32;
        let height = rgb.rows() as u32;
        let data = rgb.data_bytes()?.to_vec();
        let image = RgbImage::from_raw(width, height, data)
            .context("Decoded frame has an unexpected buffer size")?;

        Ok(Some(image))
    }
}

impl Drop for OpenCvDecoder {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            tracing::warn!("Failed to release {}: {}", self.path.display(), e);
        }
    }
}
