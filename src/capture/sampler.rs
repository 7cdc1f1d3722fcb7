use super::{Frame, FrameSource, VideoDecoder};
use crate::error::FrameError;

#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    /// Seconds between samples
    pub interval_secs: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self { interval_secs: 1.0 }
    }
}

/// Samples one frame per interval from a seekable decoder
///
/// With container metadata the sample count is fixed up front and decode
/// failures leave gaps. Without it, sampling continues until the first
/// failure.
pub struct SampledVideo<D: VideoDecoder> {
    decoder: Option<D>,
    config: SamplerConfig,
    next_index: usize,
    total: Option<usize>,
}

impl<D: VideoDecoder> SampledVideo<D> {
    pub fn new(decoder: D, config: SamplerConfig) -> Self {
        let interval = if config.interval_secs > 0.0 {
            config.interval_secs
        } else {
            1.0
        };
        let total = decoder
            .info()
            .map(|info| (info.duration_secs() as f64 / interval).floor() as usize);

        match total {
            Some(total) => tracing::info!("Sampling {} frames at {}s spacing", total, interval),
            None => tracing::info!("No video metadata; sampling until the stream ends"),
        }

        Self {
            decoder: Some(decoder),
            config: SamplerConfig {
                interval_secs: interval,
            },
            next_index: 0,
            total,
        }
    }

    /// Number of samples, if known up front
    pub fn total(&self) -> Option<usize> {
        self.total
    }

    fn release(&mut self) {
        if self.decoder.take().is_some() {
            tracing::debug!("Released video decoder after {} samples", self.next_index);
        }
    }
}

impl<D: VideoDecoder> FrameSource for SampledVideo<D> {
    fn next_frame(&mut self) -> Option<Result<Frame, FrameError>> {
        if let Some(total) = self.total {
            if self.next_index >= total {
                self.release();
                return None;
            }
        }

        let decoder = self.decoder.as_mut()?;
        let index = self.next_index;
        self.next_index += 1;

        let millis = index as f64 * self.config.interval_secs * 1000.0;
        let decoded = decoder.frame_at(millis);

        match (decoded, self.total) {
            (Ok(Some(image)), _) => Some(Ok(Frame::sampled(index, image))),
            (Ok(None), Some(_)) => Some(Err(FrameError::DecodeGap {
                index,
                reason: "end of stream".to_string(),
            })),
            (Err(e), Some(_)) => Some(Err(FrameError::DecodeGap {
                index,
                reason: format!("{e:#}"),
            })),
            (Ok(None), None) => {
                self.release();
                None
            }
            (Err(e), None) => {
                tracing::debug!("Stopping at sample {}: {:#}", index, e);
                self.release();
                None
            }
        }
    }

    fn describe(&self) -> String {
        match self.total {
            Some(total) => format!("video ({total} samples)"),
            None => "video (length unknown)".to_string(),
        }
    }
}

impl<D: VideoDecoder> Drop for SampledVideo<D> {
    fn drop(&mut self) {
        self.release();
    }
}
