mod directory;

pub use directory::{prepare_output_dir, DirectoryOutput};

use crate::capture::Frame;
use crate::segmentation::SegmentationResult;
use anyhow::Result;

/// Trait for output destinations
pub trait OutputSink {
    /// Store a raw extracted frame
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Store the segmentation of the frame called `name`
    fn write_result(&mut self, name: &str, result: &SegmentationResult) -> Result<()>;

    /// Where results end up, for the run summary
    fn location(&self) -> String;
}

/// Keeps everything in memory, keyed by frame name
#[derive(Debug, Default)]
pub struct MemoryOutput {
    pub frames: Vec<Frame>,
    pub results: Vec<(String, SegmentationResult)>,
}

impl OutputSink for MemoryOutput {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.frames.push(frame.clone());
        Ok(())
    }

    fn write_result(&mut self, name: &str, result: &SegmentationResult) -> Result<()> {
        self.results.push((name.to_string(), result.clone()));
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
