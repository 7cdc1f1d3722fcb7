use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort a whole run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot open input {path}: {reason}")]
    Source { path: PathBuf, reason: String },

    #[error("cannot prepare output directory {path}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("worker thread panicked")]
    WorkerPanicked,
}

/// Failures isolated to one frame; the batch continues without it
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("no frame decoded for sample {index}: {reason}")]
    DecodeGap { index: usize, reason: String },

    #[error("cannot read image {path}")]
    UnreadableImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("mask for {frame} is {actual:?}, frame is {expected:?}")]
    DimensionMismatch {
        frame: String,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("cannot write {name}: {reason}")]
    Write { name: String, reason: String },
}

impl FrameError {
    /// Identifier of the frame or file the failure belongs to
    pub fn subject(&self) -> String {
        match self {
            FrameError::DecodeGap { index, .. } => format!("frame_{index}"),
            FrameError::UnreadableImage { path, .. } => path.display().to_string(),
            FrameError::DimensionMismatch { frame, .. } => frame.clone(),
            FrameError::Write { name, .. } => name.clone(),
        }
    }
}

/// External classifier hand-off failures; never fatal to the run
#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("cannot launch {program}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("lost track of {program}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Failed { program: String, status: std::process::ExitStatus },

    #[error("wait for {program} cancelled")]
    Cancelled { program: String },
}
