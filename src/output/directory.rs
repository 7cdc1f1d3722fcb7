use super::OutputSink;
use crate::capture::Frame;
use crate::error::PipelineError;
use crate::segmentation::SegmentationResult;
use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat};
use std::path::{Path, PathBuf};

/// Remove any previous contents of `dir` and create it fresh
pub fn prepare_output_dir<P: AsRef<Path>>(dir: P) -> Result<(), PipelineError> {
    let dir = dir.as_ref();
    let fail = |source| PipelineError::OutputDir {
        path: dir.to_path_buf(),
        source,
    };

    if dir.exists() {
        tracing::info!("Clearing output directory {}", dir.display());
        std::fs::remove_dir_all(dir).map_err(fail)?;
    }
    std::fs::create_dir_all(dir).map_err(fail)?;
    Ok(())
}

/// Writes `<name>.<ext>` files into one directory
///
/// A mask overwrites the extracted frame of the same name.
pub struct DirectoryOutput {
    dir: PathBuf,
    extension: String,
    format: ImageFormat,
    write_labels: bool,
}

impl DirectoryOutput {
    pub fn new<P: AsRef<Path>>(dir: P, extension: &str) -> Result<Self> {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        let format = ImageFormat::from_extension(&extension)
            .with_context(|| format!("Unsupported output format {extension}"))?;

        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            extension,
            format,
            write_labels: false,
        })
    }

    /// Also write the instance label map as `<name>_labels.png`
    pub fn with_label_maps(mut self, enabled: bool) -> Self {
        self.write_labels = enabled;
        self
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{}", self.extension))
    }

    fn save(&self, name: &str, image: &DynamicImage) -> Result<()> {
        let path = self.path_for(name);
        // JPEG has no alpha or 16-bit support
        let image = match (self.format, image) {
            (ImageFormat::Jpeg, DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_)) => {
                image.clone()
            }
            (ImageFormat::Jpeg, DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA8(_)) => {
                DynamicImage::ImageLuma8(image.to_luma8())
            }
            (ImageFormat::Jpeg, _) => DynamicImage::ImageRgb8(image.to_rgb8()),
            _ => image.clone(),
        };
        image
            .save_with_format(&path, self.format)
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

impl OutputSink for DirectoryOutput {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.save(&frame.name, &frame.image)
    }

    fn write_result(&mut self, name: &str, result: &SegmentationResult) -> Result<()> {
        self.save(name, &DynamicImage::ImageLuma8(result.mask_image()))?;

        if self.write_labels {
            let path = self.dir.join(format!("{name}_labels.png"));
            result
                .label_image()
                .save_with_format(&path, ImageFormat::Png)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        Ok(())
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}
