use super::morphology::{self, StructuringElement};
use super::types::BinaryMask;
use crate::capture::Frame;
use crate::error::FrameError;
use image::{DynamicImage, GrayImage, Luma};
use ndarray::Array2;
use std::path::{Path, PathBuf};

/// Extensions tried, in order, when looking up an external mask
const MASK_EXTENSIONS: &[&str] = &["png", "tif", "tiff", "bmp", "jpg", "jpeg"];

/// Convert a frame to 8-bit grayscale
///
/// Colour frames use the BT.601 luma weights, `0.299 R + 0.587 G + 0.114 B`,
/// rounded to the nearest integer. Grayscale frames pass through.
pub fn to_grayscale(image: &DynamicImage) -> GrayImage {
    if let DynamicImage::ImageLuma8(gray) = image {
        return gray.clone();
    }
    let rgb = image.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let luma = (299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000;
        Luma([luma as u8])
    })
}

/// Otsu level for `gray`, or `None` when every pixel has the same intensity
pub fn otsu_threshold(gray: &GrayImage) -> Option<u8> {
    let mut pixels = gray.pixels().map(|p| p[0]);
    let first = pixels.next()?;
    if pixels.all(|v| v == first) {
        return None;
    }
    Some(imageproc::contrast::otsu_level(gray))
}

/// Binarizes frames into cell foreground and background
#[derive(Debug, Clone, Copy)]
pub struct ForegroundEstimator {
    element: StructuringElement,
    open_iterations: usize,
}

impl ForegroundEstimator {
    pub fn new(element: StructuringElement, open_iterations: usize) -> Self {
        Self {
            element,
            open_iterations,
        }
    }

    /// Inverted Otsu threshold: pixels at or below the level are foreground
    ///
    /// A single-intensity frame has nothing to separate and comes back empty.
    pub fn threshold(&self, gray: &GrayImage) -> BinaryMask {
        let _span = tracing::debug_span!("otsu").entered();

        let (width, height) = gray.dimensions();
        let Some(level) = otsu_threshold(gray) else {
            tracing::debug!("Uniform frame, no foreground");
            return BinaryMask::empty(width, height);
        };
        tracing::debug!("Otsu level {}", level);

        BinaryMask::new(Array2::from_shape_fn(
            (height as usize, width as usize),
            |(y, x)| gray.get_pixel(x as u32, y as u32)[0] <= level,
        ))
    }

    /// Remove speckle smaller than the structuring element
    pub fn refine(&self, mask: &BinaryMask) -> BinaryMask {
        morphology::open(mask, self.element, self.open_iterations)
    }

    /// Full estimate for a frame: grayscale, threshold, opening
    pub fn estimate(&self, frame: &Frame) -> BinaryMask {
        let gray = to_grayscale(&frame.image);
        self.refine(&self.threshold(&gray))
    }
}

impl Default for ForegroundEstimator {
    fn default() -> Self {
        Self::new(StructuringElement::default(), 1)
    }
}

/// Where the foreground mask for a frame comes from
#[derive(Debug, Clone, Default)]
pub enum ForegroundSource {
    /// Per-frame automatic thresholding
    #[default]
    Threshold,
    /// Masks produced elsewhere, one file per frame named after the frame
    ///
    /// Any non-zero pixel counts as foreground.
    External(PathBuf),
}

impl ForegroundSource {
    /// Opened foreground mask for `frame`
    pub fn foreground(
        &self,
        frame: &Frame,
        estimator: &ForegroundEstimator,
    ) -> Result<BinaryMask, FrameError> {
        match self {
            ForegroundSource::Threshold => Ok(estimator.estimate(frame)),
            ForegroundSource::External(dir) => {
                let mask = load_mask(dir, &frame.name)?;
                mask.check_matches(frame)?;
                Ok(estimator.refine(&mask))
            }
        }
    }
}

fn load_mask(dir: &Path, name: &str) -> Result<BinaryMask, FrameError> {
    let path = MASK_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{name}.{ext}")))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| FrameError::UnreadableImage {
            path: dir.join(name),
            source: image::ImageError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no mask for frame",
            )),
        })?;

    tracing::debug!("Using external mask {}", path.display());

    let image = image::open(&path).map_err(|source| FrameError::UnreadableImage {
        path: path.clone(),
        source,
    })?;
    Ok(BinaryMask::from_gray(&image.to_luma8()))
}
