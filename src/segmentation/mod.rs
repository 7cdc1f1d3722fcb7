mod distance;
mod markers;
mod morphology;
mod preprocess;
pub mod types;
mod watershed;

pub use distance::distance_transform;
pub use markers::{MarkerGenerator, Markers};
pub use morphology::{dilate, erode, open, StructuringElement};
pub use preprocess::{otsu_threshold, to_grayscale, ForegroundEstimator, ForegroundSource};
pub use types::{BinaryMask, Connectivity, DistanceMap, LabelImage, LabelMap, SegmentationResult};
pub use watershed::WatershedSegmenter;

use crate::capture::Frame;
use crate::error::FrameError;

/// Trait for per-frame instance segmenters
///
/// Implementations hold no state between frames, so one instance can be
/// shared by every worker.
pub trait Segmenter: Send + Sync {
    fn segment(&self, frame: &Frame) -> Result<SegmentationResult, FrameError>;
}

/// Tunables for the threshold / marker / watershed chain
#[derive(Debug, Clone, Copy)]
pub struct SegmentationParams {
    /// Side of the square structuring element
    pub kernel_size: usize,
    pub open_iterations: usize,
    pub dilate_iterations: usize,
    pub foreground_ratio: f32,
    pub label_connectivity: Connectivity,
    pub flood_connectivity: Connectivity,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            kernel_size: 4,
            open_iterations: 1,
            dilate_iterations: 3,
            foreground_ratio: 0.3,
            label_connectivity: Connectivity::Eight,
            flood_connectivity: Connectivity::Four,
        }
    }
}

/// Foreground estimate, seed markers and watershed, composed per frame
#[derive(Debug, Clone, Default)]
pub struct WatershedPipeline {
    foreground: ForegroundSource,
    estimator: ForegroundEstimator,
    markers: MarkerGenerator,
    watershed: WatershedSegmenter,
}

impl WatershedPipeline {
    pub fn new(params: SegmentationParams, foreground: ForegroundSource) -> Self {
        let element = StructuringElement::square(params.kernel_size);
        Self {
            foreground,
            estimator: ForegroundEstimator::new(element, params.open_iterations),
            markers: MarkerGenerator {
                element,
                dilate_iterations: params.dilate_iterations,
                foreground_ratio: params.foreground_ratio,
                connectivity: params.label_connectivity,
            },
            watershed: WatershedSegmenter::new(params.flood_connectivity),
        }
    }
}

impl Segmenter for WatershedPipeline {
    fn segment(&self, frame: &Frame) -> Result<SegmentationResult, FrameError> {
        let _span = tracing::debug_span!("segment", frame = %frame.name).entered();

        let opened = self.foreground.foreground(frame, &self.estimator)?;
        let markers = self.markers.generate(&opened);
        let labels = self.watershed.flood(&markers.labels, &markers.distance, &opened);
        let result = SegmentationResult::from_labels(frame.index, labels);

        tracing::debug!(
            "{}: {} regions, {} cell pixels",
            frame.name,
            result.region_count(),
            result.mask.count()
        );
        Ok(result)
    }
}

/// Segment one frame with default parameters and thresholded foreground
pub fn segment_frame(frame: &Frame) -> Result<SegmentationResult, FrameError> {
    WatershedPipeline::default().segment(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, Luma};

    /// Dark discs on a bright background
    fn discs(width: u32, height: u32, centres: &[(f32, f32)], radius: f32) -> Frame {
        let image = GrayImage::from_fn(width, height, |x, y| {
            let inside = centres.iter().any(|&(cx, cy)| {
                let dx = x as f32 - cx;
                let dy = y as f32 - cy;
                dx * dx + dy * dy <= radius * radius
            });
            Luma([if inside { 40 } else { 220 }])
        });
        Frame::new(0, "discs", DynamicImage::ImageLuma8(image))
    }

    #[test]
    fn separated_discs_give_two_regions() {
        let radius = 20.0;
        let frame = discs(160, 80, &[(40.0, 40.0), (120.0, 40.0)], radius);
        let result = segment_frame(&frame).unwrap();

        let regions = result.labels.regions();
        assert_eq!(regions.len(), 2);
        let true_area = std::f32::consts::PI * radius * radius;
        for label in regions {
            let area = result.labels.area(label) as f32;
            assert!((area - true_area).abs() / true_area < 0.05, "area {area}");
        }
    }

    // Seeds separate once the neck half-width sqrt(r^2 - d^2/4) drops below
    // the seed ratio times r: d > 2r * sqrt(1 - 0.3^2), about 1.91r.

    #[test]
    fn overlapping_discs_past_the_neck_limit_are_split() {
        // r = 30, d = 58 (1.93r): neck about 8px deep against a seed level of 9
        let frame = discs(140, 80, &[(40.0, 40.0), (98.0, 40.0)], 30.0);
        let result = segment_frame(&frame).unwrap();

        let labels = result.labels.labels();
        assert_eq!(result.region_count(), 2);
        assert_ne!(labels[[40, 40]], labels[[40, 98]]);
        assert!(labels[[40, 40]] >= LabelMap::FIRST_REGION);
        assert!(labels[[40, 98]] >= LabelMap::FIRST_REGION);
    }

    #[test]
    fn overlapping_discs_with_wide_neck_stay_merged() {
        // r = 30, d = 54 (1.8r): neck about 14px deep, one seed spans both
        let frame = discs(140, 80, &[(40.0, 40.0), (94.0, 40.0)], 30.0);
        let result = segment_frame(&frame).unwrap();

        let labels = result.labels.labels();
        assert_eq!(result.region_count(), 1);
        assert_eq!(labels[[40, 40]], labels[[40, 94]]);
    }

    #[test]
    fn flat_frames_have_no_cells() {
        for value in [0u8, 255] {
            let frame = Frame::new(
                0,
                "flat",
                DynamicImage::ImageLuma8(GrayImage::from_pixel(48, 48, Luma([value]))),
            );
            let result = segment_frame(&frame).unwrap();
            assert_eq!(result.mask.count(), 0);
            assert_eq!(result.region_count(), 0);
        }
    }

    #[test]
    fn segmentation_is_deterministic() {
        let frame = discs(140, 80, &[(45.0, 40.0), (92.0, 40.0)], 24.0);
        let first = segment_frame(&frame).unwrap();
        let second = segment_frame(&frame).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn frame_filled_with_cell_is_one_region() {
        let dir = tempfile::tempdir().unwrap();
        GrayImage::from_pixel(24, 24, Luma([255]))
            .save(dir.path().join("full.png"))
            .unwrap();
        let frame = Frame::new(0, "full", DynamicImage::ImageLuma8(GrayImage::new(24, 24)));

        let pipeline = WatershedPipeline::new(
            SegmentationParams::default(),
            ForegroundSource::External(dir.path().to_path_buf()),
        );
        let result = pipeline.segment(&frame).unwrap();
        assert_eq!(result.region_count(), 1);
        assert_eq!(result.mask.count(), 24 * 24);
    }
}
