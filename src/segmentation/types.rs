use crate::capture::Frame;
use crate::error::FrameError;
use image::{GenericImageView, GrayImage, ImageBuffer, Luma};
use ndarray::Array2;

/// Grayscale image with 16-bit samples, used to export label maps
pub type LabelImage = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Pixel neighbourhood used by labelling and flooding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// Edge-adjacent neighbours only
    Four,
    /// Edge- and corner-adjacent neighbours
    Eight,
}

impl Connectivity {
    /// Neighbour offsets as (dy, dx)
    pub fn offsets(self) -> &'static [(isize, isize)] {
        const FOUR: [(isize, isize); 4] = [(-1, 0), (0, -1), (0, 1), (1, 0)];
        const EIGHT: [(isize, isize); 8] = [
            (-1, -1),
            (-1, 0),
            (-1, 1),
            (0, -1),
            (0, 1),
            (1, -1),
            (1, 0),
            (1, 1),
        ];
        match self {
            Connectivity::Four => &FOUR,
            Connectivity::Eight => &EIGHT,
        }
    }
}

impl From<Connectivity> for imageproc::region_labelling::Connectivity {
    fn from(value: Connectivity) -> Self {
        match value {
            Connectivity::Four => imageproc::region_labelling::Connectivity::Four,
            Connectivity::Eight => imageproc::region_labelling::Connectivity::Eight,
        }
    }
}

/// Foreground/background mask
///
/// Indexed `[[y, x]]`; `true` = foreground (cell).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask {
    cells: Array2<bool>,
}

impl BinaryMask {
    pub fn new(cells: Array2<bool>) -> Self {
        Self { cells }
    }

    pub fn empty(width: u32, height: u32) -> Self {
        Self::new(Array2::from_elem((height as usize, width as usize), false))
    }

    /// Any non-zero pixel becomes foreground
    pub fn from_gray(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(Array2::from_shape_fn(
            (height as usize, width as usize),
            |(y, x)| image.get_pixel(x as u32, y as u32)[0] != 0,
        ))
    }

    pub fn width(&self) -> u32 {
        self.cells.ncols() as u32
    }

    pub fn height(&self) -> u32 {
        self.cells.nrows() as u32
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    pub fn cells(&self) -> &Array2<bool> {
        &self.cells
    }

    pub fn count(&self) -> usize {
        self.cells.iter().filter(|&&v| v).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.cells.iter().any(|&v| v)
    }

    /// Cells set here and not in `other`
    pub fn difference(&self, other: &BinaryMask) -> BinaryMask {
        let mut cells = self.cells.clone();
        ndarray::Zip::from(&mut cells)
            .and(&other.cells)
            .for_each(|a, &b| *a = *a && !b);
        Self::new(cells)
    }

    /// Render with the {0, 255} convention
    pub fn to_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width(), self.height(), |x, y| {
            Luma([if self.cells[[y as usize, x as usize]] { 255 } else { 0 }])
        })
    }

    /// Fails unless the mask was produced for a frame of this size
    pub fn check_matches(&self, frame: &Frame) -> Result<(), FrameError> {
        let expected = frame.image.dimensions();
        if self.dimensions() != expected {
            return Err(FrameError::DimensionMismatch {
                frame: frame.name.clone(),
                expected,
                actual: self.dimensions(),
            });
        }
        Ok(())
    }
}

/// Euclidean distance from each foreground cell to the nearest background cell
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMap {
    values: Array2<f32>,
}

impl DistanceMap {
    pub fn new(values: Array2<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    pub fn max(&self) -> f32 {
        self.values.iter().copied().fold(0.0, f32::max)
    }

    /// Cells at or above `level`, excluding zero-distance background
    pub fn at_least(&self, level: f32) -> BinaryMask {
        BinaryMask::new(self.values.mapv(|d| d > 0.0 && d >= level))
    }
}

/// Per-pixel region ids
///
/// `0` = unknown/unassigned, `1` = background, `>= 2` = seed or instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    labels: Array2<u32>,
}

impl LabelMap {
    pub const UNKNOWN: u32 = 0;
    pub const BACKGROUND: u32 = 1;
    pub const FIRST_REGION: u32 = 2;

    pub fn new(labels: Array2<u32>) -> Self {
        Self { labels }
    }

    pub fn labels(&self) -> &Array2<u32> {
        &self.labels
    }

    pub fn width(&self) -> u32 {
        self.labels.ncols() as u32
    }

    pub fn height(&self) -> u32 {
        self.labels.nrows() as u32
    }

    /// Distinct region ids (>= 2), ascending
    pub fn regions(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .labels
            .iter()
            .copied()
            .filter(|&l| l >= Self::FIRST_REGION)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn area(&self, label: u32) -> usize {
        self.labels.iter().filter(|&&l| l == label).count()
    }
}

/// Final output for one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationResult {
    pub index: usize,
    pub labels: LabelMap,
    pub mask: BinaryMask,
}

impl SegmentationResult {
    /// Collapse the label map: ids >= 2 are cells, everything else background
    pub fn from_labels(index: usize, labels: LabelMap) -> Self {
        let mask = BinaryMask::new(labels.labels().mapv(|l| l >= LabelMap::FIRST_REGION));
        Self {
            index,
            labels,
            mask,
        }
    }

    pub fn region_count(&self) -> usize {
        self.labels.regions().len()
    }

    pub fn mask_image(&self) -> GrayImage {
        self.mask.to_image()
    }

    /// Label map as 16-bit grayscale; ids beyond `u16::MAX` saturate
    pub fn label_image(&self) -> LabelImage {
        let labels = self.labels.labels();
        let overflow = labels.iter().filter(|&&l| l > u16::MAX as u32).count();
        if overflow > 0 {
            tracing::warn!(
                "Frame {}: {} pixels carry label ids above {}, saturated in the exported map",
                self.index,
                overflow,
                u16::MAX
            );
        }
        ImageBuffer::from_fn(self.labels.width(), self.labels.height(), |x, y| {
            let id = labels[[y as usize, x as usize]];
            Luma([id.min(u16::MAX as u32) as u16])
        })
    }
}
