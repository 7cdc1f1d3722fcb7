use super::distance::distance_transform;
use super::morphology::{self, StructuringElement};
use super::types::{BinaryMask, Connectivity, DistanceMap, LabelMap};
use image::Luma;
use imageproc::region_labelling::connected_components;
use ndarray::Array2;

/// Seeds and flood landscape derived from one opened foreground mask
#[derive(Debug, Clone)]
pub struct Markers {
    /// `>= 2` distinct seeds, `1` background, `0` unknown band
    pub labels: LabelMap,
    pub distance: DistanceMap,
    pub sure_foreground: BinaryMask,
    pub sure_background: BinaryMask,
    pub unknown: BinaryMask,
    pub seed_count: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct MarkerGenerator {
    pub element: StructuringElement,
    /// Dilation passes that grow the foreground into the sure-background region
    pub dilate_iterations: usize,
    /// Fraction of the frame's peak distance a pixel needs to become a seed
    pub foreground_ratio: f32,
    pub connectivity: Connectivity,
}

impl Default for MarkerGenerator {
    fn default() -> Self {
        Self {
            element: StructuringElement::default(),
            dilate_iterations: 3,
            foreground_ratio: 0.3,
            connectivity: Connectivity::Eight,
        }
    }
}

impl MarkerGenerator {
    pub fn generate(&self, opened: &BinaryMask) -> Markers {
        let _span = tracing::debug_span!("markers").entered();

        let distance = distance_transform(opened);
        let level = self.foreground_ratio * distance.max();
        let sure_foreground = distance.at_least(level);

        let sure_background = morphology::dilate(opened, self.element, self.dilate_iterations);
        let unknown = sure_background.difference(&sure_foreground);

        let components = connected_components(
            &sure_foreground.to_image(),
            self.connectivity.into(),
            Luma([0u8]),
        );

        let (width, height) = opened.dimensions();
        let mut seed_count = 0;
        let labels = Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
            if unknown.cells()[[y, x]] {
                return LabelMap::UNKNOWN;
            }
            let component = components.get_pixel(x as u32, y as u32)[0];
            seed_count = seed_count.max(component as usize);
            component + LabelMap::BACKGROUND
        });

        tracing::debug!(
            "{} seeds, peak distance {:.2}, seed level {:.2}",
            seed_count,
            distance.max(),
            level
        );

        Markers {
            labels: LabelMap::new(labels),
            distance,
            sure_foreground,
            sure_background,
            unknown,
            seed_count,
        }
    }
}
