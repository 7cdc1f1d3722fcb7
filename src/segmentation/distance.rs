//! Exact Euclidean distance transform.

use super::types::{BinaryMask, DistanceMap};
use image::{GrayImage, Luma};
use imageproc::distance_transform::euclidean_squared_distance_transform;
use ndarray::Array2;

/// Distance from every foreground cell to the nearest background cell
///
/// Pixels outside the frame are not background. A mask with no background at
/// all is measured against a one-pixel background ring around the frame.
pub fn distance_transform(mask: &BinaryMask) -> DistanceMap {
    let _span = tracing::debug_span!("distance_transform").entered();

    let cells = mask.cells();
    let (height, width) = cells.dim();
    let pad = u32::from(!cells.is_empty() && cells.iter().all(|&fg| fg));
    let (w, h) = (width as u32, height as u32);

    // Background pixels are the sites distances are measured to
    let sites = GrayImage::from_fn(w + 2 * pad, h + 2 * pad, |x, y| {
        let inside = x >= pad && y >= pad && x < w + pad && y < h + pad;
        let foreground = inside && cells[[(y - pad) as usize, (x - pad) as usize]];
        Luma([if foreground { 0 } else { 255 }])
    });
    let squared = euclidean_squared_distance_transform(&sites);

    let values = Array2::from_shape_fn((height, width), |(y, x)| {
        squared.get_pixel(x as u32 + pad, y as u32 + pad)[0].sqrt() as f32
    });
    DistanceMap::new(values)
}
