use super::types::BinaryMask;
use image::{GrayImage, Luma};
use imageproc::morphology::{grayscale_dilate, grayscale_erode, grayscale_open, Mask};

/// Square structuring element anchored at `(size / 2, size / 2)`
///
/// Erosion and dilation sample the same offsets, `-anchor..size - anchor`,
/// so an even-sized opening moves shapes by one pixel towards +x/+y.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructuringElement {
    pub size: usize,
}

impl StructuringElement {
    // Anchor has to fit in a u8
    const MAX_SIZE: usize = 511;

    pub fn square(size: usize) -> Self {
        Self {
            size: size.clamp(1, Self::MAX_SIZE),
        }
    }

    fn mask(&self) -> Mask {
        let side = self.size as u32;
        let anchor = (self.size / 2) as u8;
        Mask::from_image(&GrayImage::from_pixel(side, side, Luma([255])), anchor, anchor)
    }
}

impl Default for StructuringElement {
    fn default() -> Self {
        Self::square(4)
    }
}

/// Erosion; pixels outside the frame count as foreground
pub fn erode(mask: &BinaryMask, element: StructuringElement, iterations: usize) -> BinaryMask {
    let kernel = element.mask();
    let mut image = mask.to_image();
    for _ in 0..iterations {
        image = grayscale_erode(&image, &kernel);
    }
    BinaryMask::from_gray(&image)
}

/// Dilation; pixels outside the frame count as background
pub fn dilate(mask: &BinaryMask, element: StructuringElement, iterations: usize) -> BinaryMask {
    let kernel = element.mask();
    let mut image = mask.to_image();
    for _ in 0..iterations {
        image = grayscale_dilate(&image, &kernel);
    }
    BinaryMask::from_gray(&image)
}

/// Erosion followed by dilation, each repeated `iterations` times
pub fn open(mask: &BinaryMask, element: StructuringElement, iterations: usize) -> BinaryMask {
    let _span = tracing::debug_span!("opening").entered();
    if iterations == 1 {
        return BinaryMask::from_gray(&grayscale_open(&mask.to_image(), &element.mask()));
    }
    dilate(&erode(mask, element, iterations), element, iterations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn square_mask(width: usize, height: usize, x0: usize, y0: usize, side: usize) -> BinaryMask {
        BinaryMask::new(Array2::from_shape_fn((height, width), |(y, x)| {
            x >= x0 && x < x0 + side && y >= y0 && y < y0 + side
        }))
    }

    #[test]
    fn opening_removes_speckle() {
        let mut cells = Array2::from_elem((12, 12), false);
        cells[[5, 5]] = true;
        cells[[5, 6]] = true;
        cells[[6, 5]] = true;
        let opened = open(&BinaryMask::new(cells), StructuringElement::default(), 1);
        assert!(opened.is_empty());
    }

    #[test]
    fn opening_keeps_large_square_shifted_by_one() {
        let mask = square_mask(20, 20, 4, 4, 10);
        let opened = open(&mask, StructuringElement::default(), 1);
        assert_eq!(opened, square_mask(20, 20, 5, 5, 10));
    }

    #[test]
    fn repeated_opening_matches_erode_then_dilate() {
        let mask = square_mask(30, 30, 3, 5, 16);
        let element = StructuringElement::default();
        let opened = open(&mask, element, 2);
        assert_eq!(opened, dilate(&erode(&mask, element, 2), element, 2));
        assert_eq!(opened.count(), 16 * 16);
    }

    #[test]
    fn dilation_grows_each_side() {
        let mask = square_mask(20, 20, 8, 8, 4);
        let grown = dilate(&mask, StructuringElement::default(), 1);
        // Anchor (2, 2): one pixel before, two after
        assert_eq!(grown.count(), 7 * 7);
        assert!(grown.cells()[[7, 7]]);
        assert!(grown.cells()[[13, 13]]);
        assert!(!grown.cells()[[6, 6]]);
        assert!(!grown.cells()[[14, 14]]);
    }

    #[test]
    fn erosion_keeps_frame_edge_blobs() {
        let mask = BinaryMask::new(Array2::from_elem((6, 6), true));
        assert_eq!(erode(&mask, StructuringElement::default(), 2).count(), 36);
    }

    #[test]
    fn dilation_does_not_grow_from_outside() {
        let mask = BinaryMask::empty(9, 5);
        assert!(dilate(&mask, StructuringElement::default(), 3).is_empty());
    }
}
