use super::types::{BinaryMask, Connectivity, DistanceMap, LabelMap};
use ndarray::Array2;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Marker-controlled watershed over the negated distance landscape
///
/// Every labelled marker inside the mask floods outward at once. The queue
/// pops the lowest elevation (deepest interior) first and, among equal
/// elevations, the pixel queued earliest. A pixel belongs to the first region
/// that reaches it. Markers outside the mask are dropped and mask pixels no
/// seed can reach stay `0`.
#[derive(Debug, Clone, Copy)]
pub struct WatershedSegmenter {
    pub connectivity: Connectivity,
}

impl Default for WatershedSegmenter {
    fn default() -> Self {
        Self {
            connectivity: Connectivity::Four,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    elevation: f32,
    age: u64,
    y: usize,
    x: usize,
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.elevation
            .total_cmp(&other.elevation)
            .then(self.age.cmp(&other.age))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl WatershedSegmenter {
    pub fn new(connectivity: Connectivity) -> Self {
        Self { connectivity }
    }

    pub fn flood(&self, markers: &LabelMap, distance: &DistanceMap, mask: &BinaryMask) -> LabelMap {
        let _span = tracing::debug_span!("watershed").entered();

        let domain = mask.cells();
        let depth = distance.values();
        let (height, width) = domain.dim();

        let mut output: Array2<u32> = Array2::zeros((height, width));
        let mut queue = BinaryHeap::new();
        let mut age = 0u64;

        for ((y, x), &label) in markers.labels().indexed_iter() {
            if label == LabelMap::UNKNOWN || !domain[[y, x]] {
                continue;
            }
            output[[y, x]] = label;
            queue.push(Reverse(Pending {
                elevation: -depth[[y, x]],
                age,
                y,
                x,
            }));
            age += 1;
        }

        while let Some(Reverse(current)) = queue.pop() {
            let label = output[[current.y, current.x]];
            for &(dy, dx) in self.connectivity.offsets() {
                let ny = current.y as isize + dy;
                let nx = current.x as isize + dx;
                if ny < 0 || nx < 0 || ny >= height as isize || nx >= width as isize {
                    continue;
                }
                let (ny, nx) = (ny as usize, nx as usize);
                if !domain[[ny, nx]] || output[[ny, nx]] != LabelMap::UNKNOWN {
                    continue;
                }
                output[[ny, nx]] = label;
                queue.push(Reverse(Pending {
                    elevation: -depth[[ny, nx]],
                    age,
                    y: ny,
                    x: nx,
                }));
                age += 1;
            }
        }

        LabelMap::new(output)
    }
}
