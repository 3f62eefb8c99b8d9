use serde::Serialize;

use crate::domain::{BoundingBox, CatalogItem};

pub const MIN_GRID: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoverageReport {
    /// Share of sampled cell centres inside at least one item footprint, 0 to 100.
    pub percent: f64,
    pub items: usize,
    pub grid: usize,
}

/// Samples an `grid` x `grid` lattice of cell centres over `bbox`. Grids below
/// [`MIN_GRID`] are raised to it.
pub fn coverage(items: &[CatalogItem], bbox: &BoundingBox, grid: usize) -> CoverageReport {
    let grid = grid.max(MIN_GRID);
    let step_x = (bbox.xmax() - bbox.xmin()) / grid as f64;
    let step_y = (bbox.ymax() - bbox.ymin()) / grid as f64;

    let mut covered = 0usize;
    for row in 0..grid {
        let y = bbox.ymin() + (row as f64 + 0.5) * step_y;
        for col in 0..grid {
            let x = bbox.xmin() + (col as f64 + 0.5) * step_x;
            if items.iter().any(|item| item.covers(x, y)) {
                covered += 1;
            }
        }
    }

    CoverageReport {
        percent: covered as f64 * 100.0 / (grid * grid) as f64,
        items: items.len(),
        grid,
    }
}
