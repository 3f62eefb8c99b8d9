//! Quadtree tile pyramids.
//!
//! Level 0 is the source raster at full resolution; level `L` halves the linear resolution
//! `L` times. Every level is cut into `tile_size` square tiles starting at the top-left
//! corner; tiles on the right and bottom edges are smaller instead of padded.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{ResampleKernel, TileFormat};
use crate::error::ForgeError;
use crate::fs_util::{ensure_dir, remove_file_if_exists};
use crate::raster::{PixelWindow, RasterEngine, RasterInfo, TileEncoding};

const PROGRESS_EVERY: u64 = 250;

/// Number of levels actually generated: never more than requested and never past the level
/// where the larger side reaches one pixel.
pub fn max_levels(width: u64, height: u64, requested: u32) -> u32 {
    let largest = width.max(height);
    if largest == 0 {
        return 0;
    }
    let floor_log2 = 63 - largest.leading_zeros();
    requested.min(floor_log2 + 1)
}

/// Target size of level `level` derived from the level 0 size.
pub fn level_size(base_width: u64, base_height: u64, level: u32) -> (u64, u64) {
    let scale = 1u64 << level;
    (
        base_width.div_ceil(scale).max(1),
        base_height.div_ceil(scale).max(1),
    )
}

pub fn level_dir_name(level: u32) -> String {
    format!("L{level:02}")
}

pub fn tile_file_name(tx: u64, ty: u64, format: TileFormat) -> String {
    format!("x{tx}_y{ty}.{}", format.extension())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub width: u64,
    pub height: u64,
    pub tile_size: u64,
    pub tiles_x: u64,
    pub tiles_y: u64,
}

impl TileGrid {
    pub fn new(width: u64, height: u64, tile_size: u64) -> Self {
        Self {
            width,
            height,
            tile_size,
            tiles_x: width.div_ceil(tile_size),
            tiles_y: height.div_ceil(tile_size),
        }
    }

    pub fn tile_count(&self) -> u64 {
        self.tiles_x * self.tiles_y
    }

    pub fn window(&self, tx: u64, ty: u64) -> PixelWindow {
        let xoff = tx * self.tile_size;
        let yoff = ty * self.tile_size;
        PixelWindow {
            xoff,
            yoff,
            width: self.tile_size.min(self.width - xoff),
            height: self.tile_size.min(self.height - yoff),
        }
    }

    /// `(tx, ty, window)` in row-major order.
    pub fn tiles(&self) -> impl Iterator<Item = (u64, u64, PixelWindow)> + '_ {
        (0..self.tiles_y)
            .flat_map(move |ty| (0..self.tiles_x).map(move |tx| (tx, ty, self.window(tx, ty))))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileLevel {
    pub level: u32,
    pub width: u64,
    pub height: u64,
    pub tiles_x: u64,
    pub tiles_y: u64,
    pub origin: [f64; 2],
    pub pixel_size: [f64; 2],
    pub path: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PyramidSpec {
    pub tile_size: u32,
    pub levels: u32,
    pub format: TileFormat,
    pub kernel: ResampleKernel,
    pub quality: u8,
}

#[derive(Debug, Clone)]
pub struct PyramidLayout {
    /// Directory receiving the `L<NN>` level directories.
    pub tiles_dir: PathBuf,
    /// Directory for resampled level rasters.
    pub tmp_dir: PathBuf,
    /// Level paths in the metadata are relative to this directory.
    pub rel_root: PathBuf,
}

pub struct PyramidTiler<'a, E: RasterEngine> {
    engine: &'a E,
    keep_temp: bool,
}

impl<'a, E: RasterEngine> PyramidTiler<'a, E> {
    pub fn new(engine: &'a E, keep_temp: bool) -> Self {
        Self { engine, keep_temp }
    }

    pub fn build(
        &self,
        source: &Path,
        spec: &PyramidSpec,
        layout: &PyramidLayout,
    ) -> Result<Vec<TileLevel>, ForgeError> {
        if spec.tile_size == 0 || spec.levels == 0 {
            return Err(ForgeError::InvalidOptions(
                "tile size and levels must be positive".to_string(),
            ));
        }
        let base = self.engine.info(source, false)?;
        let (base_w, base_h) = checked_size(source, &base)?;
        let levels = max_levels(base_w, base_h, spec.levels);
        let tile_size = u64::from(spec.tile_size);

        let total_tiles: u64 = (0..levels)
            .map(|level| {
                let (w, h) = level_size(base_w, base_h, level);
                TileGrid::new(w, h, tile_size).tile_count()
            })
            .sum();
        info!(levels, total_tiles, source = %source.display(), "tile pyramid");

        ensure_dir(&layout.tiles_dir)?;
        let stem = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "raster".to_string());
        let encoding = TileEncoding {
            format: spec.format,
            quality: spec.quality,
        };

        let mut entries = Vec::with_capacity(levels as usize);
        let mut done = 0u64;
        for level in 0..levels {
            let (level_src, level_info) = if level == 0 {
                (source.to_path_buf(), base.clone())
            } else {
                ensure_dir(&layout.tmp_dir)?;
                let (w, h) = level_size(base_w, base_h, level);
                let path = layout.tmp_dir.join(format!("{stem}_lod{level}.tif"));
                self.engine.resize(source, w, h, spec.kernel, &path)?;
                let info = self.engine.info(&path, false)?;
                (path, info)
            };
            let (level_w, level_h) = checked_size(&level_src, &level_info)?;
            let grid = TileGrid::new(level_w, level_h, tile_size);

            let level_dir = layout.tiles_dir.join(level_dir_name(level));
            ensure_dir(&level_dir)?;
            let level_total = grid.tile_count();
            info!("tiling {}: {level_total} tiles", level_dir_name(level));
            for (index, (tx, ty, window)) in grid.tiles().enumerate() {
                let tile_path = level_dir.join(tile_file_name(tx, ty, spec.format));
                self.engine
                    .extract_window(&level_src, window, encoding, &tile_path)?;
                done += 1;
                let level_done = index as u64 + 1;
                if level_done == 1 || level_done % PROGRESS_EVERY == 0 || level_done == level_total
                {
                    info!(
                        "  {} {level_done}/{level_total} (overall {done}/{total_tiles})",
                        level_dir_name(level)
                    );
                }
            }

            entries.push(TileLevel {
                level,
                width: level_w,
                height: level_h,
                tiles_x: grid.tiles_x,
                tiles_y: grid.tiles_y,
                origin: level_info.origin(),
                pixel_size: level_info.pixel_size(),
                path: relative_path(&level_dir, &layout.rel_root),
            });

            if level != 0 && !self.keep_temp {
                remove_file_if_exists(&level_src)?;
            }
        }
        Ok(entries)
    }
}

fn checked_size(path: &Path, info: &RasterInfo) -> Result<(u64, u64), ForgeError> {
    if info.width <= 0 || info.height <= 0 {
        return Err(ForgeError::InvalidRasterGeometry {
            path: path.to_path_buf(),
            width: info.width,
            height: info.height,
        });
    }
    Ok((info.width as u64, info.height as u64))
}

/// `path` relative to `root` with `/` separators; falls back to the full path.
pub fn relative_path(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}
