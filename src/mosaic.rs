use std::path::{Path, PathBuf};

use tracing::info;

use crate::domain::{BoundingBox, Crs, ResampleKernel};
use crate::error::ForgeError;
use crate::fs_util::remove_file_if_exists;
use crate::raster::RasterEngine;

#[derive(Debug, Clone)]
pub struct MosaicRequest<'a> {
    pub rasters: &'a [PathBuf],
    pub bbox: BoundingBox,
    pub crs: &'a Crs,
    /// Ground sampling distance in metres.
    pub gsd: f64,
    pub kernel: ResampleKernel,
    pub fill_nodata: bool,
}

/// File names of every artifact one mosaic build produces inside its work directory.
#[derive(Debug, Clone)]
pub struct MosaicPaths {
    pub vrt: PathBuf,
    pub clip: PathBuf,
    pub projected: PathBuf,
    pub filled: PathBuf,
    work_dir: PathBuf,
    stem: String,
}

impl MosaicPaths {
    pub fn new(work_dir: &Path, stem: &str, projected: PathBuf) -> Self {
        Self {
            vrt: work_dir.join(format!("{stem}_mosaic.vrt")),
            clip: work_dir.join(format!("{stem}_clip_wgs84.tif")),
            filled: work_dir.join(format!("{stem}_filled.tif")),
            projected,
            work_dir: work_dir.to_path_buf(),
            stem: stem.to_string(),
        }
    }

    pub fn band(&self, band: usize) -> PathBuf {
        self.work_dir.join(format!("{}_band{band}.tif", self.stem))
    }

    pub fn band_filled(&self, band: usize) -> PathBuf {
        self.work_dir
            .join(format!("{}_band{band}_filled.tif", self.stem))
    }
}

pub struct MosaicBuilder<'a, E: RasterEngine> {
    engine: &'a E,
    keep_temp: bool,
}

impl<'a, E: RasterEngine> MosaicBuilder<'a, E> {
    pub fn new(engine: &'a E, keep_temp: bool) -> Self {
        Self { engine, keep_temp }
    }

    /// Mosaic, clip, reproject and optionally fill. Returns the final raster path, which is
    /// `paths.projected` or `paths.filled`.
    pub fn build(
        &self,
        request: &MosaicRequest<'_>,
        paths: &MosaicPaths,
    ) -> Result<PathBuf, ForgeError> {
        if request.rasters.is_empty() {
            return Err(ForgeError::NoScenesFound(
                "no usable rasters to mosaic".to_string(),
            ));
        }
        info!(inputs = request.rasters.len(), "building virtual mosaic");
        self.engine.build_vrt(request.rasters, &paths.vrt)?;

        info!(bbox = %request.bbox, "clipping mosaic");
        self.engine
            .clip(&paths.vrt, &request.bbox, request.kernel, &paths.clip)?;

        info!(crs = %request.crs, gsd = request.gsd, "reprojecting clip");
        self.engine.reproject(
            &paths.clip,
            request.crs,
            request.gsd,
            request.kernel,
            &paths.projected,
        )?;

        let mut intermediates = vec![paths.vrt.clone(), paths.clip.clone()];
        let result = if request.fill_nodata {
            let filled = self.fill_bands(paths, &mut intermediates)?;
            Some(filled)
        } else {
            None
        };

        if !self.keep_temp {
            for path in &intermediates {
                remove_file_if_exists(path)?;
            }
        }
        Ok(result.unwrap_or_else(|| paths.projected.clone()))
    }

    /// The fill operator is single-band, so each band is split out, filled, and the
    /// filled bands are stacked back in their original order.
    fn fill_bands(
        &self,
        paths: &MosaicPaths,
        intermediates: &mut Vec<PathBuf>,
    ) -> Result<PathBuf, ForgeError> {
        let info = self.engine.info(&paths.projected, false)?;
        let band_count = info.band_count().max(1);
        info!(bands = band_count, "filling nodata per band");
        let mut filled_bands = Vec::with_capacity(band_count);
        for band in 1..=band_count {
            let band_src = paths.band(band);
            let band_filled = paths.band_filled(band);
            self.engine.extract_band(&paths.projected, band, &band_src)?;
            self.engine.fill_nodata(&band_src, &band_filled)?;
            intermediates.push(band_src);
            intermediates.push(band_filled.clone());
            filled_bands.push(band_filled);
        }
        self.engine.stack_bands(&filled_bands, &paths.filled)?;
        Ok(paths.filled.clone())
    }
}
