use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::TileFormat;
use crate::error::ForgeError;
use crate::fs_util::write_json_atomic;
use crate::manifest::HeightMeta;
use crate::raster::{RasterEngine, TileEncoding};

pub const TERRAIN_PREVIEW_FILE: &str = "terrain_preview.json";
pub const HEIGHT_PREVIEW_REL: &str = "heights/height_preview.png";
pub const ALBEDO_TEXTURE_REL: &str = "imagery/albedo_texture.jpg";

/// Fits `width` x `height` inside `max_dim` keeping the aspect ratio. Never upscales, never
/// returns a zero side. `max_dim == 0` keeps the input size.
pub fn scaled_size(width: u64, height: u64, max_dim: u32) -> (u64, u64) {
    if max_dim == 0 {
        return (width, height);
    }
    let longest = width.max(height).max(1) as f64;
    let scale = (max_dim as f64 / longest).min(1.0);
    let fit = |side: u64| ((side as f64 * scale).round() as u64).max(1);
    (fit(width), fit(height))
}

/// Whole-raster previews encoded through the raster engine.
pub struct PreviewBuilder<'a, E: RasterEngine> {
    engine: &'a E,
    max_dim: u32,
}

impl<'a, E: RasterEngine> PreviewBuilder<'a, E> {
    pub fn new(engine: &'a E, max_dim: u32) -> Self {
        Self { engine, max_dim }
    }

    /// Writes the albedo texture as JPEG and copies it to `preview`. Returns the encoded size.
    pub fn albedo(
        &self,
        source: &Path,
        texture: &Path,
        preview: &Path,
        quality: u8,
    ) -> Result<(u64, u64), ForgeError> {
        let size = self.encode(
            source,
            TileEncoding {
                format: TileFormat::Jpeg,
                quality,
            },
            texture,
        )?;
        if preview != texture {
            fs::copy(texture, preview).map_err(|err| {
                ForgeError::Filesystem(format!("copy {}: {err}", texture.display()))
            })?;
        }
        Ok(size)
    }

    pub fn height(&self, source: &Path, preview: &Path) -> Result<(u64, u64), ForgeError> {
        self.encode(
            source,
            TileEncoding {
                format: TileFormat::Png,
                quality: 100,
            },
            preview,
        )
    }

    fn encode(
        &self,
        source: &Path,
        encoding: TileEncoding,
        output: &Path,
    ) -> Result<(u64, u64), ForgeError> {
        let info = self.engine.info(source, false)?;
        let (width, height) = scaled_size(
            info.width.max(0) as u64,
            info.height.max(0) as u64,
            self.max_dim,
        );
        info!(
            source = %source.display(),
            output = %output.display(),
            width,
            height,
            "encoding preview"
        );
        self.engine
            .encode_preview(source, width, height, encoding, output)?;
        Ok((width, height))
    }
}

/// Renderer descriptor for a single-mesh preview of the scenery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerrainPreview {
    pub heightmap: String,
    pub size_x: f64,
    pub size_z: f64,
    pub height_min: f64,
    pub height_max: f64,
    pub max_resolution: u32,
    pub flip_y: bool,
    /// Empty when no imagery was built.
    pub albedo: String,
}

impl TerrainPreview {
    /// `max_resolution` is further capped by the height preview size.
    pub fn new(
        meta: &HeightMeta,
        max_resolution: u32,
        height_preview: (u64, u64),
        with_albedo: bool,
    ) -> Self {
        let cap = |side: u64| {
            if side == 0 {
                max_resolution
            } else {
                u32::try_from(side).unwrap_or(u32::MAX)
            }
        };
        let range = meta.range();
        Self {
            heightmap: HEIGHT_PREVIEW_REL.to_string(),
            size_x: meta.size_x,
            size_z: meta.size_z,
            height_min: range.min,
            height_max: range.max,
            max_resolution: max_resolution
                .min(cap(height_preview.0))
                .min(cap(height_preview.1)),
            flip_y: true,
            albedo: if with_albedo {
                ALBEDO_TEXTURE_REL.to_string()
            } else {
                String::new()
            },
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), ForgeError> {
        write_json_atomic(path, self)
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::{BoundingBox, Crs};
    use crate::manifest::HeightRange;
    use crate::raster::RasterInfo;

    use super::*;

    fn meta() -> HeightMeta {
        let info = RasterInfo {
            width: 1500,
            height: 1000,
            geotransform: [545000.0, 30.0, 0.0, 4185000.0, 0.0, -30.0],
            bands: Vec::new(),
        };
        HeightMeta::new(
            HeightRange::new(-2.0, 780.0),
            &info,
            "EPSG:32610".parse::<Crs>().unwrap(),
            BoundingBox::new(-122.6, 37.5, -122.3, 37.9).unwrap(),
            30.0,
        )
    }

    #[test]
    fn scaled_size_fits_longest_side() {
        assert_eq!(scaled_size(10980, 7320, 4096), (4096, 2731));
        assert_eq!(scaled_size(7320, 10980, 4096), (2731, 4096));
    }

    #[test]
    fn scaled_size_never_upscales_or_collapses() {
        assert_eq!(scaled_size(800, 600, 4096), (800, 600));
        assert_eq!(scaled_size(100000, 10, 512), (512, 1));
        assert_eq!(scaled_size(3000, 2000, 0), (3000, 2000));
    }

    #[test]
    fn descriptor_caps_resolution_by_preview() {
        let preview = TerrainPreview::new(&meta(), 512, (1500, 400), true);
        assert_eq!(preview.max_resolution, 400);
        assert_eq!(preview.size_x, 45000.0);
        assert_eq!(preview.size_z, 30000.0);
        assert_eq!(preview.albedo, "imagery/albedo_texture.jpg");

        let value = serde_json::to_value(&preview).unwrap();
        assert_eq!(value["heightmap"], "heights/height_preview.png");
        assert_eq!(value["flipY"], true);
        assert_eq!(value["heightMin"], -2.0);
        assert_eq!(value["maxResolution"], 400);
    }

    #[test]
    fn descriptor_without_imagery_has_empty_albedo() {
        let preview = TerrainPreview::new(&meta(), 512, (0, 0), false);
        assert_eq!(preview.max_resolution, 512);
        assert_eq!(preview.albedo, "");
    }
}
