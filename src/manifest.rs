use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{BoundingBox, Crs, TileFormat};
use crate::error::ForgeError;
use crate::fs_util::write_json_atomic;
use crate::pyramid::TileLevel;
use crate::raster::RasterInfo;

pub const ALBEDO_LAYER: &str = "albedo";
pub const HEIGHT_LAYER: &str = "height";
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height_max: Option<f64>,
    pub levels: Vec<TileLevel>,
}

impl Layer {
    pub fn imagery(format: TileFormat, levels: Vec<TileLevel>) -> Self {
        Self {
            format: format.extension().to_string(),
            height_min: None,
            height_max: None,
            levels,
        }
    }

    pub fn height(format: TileFormat, range: HeightRange, levels: Vec<TileLevel>) -> Self {
        Self {
            format: format.extension().to_string(),
            height_min: Some(range.min),
            height_max: Some(range.max),
            levels,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeightRange {
    pub min: f64,
    pub max: f64,
}

impl HeightRange {
    /// Widens a degenerate range so the UInt16 rescale never divides by zero.
    pub fn new(min: f64, max: f64) -> Self {
        let max = if (max - min).abs() <= f64::EPSILON * max.abs().max(1.0) {
            min + 1.0
        } else {
            max
        };
        Self { min, max }
    }
}

impl Default for HeightRange {
    fn default() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}

/// Sidecar written next to the projected DEM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeightMeta {
    pub height_min: f64,
    pub height_max: f64,
    /// Ground extent in metres along x.
    pub size_x: f64,
    /// Ground extent in metres along the north axis.
    pub size_z: f64,
    pub utm: Crs,
    pub bbox: BoundingBox,
    pub width: i64,
    pub height: i64,
    pub tr: f64,
}

impl HeightMeta {
    pub fn new(
        range: HeightRange,
        info: &RasterInfo,
        utm: Crs,
        bbox: BoundingBox,
        tr: f64,
    ) -> Self {
        let [pixel_x, pixel_y] = info.pixel_size();
        Self {
            height_min: range.min,
            height_max: range.max,
            size_x: pixel_x.abs() * info.width as f64,
            size_z: pixel_y.abs() * info.height as f64,
            utm,
            bbox,
            width: info.width,
            height: info.height,
            tr,
        }
    }

    pub fn range(&self) -> HeightRange {
        HeightRange::new(self.height_min, self.height_max)
    }

    pub fn write(&self, path: &Path) -> Result<(), ForgeError> {
        write_json_atomic(path, self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub name: String,
    pub bbox: BoundingBox,
    pub utm: Crs,
    pub tile_size: u32,
    pub layers: BTreeMap<String, Layer>,
}

impl Manifest {
    pub fn new(name: impl Into<String>, bbox: BoundingBox, utm: Crs, tile_size: u32) -> Self {
        Self {
            name: name.into(),
            bbox,
            utm,
            tile_size,
            layers: BTreeMap::new(),
        }
    }

    pub fn with_layer(mut self, name: &str, layer: Layer) -> Self {
        self.layers.insert(name.to_string(), layer);
        self
    }

    /// Replaces whatever descriptor exists at `path`.
    pub fn write(&self, path: &Path) -> Result<(), ForgeError> {
        write_json_atomic(path, self)
    }

    pub fn read(path: &Path) -> Result<Self, ForgeError> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ForgeError::ConfigRead(path.to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| ForgeError::ConfigParse(err.to_string()))
    }
}
