use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::catalog::{Endpoint, PageBounds, RetryPolicy};
use crate::domain::{BoundingBox, Crs, ImageryProvider, StacPreset, TimeRange};
use crate::error::ForgeError;

pub const DEFAULT_COLLECTION: &str = "sentinel-2-l2a";
pub const NAIP_COLLECTION: &str = "naip";
pub const DEFAULT_DEM_COLLECTION: &str = "cop-dem-glo-30";
pub const DEM_ASSET_KEY: &str = "data";

/// Region config as written on disk. Every field is optional; command line flags are merged
/// on top with [`Config::merge`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub bbox: Option<BboxEntry>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub utm: Option<String>,
    #[serde(default)]
    pub imagery_tr: Option<f64>,
    #[serde(default)]
    pub dem_tr: Option<f64>,
    #[serde(default)]
    pub tile_size: Option<u32>,
    #[serde(default)]
    pub levels: Option<u32>,
    #[serde(default)]
    pub quality: Option<u8>,
    #[serde(default)]
    pub cloud_lt: Option<f64>,
    #[serde(default)]
    pub skip_cloud_filter: Option<bool>,
    #[serde(default)]
    pub imagery_provider: Option<ImageryProvider>,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub dem_collection: Option<String>,
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub dem_limit: Option<usize>,
    #[serde(default)]
    pub max_pages: Option<usize>,
    #[serde(default)]
    pub max_items: Option<usize>,
    #[serde(default)]
    pub stac: Option<StacPreset>,
    #[serde(default)]
    pub stac_fallback: Option<StacPreset>,
    #[serde(default)]
    pub stac_retries: Option<u32>,
    #[serde(default)]
    pub stac_backoff: Option<f64>,
    #[serde(default)]
    pub asset_stac: Option<StacPreset>,
    #[serde(default)]
    pub asset_fallback: Option<StacPreset>,
    #[serde(default)]
    pub fill_nodata: Option<bool>,
    #[serde(default)]
    pub aws_sign: Option<bool>,
    #[serde(default)]
    pub coverage_grid: Option<usize>,
    #[serde(default)]
    pub preview_max: Option<u32>,
    #[serde(default)]
    pub max_resolution: Option<u32>,
    #[serde(default)]
    pub out_root: Option<String>,
    #[serde(default)]
    pub skip_imagery: Option<bool>,
    #[serde(default)]
    pub reuse_imagery: Option<bool>,
    #[serde(default)]
    pub skip_dem: Option<bool>,
    #[serde(default)]
    pub skip_tiles: Option<bool>,
    #[serde(default)]
    pub keep_temp: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum BboxEntry {
    Array([f64; 4]),
    Detailed {
        xmin: f64,
        ymin: f64,
        xmax: f64,
        ymax: f64,
    },
}

impl BboxEntry {
    pub fn to_bbox(self) -> Result<BoundingBox, ForgeError> {
        match self {
            BboxEntry::Array([xmin, ymin, xmax, ymax]) => BoundingBox::new(xmin, ymin, xmax, ymax),
            BboxEntry::Detailed {
                xmin,
                ymin,
                xmax,
                ymax,
            } => BoundingBox::new(xmin, ymin, xmax, ymax),
        }
    }
}

impl Config {
    /// Fields set in `overrides` win.
    pub fn merge(self, overrides: Config) -> Config {
        macro_rules! pick {
            ($($field:ident),* $(,)?) => {
                Config { $($field: overrides.$field.or(self.$field),)* }
            };
        }
        pick!(
            name,
            bbox,
            start,
            end,
            utm,
            imagery_tr,
            dem_tr,
            tile_size,
            levels,
            quality,
            cloud_lt,
            skip_cloud_filter,
            imagery_provider,
            collection,
            dem_collection,
            asset,
            limit,
            dem_limit,
            max_pages,
            max_items,
            stac,
            stac_fallback,
            stac_retries,
            stac_backoff,
            asset_stac,
            asset_fallback,
            fill_nodata,
            aws_sign,
            coverage_grid,
            preview_max,
            max_resolution,
            out_root,
            skip_imagery,
            reuse_imagery,
            skip_dem,
            skip_tiles,
            keep_temp,
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stages {
    pub skip_imagery: bool,
    pub reuse_imagery: bool,
    pub skip_dem: bool,
    pub skip_tiles: bool,
    pub keep_temp: bool,
}

/// Downscaled previews and the renderer descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewSettings {
    /// Longest preview side in pixels; `0` keeps the full size.
    pub max_dim: u32,
    /// Upper bound for the terrain mesh resolution in `terrain_preview.json`.
    pub max_resolution: u32,
}

#[derive(Debug, Clone)]
pub struct ImagerySource {
    pub collection: String,
    pub time_range: Option<TimeRange>,
    /// `None` when the cloud filter is skipped.
    pub cloud_lt: Option<f64>,
    pub preferred_asset: Option<String>,
    pub limit: usize,
    pub gsd: f64,
    pub quality: u8,
    pub signed_requests: bool,
    /// Where full items are fetched from. `None` means the endpoint that answered the search.
    pub asset_endpoint: Option<Endpoint>,
    pub secondary_endpoint: Option<Endpoint>,
}

#[derive(Debug, Clone)]
pub struct DemSource {
    pub collection: String,
    pub limit: usize,
    pub gsd: f64,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub name: String,
    pub bbox: BoundingBox,
    pub crs: Crs,
    pub tile_size: u32,
    pub levels: u32,
    pub imagery: ImagerySource,
    pub dem: DemSource,
    pub endpoints: Vec<Endpoint>,
    pub retry: RetryPolicy,
    pub page_bounds: PageBounds,
    pub fill_nodata: bool,
    pub coverage_grid: usize,
    pub preview: PreviewSettings,
    pub out_root: Utf8PathBuf,
    pub stages: Stages,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(path: &str) -> Result<Config, ForgeError> {
        let config_path = PathBuf::from(path);
        let content = fs::read_to_string(&config_path)
            .map_err(|_| ForgeError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| ForgeError::ConfigParse(err.to_string()))
    }

    /// Loads the optional config file, merges `overrides` and resolves defaults.
    pub fn resolve(path: Option<&str>, overrides: Config) -> Result<ResolvedConfig, ForgeError> {
        let base = match path {
            Some(path) => Self::load(path)?,
            None => Config::default(),
        };
        Self::resolve_config(base.merge(overrides))
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, ForgeError> {
        let name = config
            .name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| ForgeError::InvalidOptions("a scenery name is required".to_string()))?;
        let bbox = config
            .bbox
            .ok_or_else(|| ForgeError::InvalidOptions("a bounding box is required".to_string()))?
            .to_bbox()?;

        let tile_size = config.tile_size.unwrap_or(512);
        let levels = config.levels.unwrap_or(5);
        if tile_size == 0 || levels == 0 {
            return Err(ForgeError::InvalidOptions(
                "tile-size and levels must be positive".to_string(),
            ));
        }

        let stages = Stages {
            skip_imagery: config.skip_imagery.unwrap_or(false),
            reuse_imagery: config.reuse_imagery.unwrap_or(false),
            skip_dem: config.skip_dem.unwrap_or(false),
            skip_tiles: config.skip_tiles.unwrap_or(false),
            keep_temp: config.keep_temp.unwrap_or(false),
        };
        if stages.skip_imagery && stages.reuse_imagery {
            return Err(ForgeError::InvalidOptions(
                "use either --reuse-imagery or --skip-imagery, not both".to_string(),
            ));
        }

        let time_range = match (config.start.as_deref(), config.end.as_deref()) {
            (Some(start), Some(end)) => Some(TimeRange::parse(start, end)?),
            (None, None) => None,
            _ => {
                return Err(ForgeError::InvalidTimeRange(
                    "both start and end are required".to_string(),
                ));
            }
        };
        if time_range.is_none() && !stages.skip_imagery && !stages.reuse_imagery {
            return Err(ForgeError::InvalidOptions(
                "imagery requires --start and --end".to_string(),
            ));
        }

        let crs = match config.utm.as_deref().map(str::trim) {
            None | Some("auto") | Some("") => Crs::utm_for(&bbox),
            Some(value) => value.parse()?,
        };

        let provider = config.imagery_provider.unwrap_or_default();
        let mut collection = config
            .collection
            .unwrap_or_else(|| DEFAULT_COLLECTION.to_string());
        let mut skip_cloud = config.skip_cloud_filter.unwrap_or(false);
        let mut signed_requests = config.aws_sign.unwrap_or(false);
        if provider == ImageryProvider::Naip {
            if collection == DEFAULT_COLLECTION {
                collection = NAIP_COLLECTION.to_string();
            }
            skip_cloud = true;
            signed_requests = true;
        }

        let primary = config.stac.unwrap_or(StacPreset::EarthSearch);
        let mut endpoints = vec![preset_endpoint(primary)];
        if let Some(fallback) = config.stac_fallback.filter(|fallback| *fallback != primary) {
            endpoints.push(preset_endpoint(fallback));
        }

        let imagery = ImagerySource {
            collection,
            time_range,
            cloud_lt: (!skip_cloud).then(|| config.cloud_lt.unwrap_or(5.0)),
            preferred_asset: config.asset.filter(|asset| !asset.trim().is_empty()),
            limit: config.limit.unwrap_or(50),
            gsd: positive(config.imagery_tr.unwrap_or(10.0), "imagery-tr")?,
            quality: config.quality.unwrap_or(92).clamp(1, 100),
            signed_requests,
            asset_endpoint: config.asset_stac.map(preset_endpoint),
            secondary_endpoint: Some(preset_endpoint(
                config.asset_fallback.unwrap_or(StacPreset::EarthSearch),
            )),
        };
        let dem = DemSource {
            collection: config
                .dem_collection
                .unwrap_or_else(|| DEFAULT_DEM_COLLECTION.to_string()),
            limit: config.dem_limit.unwrap_or(100),
            gsd: positive(config.dem_tr.unwrap_or(30.0), "dem-tr")?,
        };

        Ok(ResolvedConfig {
            name,
            bbox,
            crs,
            tile_size,
            levels,
            imagery,
            dem,
            endpoints,
            retry: RetryPolicy {
                retries: config.stac_retries.unwrap_or(4),
                backoff: config.stac_backoff.unwrap_or(1.5),
            },
            page_bounds: PageBounds::new(
                config.max_pages.unwrap_or(10),
                config.max_items.unwrap_or(500),
            ),
            fill_nodata: config.fill_nodata.unwrap_or(false),
            coverage_grid: config.coverage_grid.unwrap_or(64).max(8),
            preview: PreviewSettings {
                max_dim: config.preview_max.unwrap_or(4096),
                max_resolution: config.max_resolution.unwrap_or(512),
            },
            out_root: Utf8PathBuf::from(
                config
                    .out_root
                    .unwrap_or_else(|| "assets/scenery".to_string()),
            ),
            stages,
        })
    }
}

pub fn preset_endpoint(preset: StacPreset) -> Endpoint {
    let name = match preset {
        StacPreset::EarthSearch => "earth-search",
        StacPreset::Planetary => "planetary",
    };
    Endpoint::new(name, preset.url())
}

fn positive(value: f64, flag: &str) -> Result<f64, ForgeError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ForgeError::InvalidOptions(format!("{flag} must be positive")))
    }
}
