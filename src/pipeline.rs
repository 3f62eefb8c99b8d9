use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use crate::assets::{AssetFetcher, AssetResolver, ResolverSettings};
use crate::catalog::{CatalogClient, CatalogTransport, SearchOutcome, SearchQuery};
use crate::config::{DEM_ASSET_KEY, ResolvedConfig};
use crate::coverage::{CoverageReport, coverage};
use crate::domain::{ResampleKernel, TileFormat};
use crate::error::ForgeError;
use crate::fs_util::remove_dir_if_exists;
use crate::layout::SceneryLayout;
use crate::manifest::{ALBEDO_LAYER, HEIGHT_LAYER, HeightMeta, HeightRange, Layer, Manifest};
use crate::mosaic::{MosaicBuilder, MosaicPaths, MosaicRequest};
use crate::preview::{PreviewBuilder, TerrainPreview};
use crate::pyramid::{PyramidLayout, PyramidSpec, PyramidTiler, TileLevel};
use crate::raster::RasterEngine;
use crate::selector::SceneSelector;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    pub name: String,
    pub root: String,
    pub manifest: String,
    pub utm: String,
    pub imagery: Option<ImagerySummary>,
    pub height: Option<HeightSummary>,
    pub layers: Vec<LayerSummary>,
    pub previews: Vec<String>,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImagerySummary {
    pub reused: bool,
    pub found: usize,
    pub selected: usize,
    pub downloaded: usize,
    pub raster: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeightSummary {
    pub found: usize,
    pub downloaded: usize,
    pub raster: String,
    pub height_min: f64,
    pub height_max: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerSummary {
    pub layer: String,
    pub levels: usize,
    pub tiles: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreflightResult {
    pub name: String,
    pub utm: String,
    pub imagery: Option<LayerPreflight>,
    pub height: Option<LayerPreflight>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerPreflight {
    pub collection: String,
    pub endpoint: String,
    pub found: usize,
    pub selected: usize,
    pub coverage: CoverageReport,
}

/// Result of an imagery or height stage: the raster the pyramid is cut from.
struct StageRaster {
    raster: PathBuf,
    found: usize,
    selected: usize,
    downloaded: usize,
}

pub struct Pipeline<T: CatalogTransport, F: AssetFetcher, E: RasterEngine> {
    catalog: CatalogClient<T>,
    fetcher: F,
    engine: E,
}

impl<T: CatalogTransport, F: AssetFetcher, E: RasterEngine> Pipeline<T, F, E> {
    pub fn new(catalog: CatalogClient<T>, fetcher: F, engine: E) -> Self {
        Self {
            catalog,
            fetcher,
            engine,
        }
    }

    pub fn catalog(&self) -> &CatalogClient<T> {
        &self.catalog
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn build(
        &self,
        config: &ResolvedConfig,
        sink: &dyn ProgressSink,
    ) -> Result<BuildResult, ForgeError> {
        let started = Instant::now();
        self.engine.ensure_available(config.fill_nodata)?;
        let stages = config.stages;
        let layout = SceneryLayout::new(&config.out_root, &config.name);
        layout.ensure()?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Resolve; scenery {} at {} in {}",
                config.name,
                layout.root(),
                config.crs
            ),
            elapsed: None,
        });

        let imagery = if stages.skip_imagery {
            None
        } else if stages.reuse_imagery {
            let raster = layout.albedo_utm().into_std_path_buf();
            if !raster.exists() {
                return Err(ForgeError::MissingRasterSource(raster));
            }
            info!(path = %raster.display(), "reusing projected imagery");
            Some(ImagerySummary {
                reused: true,
                found: 0,
                selected: 0,
                downloaded: 0,
                raster: raster.display().to_string(),
            })
        } else {
            let stage = self.imagery_stage(config, &layout, sink)?;
            Some(ImagerySummary {
                reused: false,
                found: stage.found,
                selected: stage.selected,
                downloaded: stage.downloaded,
                raster: stage.raster.display().to_string(),
            })
        };

        let (height, height_meta) = if stages.skip_dem {
            (None, None)
        } else {
            let (summary, meta) = self.height_stage(config, &layout, sink)?;
            (Some(summary), Some(meta))
        };

        let previews = self.previews(
            config,
            &layout,
            imagery.is_some(),
            height_meta.as_ref(),
            sink,
        )?;

        let mut manifest = Manifest::new(
            config.name.clone(),
            config.bbox,
            config.crs.clone(),
            config.tile_size,
        );
        let mut layers = Vec::new();
        if !stages.skip_tiles {
            if imagery.is_some() {
                let levels = self.tile_layer(
                    config,
                    &layout,
                    &layout.albedo_utm().into_std_path_buf(),
                    layout.albedo_tiles().into_std_path_buf(),
                    TileFormat::Jpeg,
                    ResampleKernel::Cubic,
                    sink,
                )?;
                layers.push(layer_summary(ALBEDO_LAYER, &levels));
                manifest = manifest.with_layer(ALBEDO_LAYER, Layer::imagery(TileFormat::Jpeg, levels));
            }
            if let Some(height) = &height {
                let levels = self.tile_layer(
                    config,
                    &layout,
                    &layout.dem_uint16().into_std_path_buf(),
                    layout.height_tiles().into_std_path_buf(),
                    TileFormat::Png,
                    ResampleKernel::Bilinear,
                    sink,
                )?;
                layers.push(layer_summary(HEIGHT_LAYER, &levels));
                let range = HeightRange::new(height.height_min, height.height_max);
                manifest =
                    manifest.with_layer(HEIGHT_LAYER, Layer::height(TileFormat::Png, range, levels));
            }
        }

        // Only reached once every requested pyramid is complete.
        manifest.write(layout.manifest().as_std_path())?;
        sink.event(ProgressEvent {
            message: format!("phase=Manifest; wrote {}", layout.manifest()),
            elapsed: None,
        });

        if !stages.keep_temp {
            remove_dir_if_exists(layout.tmp_dir().as_std_path())?;
        }

        let elapsed = started.elapsed();
        sink.event(ProgressEvent {
            message: "phase=Done".to_string(),
            elapsed: Some(elapsed),
        });
        Ok(BuildResult {
            name: config.name.clone(),
            root: layout.root().to_string(),
            manifest: layout.manifest().to_string(),
            utm: config.crs.to_string(),
            imagery,
            height,
            layers,
            previews,
            elapsed_secs: elapsed.as_secs_f64(),
        })
    }

    /// Searches both layers and reports coverage without downloading anything.
    pub fn preflight(
        &self,
        config: &ResolvedConfig,
        sink: &dyn ProgressSink,
    ) -> Result<PreflightResult, ForgeError> {
        let imagery = match (config.stages.skip_imagery, config.imagery.time_range) {
            (false, Some(_)) => {
                let query = imagery_query(config);
                let outcome = self.search(&query, config, sink)?;
                let selected = SceneSelector::select(&outcome.items)
                    .map(|selection| selection.items.len())
                    .unwrap_or(0);
                Some(layer_preflight(config, &query, &outcome, selected))
            }
            _ => None,
        };
        let height = if config.stages.skip_dem {
            None
        } else {
            let query = dem_query(config);
            let outcome = self.search(&query, config, sink)?;
            let selected = outcome.items.len();
            Some(layer_preflight(config, &query, &outcome, selected))
        };
        Ok(PreflightResult {
            name: config.name.clone(),
            utm: config.crs.to_string(),
            imagery,
            height,
        })
    }

    fn imagery_stage(
        &self,
        config: &ResolvedConfig,
        layout: &SceneryLayout,
        sink: &dyn ProgressSink,
    ) -> Result<StageRaster, ForgeError> {
        let started = Instant::now();
        let source = &config.imagery;
        let query = imagery_query(config);
        let outcome = self.search(&query, config, sink)?;
        if outcome.items.is_empty() {
            return Err(ForgeError::NoScenesFound(describe(&query)));
        }
        let selection = SceneSelector::select(&outcome.items)
            .ok_or_else(|| ForgeError::NoScenesFound(describe(&query)))?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Select; {} of {} scenes",
                selection.items.len(),
                outcome.items.len()
            ),
            elapsed: None,
        });

        let resolver = AssetResolver::new(
            &self.catalog,
            &self.fetcher,
            &self.engine,
            ResolverSettings {
                collection: source.collection.clone(),
                preferred_key: source.preferred_asset.clone(),
                asset_endpoint: Some(
                    source
                        .asset_endpoint
                        .clone()
                        .unwrap_or_else(|| outcome.endpoint.clone()),
                ),
                secondary_endpoint: source.secondary_endpoint.clone(),
                signed_requests: source.signed_requests,
            },
        );
        let rasters = resolver.download_all(
            &selection.items,
            layout.imagery_downloads().as_std_path(),
            |item| format!("{}_visual.tif", item.id),
        )?;
        if rasters.is_empty() {
            return Err(ForgeError::NoScenesFound(format!(
                "none of the {} selected scenes produced a valid raster",
                selection.items.len()
            )));
        }

        let raster = self.mosaic(
            config,
            layout,
            &rasters,
            "albedo",
            source.gsd,
            ResampleKernel::Cubic,
            layout.albedo_utm().as_std_path(),
        )?;
        sink.event(ProgressEvent {
            message: format!("phase=Imagery; mosaic {}", raster.display()),
            elapsed: Some(started.elapsed()),
        });
        Ok(StageRaster {
            raster,
            found: outcome.items.len(),
            selected: selection.items.len(),
            downloaded: rasters.len(),
        })
    }

    fn height_stage(
        &self,
        config: &ResolvedConfig,
        layout: &SceneryLayout,
        sink: &dyn ProgressSink,
    ) -> Result<(HeightSummary, HeightMeta), ForgeError> {
        let started = Instant::now();
        let query = dem_query(config);
        let outcome = self.search(&query, config, sink)?;
        if outcome.items.is_empty() {
            return Err(ForgeError::NoScenesFound(describe(&query)));
        }

        let resolver = AssetResolver::new(
            &self.catalog,
            &self.fetcher,
            &self.engine,
            ResolverSettings {
                collection: config.dem.collection.clone(),
                preferred_key: Some(DEM_ASSET_KEY.to_string()),
                asset_endpoint: None,
                secondary_endpoint: None,
                signed_requests: false,
            },
        );
        let rasters = resolver.download_all(
            &outcome.items,
            layout.dem_downloads().as_std_path(),
            |item| format!("{}.tif", item.id),
        )?;
        if rasters.is_empty() {
            return Err(ForgeError::NoScenesFound(format!(
                "none of the {} elevation tiles produced a valid raster",
                outcome.items.len()
            )));
        }

        let dem = self.mosaic(
            config,
            layout,
            &rasters,
            "dem",
            config.dem.gsd,
            ResampleKernel::Bilinear,
            layout.dem_utm().as_std_path(),
        )?;
        let stage = StageRaster {
            raster: dem,
            found: outcome.items.len(),
            selected: outcome.items.len(),
            downloaded: rasters.len(),
        };

        let info = self.engine.info(&stage.raster, true)?;
        let band = info.bands.first().ok_or_else(|| {
            ForgeError::RasterTool(format!("no bands in {}", stage.raster.display()))
        })?;
        let range = HeightRange::new(
            band.minimum.unwrap_or(HeightRange::default().min),
            band.maximum.unwrap_or(HeightRange::default().max),
        );
        info!(min = range.min, max = range.max, "elevation range");
        let meta = HeightMeta::new(
            range,
            &info,
            config.crs.clone(),
            config.bbox,
            config.dem.gsd,
        );
        meta.write(layout.dem_meta().as_std_path())?;

        let uint16 = layout.dem_uint16().into_std_path_buf();
        if uint16.exists() {
            info!(path = %uint16.display(), "UInt16 heightmap already exists");
        } else {
            self.engine
                .rescale_u16(&stage.raster, range.min, range.max, &uint16)?;
        }

        sink.event(ProgressEvent {
            message: format!(
                "phase=Height; {} of {} tiles mosaicked",
                stage.downloaded, stage.selected
            ),
            elapsed: Some(started.elapsed()),
        });
        let summary = HeightSummary {
            found: stage.found,
            downloaded: stage.downloaded,
            raster: uint16.display().to_string(),
            height_min: range.min,
            height_max: range.max,
        };
        Ok((summary, meta))
    }

    /// Downscaled albedo and height images plus `terrain_preview.json`. The descriptor needs
    /// the elevation metadata, so it is only written when the height stage ran.
    fn previews(
        &self,
        config: &ResolvedConfig,
        layout: &SceneryLayout,
        with_albedo: bool,
        height_meta: Option<&HeightMeta>,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<String>, ForgeError> {
        let builder = PreviewBuilder::new(&self.engine, config.preview.max_dim);
        let mut written = Vec::new();
        if with_albedo {
            builder.albedo(
                layout.albedo_utm().as_std_path(),
                layout.albedo_texture().as_std_path(),
                layout.albedo_preview().as_std_path(),
                config.imagery.quality,
            )?;
            written.push(layout.albedo_texture().to_string());
            written.push(layout.albedo_preview().to_string());
        }
        if let Some(meta) = height_meta {
            let size = builder.height(
                layout.dem_uint16().as_std_path(),
                layout.height_preview().as_std_path(),
            )?;
            written.push(layout.height_preview().to_string());
            TerrainPreview::new(meta, config.preview.max_resolution, size, with_albedo)
                .write(layout.terrain_preview().as_std_path())?;
            written.push(layout.terrain_preview().to_string());
        }
        if !written.is_empty() {
            sink.event(ProgressEvent {
                message: format!("phase=Preview; {} files", written.len()),
                elapsed: None,
            });
        }
        Ok(written)
    }

    fn search(
        &self,
        query: &SearchQuery,
        config: &ResolvedConfig,
        sink: &dyn ProgressSink,
    ) -> Result<SearchOutcome, ForgeError> {
        sink.event(ProgressEvent {
            message: format!("phase=Search; {}", describe(query)),
            elapsed: None,
        });
        self.catalog.search(query, config.page_bounds)
    }

    /// Mosaics `rasters` and leaves the result at `target`. A filled raster replaces the
    /// unfilled projection.
    #[allow(clippy::too_many_arguments)]
    fn mosaic(
        &self,
        config: &ResolvedConfig,
        layout: &SceneryLayout,
        rasters: &[PathBuf],
        stem: &str,
        gsd: f64,
        kernel: ResampleKernel,
        target: &Path,
    ) -> Result<PathBuf, ForgeError> {
        let request = MosaicRequest {
            rasters,
            bbox: config.bbox,
            crs: &config.crs,
            gsd,
            kernel,
            fill_nodata: config.fill_nodata,
        };
        let paths = MosaicPaths::new(layout.tmp_dir().as_std_path(), stem, target.to_path_buf());
        let built =
            MosaicBuilder::new(&self.engine, config.stages.keep_temp).build(&request, &paths)?;
        if built != target {
            fs::rename(&built, target).map_err(|err| {
                ForgeError::Filesystem(format!("move {}: {err}", built.display()))
            })?;
        }
        Ok(target.to_path_buf())
    }

    #[allow(clippy::too_many_arguments)]
    fn tile_layer(
        &self,
        config: &ResolvedConfig,
        layout: &SceneryLayout,
        source: &Path,
        tiles_dir: PathBuf,
        format: TileFormat,
        kernel: ResampleKernel,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<TileLevel>, ForgeError> {
        let started = Instant::now();
        let spec = PyramidSpec {
            tile_size: config.tile_size,
            levels: config.levels,
            format,
            kernel,
            quality: config.imagery.quality,
        };
        let pyramid = PyramidLayout {
            tiles_dir,
            tmp_dir: layout.tmp_dir().into_std_path_buf(),
            rel_root: layout.root().as_std_path().to_path_buf(),
        };
        let levels =
            PyramidTiler::new(&self.engine, config.stages.keep_temp).build(source, &spec, &pyramid)?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Tiles; {} levels from {}",
                levels.len(),
                source.display()
            ),
            elapsed: Some(started.elapsed()),
        });
        Ok(levels)
    }
}

fn imagery_query(config: &ResolvedConfig) -> SearchQuery {
    SearchQuery {
        collection: config.imagery.collection.clone(),
        bbox: config.bbox,
        time_range: config.imagery.time_range,
        cloud_lt: config.imagery.cloud_lt,
        limit: config.imagery.limit,
    }
}

fn dem_query(config: &ResolvedConfig) -> SearchQuery {
    SearchQuery {
        collection: config.dem.collection.clone(),
        bbox: config.bbox,
        time_range: None,
        cloud_lt: None,
        limit: config.dem.limit,
    }
}

fn describe(query: &SearchQuery) -> String {
    let mut text = format!("{} in {}", query.collection, query.bbox);
    if let Some(range) = &query.time_range {
        text.push_str(&format!(" during {range}"));
    }
    if let Some(cloud_lt) = query.cloud_lt {
        text.push_str(&format!(" with cloud cover < {cloud_lt}"));
    }
    text
}

fn layer_preflight(
    config: &ResolvedConfig,
    query: &SearchQuery,
    outcome: &SearchOutcome,
    selected: usize,
) -> LayerPreflight {
    let report = coverage(&outcome.items, &config.bbox, config.coverage_grid);
    info!(
        collection = %query.collection,
        found = outcome.items.len(),
        coverage = report.percent,
        "preflight"
    );
    LayerPreflight {
        collection: query.collection.clone(),
        endpoint: outcome.endpoint.name.clone(),
        found: outcome.items.len(),
        selected,
        coverage: report,
    }
}

fn layer_summary(layer: &str, levels: &[TileLevel]) -> LayerSummary {
    LayerSummary {
        layer: layer.to_string(),
        levels: levels.len(),
        tiles: levels.iter().map(|level| level.tiles_x * level.tiles_y).sum(),
    }
}
