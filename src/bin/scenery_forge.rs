use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use scenery_forge::assets::SystemFetcher;
use scenery_forge::catalog::{CatalogClient, HttpCatalogTransport};
use scenery_forge::config::{BboxEntry, Config, ConfigLoader, ResolvedConfig};
use scenery_forge::domain::{BoundingBox, ImageryProvider, StacPreset};
use scenery_forge::error::ForgeError;
use scenery_forge::output::{
    JsonOutput, LogSink, OutputMode, print_build_summary, print_preflight_summary,
};
use scenery_forge::pipeline::Pipeline;
use scenery_forge::raster::GdalCli;

#[derive(Parser)]
#[command(name = "scenery-forge")]
#[command(about = "Build imagery and elevation tile pyramids from STAC catalog scenes")]
#[command(version, author)]
struct Cli {
    /// Print the result as JSON instead of a summary.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download, mosaic and tile a scenery region")]
    Build(RegionArgs),
    #[command(about = "Search the catalog and report coverage without downloading")]
    Preflight(RegionArgs),
}

#[derive(Args, Clone, Default)]
struct RegionArgs {
    /// JSON region config; flags override its values.
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    name: Option<String>,

    /// `xmin,ymin,xmax,ymax` in degrees.
    #[arg(long, allow_hyphen_values = true)]
    bbox: Option<BoundingBox>,

    #[arg(long)]
    start: Option<String>,

    #[arg(long)]
    end: Option<String>,

    /// `EPSG:<code>` or `auto`.
    #[arg(long)]
    utm: Option<String>,

    #[arg(long)]
    imagery_tr: Option<f64>,

    #[arg(long)]
    dem_tr: Option<f64>,

    #[arg(long)]
    tile_size: Option<u32>,

    #[arg(long)]
    levels: Option<u32>,

    #[arg(long)]
    quality: Option<u8>,

    #[arg(long)]
    cloud_lt: Option<f64>,

    #[arg(long)]
    skip_cloud_filter: bool,

    #[arg(long, value_enum)]
    imagery_provider: Option<ImageryProvider>,

    #[arg(long)]
    collection: Option<String>,

    #[arg(long)]
    dem_collection: Option<String>,

    /// Asset key tried before the built-in preference order.
    #[arg(long)]
    asset: Option<String>,

    #[arg(long)]
    limit: Option<usize>,

    #[arg(long)]
    max_pages: Option<usize>,

    #[arg(long)]
    max_items: Option<usize>,

    #[arg(long, value_enum)]
    stac: Option<StacPreset>,

    #[arg(long, value_enum)]
    stac_fallback: Option<StacPreset>,

    #[arg(long)]
    stac_retries: Option<u32>,

    #[arg(long, value_enum)]
    asset_stac: Option<StacPreset>,

    #[arg(long)]
    fill_nodata: bool,

    #[arg(long)]
    coverage_grid: Option<usize>,

    /// Longest side of the albedo and height previews; 0 keeps full size.
    #[arg(long)]
    preview_max: Option<u32>,

    /// Cap for the mesh resolution written to terrain_preview.json.
    #[arg(long)]
    max_resolution: Option<u32>,

    #[arg(long)]
    out_root: Option<String>,

    #[arg(long)]
    skip_imagery: bool,

    #[arg(long)]
    reuse_imagery: bool,

    #[arg(long)]
    skip_dem: bool,

    #[arg(long)]
    skip_tiles: bool,

    #[arg(long)]
    keep_temp: bool,
}

impl RegionArgs {
    fn overrides(&self) -> Config {
        let flag = |set: bool| set.then_some(true);
        Config {
            name: self.name.clone(),
            bbox: self.bbox.map(|bbox| BboxEntry::Array(bbox.to_array())),
            start: self.start.clone(),
            end: self.end.clone(),
            utm: self.utm.clone(),
            imagery_tr: self.imagery_tr,
            dem_tr: self.dem_tr,
            tile_size: self.tile_size,
            levels: self.levels,
            quality: self.quality,
            cloud_lt: self.cloud_lt,
            skip_cloud_filter: flag(self.skip_cloud_filter),
            imagery_provider: self.imagery_provider,
            collection: self.collection.clone(),
            dem_collection: self.dem_collection.clone(),
            asset: self.asset.clone(),
            limit: self.limit,
            max_pages: self.max_pages,
            max_items: self.max_items,
            stac: self.stac,
            stac_fallback: self.stac_fallback,
            stac_retries: self.stac_retries,
            asset_stac: self.asset_stac,
            fill_nodata: flag(self.fill_nodata),
            coverage_grid: self.coverage_grid,
            preview_max: self.preview_max,
            max_resolution: self.max_resolution,
            out_root: self.out_root.clone(),
            skip_imagery: flag(self.skip_imagery),
            reuse_imagery: flag(self.reuse_imagery),
            skip_dem: flag(self.skip_dem),
            skip_tiles: flag(self.skip_tiles),
            keep_temp: flag(self.keep_temp),
            ..Config::default()
        }
    }

    fn resolve(&self) -> Result<ResolvedConfig, ForgeError> {
        ConfigLoader::resolve(self.config.as_deref(), self.overrides())
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<ForgeError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ForgeError) -> u8 {
    match error {
        ForgeError::InvalidOptions(_)
        | ForgeError::InvalidBoundingBox(_)
        | ForgeError::InvalidTimeRange(_)
        | ForgeError::InvalidCrs(_) => 2,
        ForgeError::NoScenesFound(_) => 3,
        ForgeError::MissingRasterSource(_) => 4,
        ForgeError::ToolMissing(_) => 5,
        ForgeError::Network(_)
        | ForgeError::CatalogStatus { .. }
        | ForgeError::CatalogDecode(_) => 6,
        ForgeError::InvalidRasterGeometry { .. } | ForgeError::RasterTool(_) => 7,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Summary
    };

    match cli.command {
        Commands::Build(args) => run_build(&args, output_mode),
        Commands::Preflight(args) => run_preflight(&args, output_mode),
    }
}

fn pipeline(
    config: &ResolvedConfig,
) -> Result<Pipeline<HttpCatalogTransport, SystemFetcher, GdalCli>, ForgeError> {
    let catalog = CatalogClient::new(
        HttpCatalogTransport::new()?,
        config.endpoints.clone(),
        config.retry,
    );
    Ok(Pipeline::new(catalog, SystemFetcher::new()?, GdalCli::new()))
}

fn run_build(args: &RegionArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = args.resolve()?;
    let result = pipeline(&config)?.build(&config, &LogSink)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_build(&result).into_diagnostic()?,
        OutputMode::Summary => print_build_summary(&result),
    }
    Ok(())
}

fn run_preflight(args: &RegionArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = args.resolve()?;
    let result = pipeline(&config)?.preflight(&config, &LogSink)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_preflight(&result).into_diagnostic()?,
        OutputMode::Summary => print_preflight_summary(&result),
    }
    Ok(())
}
