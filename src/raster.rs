use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value;
use tracing::debug;

use crate::domain::{BoundingBox, Crs, ResampleKernel, TileFormat};
use crate::error::ForgeError;
use crate::fs_util::{find_in_path, remove_file_if_exists};

const GIS_ORDER: [&str; 3] = ["--config", "OGR_CT_FORCE_TRADITIONAL_GIS_ORDER", "YES"];
pub const GEOGRAPHIC_CRS: &str = "EPSG:4326";

pub const TOOL_INFO: &str = "gdalinfo";
pub const TOOL_TRANSLATE: &str = "gdal_translate";
pub const TOOL_WARP: &str = "gdalwarp";
pub const TOOL_BUILD_VRT: &str = "gdalbuildvrt";
pub const TOOL_FILL_NODATA: &str = "gdal_fillnodata.py";
pub const TOOL_MERGE: &str = "gdal_merge.py";

pub const CORE_TOOLS: [&str; 4] = [TOOL_INFO, TOOL_TRANSLATE, TOOL_WARP, TOOL_BUILD_VRT];
pub const FILL_TOOLS: [&str; 2] = [TOOL_FILL_NODATA, TOOL_MERGE];

/// Pixel window `[xoff, yoff, width, height]` within a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub xoff: u64,
    pub yoff: u64,
    pub width: u64,
    pub height: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileEncoding {
    pub format: TileFormat,
    pub quality: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BandStats {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RasterInfo {
    pub width: i64,
    pub height: i64,
    pub geotransform: [f64; 6],
    pub bands: Vec<BandStats>,
}

impl RasterInfo {
    pub fn origin(&self) -> [f64; 2] {
        [self.geotransform[0], self.geotransform[3]]
    }

    pub fn pixel_size(&self) -> [f64; 2] {
        [self.geotransform[1], self.geotransform[5]]
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }
}

/// Raster operations delegated to an external engine.
pub trait RasterEngine {
    fn build_vrt(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ForgeError>;
    /// Clips to `bbox` in geographic coordinates, output stays in [`GEOGRAPHIC_CRS`].
    fn clip(
        &self,
        input: &Path,
        bbox: &BoundingBox,
        kernel: ResampleKernel,
        output: &Path,
    ) -> Result<(), ForgeError>;
    fn reproject(
        &self,
        input: &Path,
        crs: &Crs,
        resolution: f64,
        kernel: ResampleKernel,
        output: &Path,
    ) -> Result<(), ForgeError>;
    fn resize(
        &self,
        input: &Path,
        width: u64,
        height: u64,
        kernel: ResampleKernel,
        output: &Path,
    ) -> Result<(), ForgeError>;
    fn extract_window(
        &self,
        input: &Path,
        window: PixelWindow,
        encoding: TileEncoding,
        output: &Path,
    ) -> Result<(), ForgeError>;
    /// Resamples the whole raster to `width` x `height` and encodes it as an image file.
    fn encode_preview(
        &self,
        input: &Path,
        width: u64,
        height: u64,
        encoding: TileEncoding,
        output: &Path,
    ) -> Result<(), ForgeError>;
    /// Copies band `band` (1-based) into a single-band raster.
    fn extract_band(&self, input: &Path, band: usize, output: &Path) -> Result<(), ForgeError>;
    /// Single-band only.
    fn fill_nodata(&self, input: &Path, output: &Path) -> Result<(), ForgeError>;
    fn stack_bands(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ForgeError>;
    fn rescale_u16(
        &self,
        input: &Path,
        min: f64,
        max: f64,
        output: &Path,
    ) -> Result<(), ForgeError>;
    fn info(&self, input: &Path, with_stats: bool) -> Result<RasterInfo, ForgeError>;
    /// True when the engine can open `input` as a raster.
    fn probe(&self, input: &Path) -> bool;

    /// Checked once before any stage runs.
    fn ensure_available(&self, _fill_nodata: bool) -> Result<(), ForgeError> {
        Ok(())
    }
}

/// [`RasterEngine`] backed by the GDAL command line utilities.
#[derive(Debug, Clone)]
pub struct GdalCli {
    tools: BTreeMap<&'static str, PathBuf>,
}

impl GdalCli {
    pub fn new() -> Self {
        let tools = CORE_TOOLS
            .iter()
            .chain(FILL_TOOLS.iter())
            .filter_map(|name| find_in_path(name).map(|path| (*name, path)))
            .collect();
        Self { tools }
    }

    /// Fails with the first missing tool name.
    pub fn require(&self, names: &[&str]) -> Result<(), ForgeError> {
        let missing = names
            .iter()
            .filter(|name| !self.tools.contains_key(*name))
            .copied()
            .collect::<Vec<_>>();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ForgeError::ToolMissing(missing.join(", ")))
        }
    }

    fn tool(&self, name: &str) -> Result<&Path, ForgeError> {
        self.tools
            .get(name)
            .map(PathBuf::as_path)
            .ok_or_else(|| ForgeError::ToolMissing(name.to_string()))
    }

    fn run(&self, name: &str, args: &[String]) -> Result<Vec<u8>, ForgeError> {
        let program = self.tool(name)?;
        debug!(tool = name, args = %args.join(" "), "running raster tool");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| ForgeError::RasterTool(format!("{name}: {err}")))?;
        if output.status.success() {
            return Ok(output.stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("command failed: {name}")
        } else {
            format!("{name}: {stderr}")
        };
        Err(ForgeError::RasterTool(message))
    }
}

impl Default for GdalCli {
    fn default() -> Self {
        Self::new()
    }
}

fn gis_order() -> Vec<String> {
    GIS_ORDER.iter().map(|arg| arg.to_string()).collect()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn build_vrt_args(inputs: &[PathBuf], output: &Path) -> Vec<String> {
    let mut args = gis_order();
    args.push("-overwrite".to_string());
    args.push(path_arg(output));
    args.extend(inputs.iter().map(|path| path_arg(path)));
    args
}

fn clip_args(
    input: &Path,
    bbox: &BoundingBox,
    kernel: ResampleKernel,
    output: &Path,
) -> Vec<String> {
    let mut args = vec!["-overwrite".to_string()];
    args.extend(gis_order());
    args.extend(["-t_srs".to_string(), GEOGRAPHIC_CRS.to_string()]);
    args.push("-te".to_string());
    args.extend(bbox.to_array().iter().map(|v| v.to_string()));
    args.extend(["-te_srs".to_string(), GEOGRAPHIC_CRS.to_string()]);
    args.extend(["-r".to_string(), kernel.to_string()]);
    args.extend([path_arg(input), path_arg(output)]);
    args
}

fn reproject_args(
    input: &Path,
    crs: &Crs,
    resolution: f64,
    kernel: ResampleKernel,
    output: &Path,
) -> Vec<String> {
    let mut args = vec!["-overwrite".to_string()];
    args.extend(gis_order());
    args.extend(["-t_srs".to_string(), crs.to_string()]);
    args.extend([
        "-tr".to_string(),
        resolution.to_string(),
        resolution.to_string(),
    ]);
    args.extend(["-r".to_string(), kernel.to_string()]);
    args.extend([path_arg(input), path_arg(output)]);
    args
}

fn resize_args(
    input: &Path,
    width: u64,
    height: u64,
    kernel: ResampleKernel,
    output: &Path,
) -> Vec<String> {
    let mut args = gis_order();
    args.extend(["-of".to_string(), "GTiff".to_string()]);
    args.extend(["-r".to_string(), kernel.to_string()]);
    args.extend(["-outsize".to_string(), width.to_string(), height.to_string()]);
    args.extend([path_arg(input), path_arg(output)]);
    args
}

/// Driver and creation options. JPEG output keeps the first three bands only.
fn encoding_args(encoding: TileEncoding) -> Vec<String> {
    let mut args = vec!["-of".to_string(), encoding.format.driver().to_string()];
    match encoding.format {
        TileFormat::Jpeg => {
            for band in 1..=3 {
                args.extend(["-b".to_string(), band.to_string()]);
            }
            args.extend(["-co".to_string(), format!("QUALITY={}", encoding.quality)]);
            args.extend(["-co".to_string(), "PHOTOMETRIC=YCBCR".to_string()]);
        }
        TileFormat::Png => {
            args.extend(["-co".to_string(), "ZLEVEL=6".to_string()]);
        }
    }
    args
}

fn extract_window_args(
    input: &Path,
    window: PixelWindow,
    encoding: TileEncoding,
    output: &Path,
) -> Vec<String> {
    let mut args = gis_order();
    args.push("-q".to_string());
    args.extend([
        "-srcwin".to_string(),
        window.xoff.to_string(),
        window.yoff.to_string(),
        window.width.to_string(),
        window.height.to_string(),
    ]);
    args.extend(encoding_args(encoding));
    args.extend([path_arg(input), path_arg(output)]);
    args
}

fn encode_preview_args(
    input: &Path,
    width: u64,
    height: u64,
    encoding: TileEncoding,
    output: &Path,
) -> Vec<String> {
    let mut args = gis_order();
    args.extend(encoding_args(encoding));
    args.extend(["-outsize".to_string(), width.to_string(), height.to_string()]);
    args.extend([path_arg(input), path_arg(output)]);
    args
}

fn extract_band_args(input: &Path, band: usize, output: &Path) -> Vec<String> {
    vec![
        "-b".to_string(),
        band.to_string(),
        path_arg(input),
        path_arg(output),
    ]
}

fn stack_bands_args(inputs: &[PathBuf], output: &Path) -> Vec<String> {
    let mut args = vec!["-separate".to_string(), "-o".to_string(), path_arg(output)];
    args.extend(inputs.iter().map(|path| path_arg(path)));
    args
}

fn rescale_u16_args(input: &Path, min: f64, max: f64, output: &Path) -> Vec<String> {
    let mut args = gis_order();
    args.extend(["-of".to_string(), "GTiff".to_string()]);
    args.extend(["-ot".to_string(), "UInt16".to_string()]);
    args.extend([
        "-scale".to_string(),
        min.to_string(),
        max.to_string(),
        "0".to_string(),
        "65535".to_string(),
    ]);
    args.extend([path_arg(input), path_arg(output)]);
    args
}

impl RasterEngine for GdalCli {
    fn build_vrt(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ForgeError> {
        self.run(TOOL_BUILD_VRT, &build_vrt_args(inputs, output))
            .map(|_| ())
    }

    fn clip(
        &self,
        input: &Path,
        bbox: &BoundingBox,
        kernel: ResampleKernel,
        output: &Path,
    ) -> Result<(), ForgeError> {
        self.run(TOOL_WARP, &clip_args(input, bbox, kernel, output))
            .map(|_| ())
    }

    fn reproject(
        &self,
        input: &Path,
        crs: &Crs,
        resolution: f64,
        kernel: ResampleKernel,
        output: &Path,
    ) -> Result<(), ForgeError> {
        let args = reproject_args(input, crs, resolution, kernel, output);
        self.run(TOOL_WARP, &args).map(|_| ())
    }

    fn resize(
        &self,
        input: &Path,
        width: u64,
        height: u64,
        kernel: ResampleKernel,
        output: &Path,
    ) -> Result<(), ForgeError> {
        let args = resize_args(input, width, height, kernel, output);
        self.run(TOOL_TRANSLATE, &args).map(|_| ())
    }

    fn extract_window(
        &self,
        input: &Path,
        window: PixelWindow,
        encoding: TileEncoding,
        output: &Path,
    ) -> Result<(), ForgeError> {
        let args = extract_window_args(input, window, encoding, output);
        self.run(TOOL_TRANSLATE, &args).map(|_| ())
    }

    fn encode_preview(
        &self,
        input: &Path,
        width: u64,
        height: u64,
        encoding: TileEncoding,
        output: &Path,
    ) -> Result<(), ForgeError> {
        let args = encode_preview_args(input, width, height, encoding, output);
        self.run(TOOL_TRANSLATE, &args).map(|_| ())
    }

    fn extract_band(&self, input: &Path, band: usize, output: &Path) -> Result<(), ForgeError> {
        self.run(TOOL_TRANSLATE, &extract_band_args(input, band, output))
            .map(|_| ())
    }

    fn fill_nodata(&self, input: &Path, output: &Path) -> Result<(), ForgeError> {
        let args = vec!["-q".to_string(), path_arg(input), path_arg(output)];
        self.run(TOOL_FILL_NODATA, &args).map(|_| ())
    }

    fn stack_bands(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ForgeError> {
        // gdal_merge refuses to overwrite an existing output.
        remove_file_if_exists(output)?;
        self.run(TOOL_MERGE, &stack_bands_args(inputs, output))
            .map(|_| ())
    }

    fn rescale_u16(
        &self,
        input: &Path,
        min: f64,
        max: f64,
        output: &Path,
    ) -> Result<(), ForgeError> {
        self.run(TOOL_TRANSLATE, &rescale_u16_args(input, min, max, output))
            .map(|_| ())
    }

    fn info(&self, input: &Path, with_stats: bool) -> Result<RasterInfo, ForgeError> {
        let mut args = vec!["-json".to_string()];
        if with_stats {
            args.push("-stats".to_string());
        }
        args.push(path_arg(input));
        let stdout = self.run(TOOL_INFO, &args)?;
        let value: Value = serde_json::from_slice(&stdout)
            .map_err(|err| ForgeError::RasterTool(format!("gdalinfo json: {err}")))?;
        Ok(parse_info(&value))
    }

    fn probe(&self, input: &Path) -> bool {
        self.run(TOOL_INFO, &[path_arg(input)]).is_ok()
    }

    fn ensure_available(&self, fill_nodata: bool) -> Result<(), ForgeError> {
        self.require(&CORE_TOOLS)?;
        if fill_nodata {
            self.require(&FILL_TOOLS)?;
        }
        Ok(())
    }
}

/// Reads size, geotransform and band statistics from `gdalinfo -json` output.
pub fn parse_info(value: &Value) -> RasterInfo {
    let size = value.get("size").and_then(Value::as_array);
    let dim = |index: usize| {
        size.and_then(|size| size.get(index))
            .and_then(Value::as_i64)
            .unwrap_or(0)
    };
    let mut geotransform = [0.0, 1.0, 0.0, 0.0, 0.0, -1.0];
    if let Some(values) = value.get("geoTransform").and_then(Value::as_array) {
        for (slot, entry) in geotransform.iter_mut().zip(values.iter()) {
            if let Some(number) = entry.as_f64() {
                *slot = number;
            }
        }
    }
    let bands = value
        .get("bands")
        .and_then(Value::as_array)
        .map(|bands| bands.iter().map(band_stats).collect())
        .unwrap_or_default();
    RasterInfo {
        width: dim(0),
        height: dim(1),
        geotransform,
        bands,
    }
}

fn band_stats(band: &Value) -> BandStats {
    let direct = |key: &str| {
        band.get(key)
            .and_then(Value::as_f64)
            .or_else(|| band.get("statistics")?.get(key)?.as_f64())
    };
    let from_metadata = |key: &str| {
        let raw = band.get("metadata")?.get("")?.get(key)?;
        raw.as_f64()
            .or_else(|| raw.as_str().and_then(|text| text.trim().parse().ok()))
    };
    BandStats {
        minimum: direct("minimum").or_else(|| from_metadata("STATISTICS_MINIMUM")),
        maximum: direct("maximum").or_else(|| from_metadata("STATISTICS_MAXIMUM")),
    }
}
