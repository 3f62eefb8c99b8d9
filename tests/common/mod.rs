#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Value, json};

use scenery_forge::assets::{AssetFetcher, ObjectAccess};
use scenery_forge::catalog::{CatalogTransport, parse_feature};
use scenery_forge::domain::{AssetRef, BoundingBox, CatalogItem, Crs, ResampleKernel};
use scenery_forge::error::ForgeError;
use scenery_forge::pipeline::{ProgressEvent, ProgressSink};
use scenery_forge::raster::{BandStats, PixelWindow, RasterEngine, RasterInfo, TileEncoding};

pub const VALID_BYTES: usize = 2048;

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub method: &'static str,
    pub url: String,
    pub body: Option<Value>,
}

type Route = Box<dyn Fn(&str, Option<&Value>) -> Option<Result<Value, ForgeError>> + Send + Sync>;

/// Answers from a scripted queue first, then from routes. Unmatched requests get a 404.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Result<Value, ForgeError>>>,
    routes: Vec<Route>,
    pub calls: Mutex<Vec<Call>>,
}

impl MockTransport {
    pub fn scripted(responses: Vec<Result<Value, ForgeError>>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    pub fn with_route<R>(mut self, route: R) -> Self
    where
        R: Fn(&str, Option<&Value>) -> Option<Result<Value, ForgeError>> + Send + Sync + 'static,
    {
        self.routes.push(Box::new(route));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|call| call.url.clone())
            .collect()
    }

    fn respond(
        &self,
        method: &'static str,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Value, ForgeError> {
        self.calls.lock().unwrap().push(Call {
            method,
            url: url.to_string(),
            body: body.cloned(),
        });
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        for route in &self.routes {
            if let Some(response) = route(url, body) {
                return response;
            }
        }
        Err(ForgeError::CatalogStatus {
            status: 404,
            message: format!("no route for {url}"),
        })
    }
}

impl CatalogTransport for MockTransport {
    fn post_json(&self, url: &str, body: &Value) -> Result<Value, ForgeError> {
        self.respond("POST", url, Some(body))
    }

    fn get_json(&self, url: &str) -> Result<Value, ForgeError> {
        self.respond("GET", url, None)
    }
}

pub fn unavailable() -> ForgeError {
    ForgeError::CatalogStatus {
        status: 503,
        message: "Service Unavailable".to_string(),
    }
}

pub fn feature(id: &str, datetime: &str, cloud: Option<f64>, tile: Option<&str>) -> Value {
    let mut properties = json!({ "datetime": datetime });
    if let Some(cloud) = cloud {
        properties["eo:cloud_cover"] = json!(cloud);
    }
    if let Some(tile) = tile {
        properties["mgrs:tile"] = json!(tile);
    }
    json!({
        "id": id,
        "bbox": [-122.6, 37.5, -122.3, 37.9],
        "properties": properties,
        "assets": {
            "thumbnail": {"href": format!("https://example.com/{id}.jpg"), "roles": ["thumbnail"]},
            "visual": {"href": format!("s3://bucket/{id}/TCI.tif"), "roles": ["visual"]}
        }
    })
}

pub fn item(id: &str, datetime: &str, cloud: Option<f64>, tile: Option<&str>) -> CatalogItem {
    parse_feature(&feature(id, datetime, cloud, tile)).unwrap()
}

pub fn page(features: Vec<Value>, next: Option<Value>) -> Value {
    let mut links = vec![json!({"rel": "self", "href": "https://stac.test/search"})];
    if let Some(next) = next {
        links.push(next);
    }
    json!({
        "type": "FeatureCollection",
        "features": features,
        "links": links
    })
}

/// Writes a file the mock engine accepts as a raster.
pub fn write_raster(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, vec![b'R'; VALID_BYTES]).unwrap();
}

/// Writes a file large enough to pass the size check that the engine refuses to open.
pub fn write_corrupt(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, vec![b'X'; VALID_BYTES]).unwrap();
}

/// Fetcher that writes a valid raster unless the href contains `corrupt` or `tiny`.
#[derive(Default)]
pub struct MockFetcher {
    pub fetched: Mutex<Vec<(String, ObjectAccess)>>,
}

impl MockFetcher {
    pub fn count(&self) -> usize {
        self.fetched.lock().unwrap().len()
    }

    pub fn hrefs(&self) -> Vec<String> {
        self.fetched
            .lock()
            .unwrap()
            .iter()
            .map(|(href, _)| href.clone())
            .collect()
    }
}

impl AssetFetcher for MockFetcher {
    fn fetch(
        &self,
        asset: &AssetRef,
        access: ObjectAccess,
        destination: &Path,
    ) -> Result<(), ForgeError> {
        self.fetched
            .lock()
            .unwrap()
            .push((asset.href.clone(), access));
        if asset.href.contains("corrupt") {
            write_corrupt(destination);
        } else if asset.href.contains("tiny") {
            fs::write(destination, b"tiny").unwrap();
        } else {
            write_raster(destination);
        }
        Ok(())
    }
}

/// Raster engine that writes placeholder files and records each operation.
pub struct MockEngine {
    pub calls: Mutex<Vec<String>>,
    pub sizes: Mutex<HashMap<PathBuf, (i64, i64)>>,
    pub base_size: (i64, i64),
    pub bands: usize,
    pub stats: BandStats,
    pub fail_on: Option<&'static str>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            sizes: Mutex::new(HashMap::new()),
            base_size: (1000, 600),
            bands: 3,
            stats: BandStats {
                minimum: Some(-2.0),
                maximum: Some(780.0),
            },
            fail_on: None,
        }
    }
}

impl MockEngine {
    pub fn with_size(width: i64, height: i64) -> Self {
        Self {
            base_size: (width, height),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.split(' ').next() == Some(op))
            .count()
    }

    fn record(&self, op: &'static str, detail: String) -> Result<(), ForgeError> {
        self.calls.lock().unwrap().push(format!("{op} {detail}"));
        if self.fail_on == Some(op) {
            return Err(ForgeError::RasterTool(format!("{op} failed")));
        }
        Ok(())
    }

    fn produce(&self, op: &'static str, output: &Path) -> Result<(), ForgeError> {
        self.record(op, name(output))?;
        write_raster(output);
        Ok(())
    }
}

fn name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

impl RasterEngine for MockEngine {
    fn build_vrt(&self, _inputs: &[PathBuf], output: &Path) -> Result<(), ForgeError> {
        self.produce("build_vrt", output)
    }

    fn clip(
        &self,
        _input: &Path,
        _bbox: &BoundingBox,
        _kernel: ResampleKernel,
        output: &Path,
    ) -> Result<(), ForgeError> {
        self.produce("clip", output)
    }

    fn reproject(
        &self,
        _input: &Path,
        _crs: &Crs,
        _resolution: f64,
        _kernel: ResampleKernel,
        output: &Path,
    ) -> Result<(), ForgeError> {
        self.produce("reproject", output)
    }

    fn resize(
        &self,
        _input: &Path,
        width: u64,
        height: u64,
        _kernel: ResampleKernel,
        output: &Path,
    ) -> Result<(), ForgeError> {
        self.produce("resize", output)?;
        self.sizes
            .lock()
            .unwrap()
            .insert(output.to_path_buf(), (width as i64, height as i64));
        Ok(())
    }

    fn extract_window(
        &self,
        _input: &Path,
        window: PixelWindow,
        _encoding: TileEncoding,
        output: &Path,
    ) -> Result<(), ForgeError> {
        self.record(
            "extract_window",
            format!(
                "{} {} {} {} {}",
                name(output),
                window.xoff,
                window.yoff,
                window.width,
                window.height
            ),
        )?;
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(output, b"tile").unwrap();
        Ok(())
    }

    fn encode_preview(
        &self,
        _input: &Path,
        width: u64,
        height: u64,
        _encoding: TileEncoding,
        output: &Path,
    ) -> Result<(), ForgeError> {
        self.record("encode_preview", format!("{} {width} {height}", name(output)))?;
        write_raster(output);
        Ok(())
    }

    fn extract_band(&self, _input: &Path, band: usize, output: &Path) -> Result<(), ForgeError> {
        self.record("extract_band", band.to_string())?;
        write_raster(output);
        Ok(())
    }

    fn fill_nodata(&self, _input: &Path, output: &Path) -> Result<(), ForgeError> {
        self.produce("fill_nodata", output)
    }

    fn stack_bands(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ForgeError> {
        let names = inputs.iter().map(|path| name(path)).collect::<Vec<_>>();
        self.record("stack_bands", names.join(","))?;
        write_raster(output);
        Ok(())
    }

    fn rescale_u16(
        &self,
        _input: &Path,
        min: f64,
        max: f64,
        output: &Path,
    ) -> Result<(), ForgeError> {
        self.record("rescale_u16", format!("{min} {max}"))?;
        write_raster(output);
        Ok(())
    }

    fn info(&self, input: &Path, _with_stats: bool) -> Result<RasterInfo, ForgeError> {
        self.record("info", name(input))?;
        let (width, height) = self
            .sizes
            .lock()
            .unwrap()
            .get(input)
            .copied()
            .unwrap_or(self.base_size);
        let scale = if width > 0 {
            self.base_size.0 as f64 / width as f64
        } else {
            1.0
        };
        Ok(RasterInfo {
            width,
            height,
            geotransform: [545000.0, 10.0 * scale, 0.0, 4185000.0, 0.0, -10.0 * scale],
            bands: vec![self.stats; self.bands],
        })
    }

    fn probe(&self, input: &Path) -> bool {
        self.calls
            .lock()
            .unwrap()
            .push(format!("probe {}", name(input)));
        fs::read(input)
            .map(|bytes| bytes.first() == Some(&b'R'))
            .unwrap_or(false)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event.message);
    }
}
