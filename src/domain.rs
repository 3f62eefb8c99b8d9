use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, SecondsFormat, Utc};
use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ForgeError;

pub const EARTH_SEARCH: &str = "https://earth-search.aws.element84.com/v1";
pub const PLANETARY_STAC: &str = "https://planetarycomputer.microsoft.com/api/stac/v1";

/// Geographic bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    xmin: f64,
    ymin: f64,
    xmax: f64,
    ymax: f64,
}

impl BoundingBox {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Result<Self, ForgeError> {
        let finite = [xmin, ymin, xmax, ymax].iter().all(|v| v.is_finite());
        if !finite || xmin >= xmax || ymin >= ymax {
            return Err(ForgeError::InvalidBoundingBox(format!(
                "{xmin},{ymin},{xmax},{ymax}"
            )));
        }
        Ok(Self {
            xmin,
            ymin,
            xmax,
            ymax,
        })
    }

    pub fn xmin(&self) -> f64 {
        self.xmin
    }

    pub fn ymin(&self) -> f64 {
        self.ymin
    }

    pub fn xmax(&self) -> f64 {
        self.xmax
    }

    pub fn ymax(&self) -> f64 {
        self.ymax
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.xmin + self.xmax) * 0.5, (self.ymin + self.ymax) * 0.5)
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.xmin <= x && x <= self.xmax && self.ymin <= y && y <= self.ymax
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }
}

impl TryFrom<[f64; 4]> for BoundingBox {
    type Error = ForgeError;

    fn try_from(value: [f64; 4]) -> Result<Self, Self::Error> {
        Self::new(value[0], value[1], value[2], value[3])
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(value: BoundingBox) -> Self {
        value.to_array()
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.xmin, self.ymin, self.xmax, self.ymax)
    }
}

impl FromStr for BoundingBox {
    type Err = ForgeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts = value
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ForgeError::InvalidBoundingBox(value.to_string()))?;
        match parts.as_slice() {
            [xmin, ymin, xmax, ymax] => Self::new(*xmin, *ymin, *xmax, *ymax),
            _ => Err(ForgeError::InvalidBoundingBox(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ForgeError> {
        if start > end {
            return Err(ForgeError::InvalidTimeRange(format!(
                "start {} is after end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, ForgeError> {
        Self::new(parse_instant(start)?, parse_instant(end)?)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.start.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            self.end.to_rfc3339_opts(SecondsFormat::AutoSi, true)
        )
    }
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>, ForgeError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| ForgeError::InvalidTimeRange(format!("{value}: {err}")))
}

/// Parses a catalog `datetime` property. Returns `None` for anything that is not RFC 3339.
pub fn parse_acquisition_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Projected target CRS, always normalized to `EPSG:<code>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crs(String);

impl Crs {
    /// UTM zone containing the centre of `bbox` (WGS 84, north or south).
    pub fn utm_for(bbox: &BoundingBox) -> Self {
        let (lon, lat) = bbox.center();
        let zone = ((lon + 180.0) / 6.0).floor() as i64 + 1;
        let zone = zone.clamp(1, 60);
        let epsg = if lat >= 0.0 { 32600 + zone } else { 32700 + zone };
        Self(format!("EPSG:{epsg}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Crs {
    type Err = ForgeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        static EPSG: OnceLock<Regex> = OnceLock::new();
        let re = EPSG.get_or_init(|| Regex::new(r"(?i)^epsg:(\d{4,6})$").expect("valid regex"));
        let captures = re
            .captures(value.trim())
            .ok_or_else(|| ForgeError::InvalidCrs(value.to_string()))?;
        Ok(Self(format!("EPSG:{}", &captures[1])))
    }
}

/// Cloud cover percentage reported by the catalog, if any.
///
/// A missing value sorts after every reported value. When averaged it counts as
/// [`CloudCover::MISSING_MEAN_VALUE`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CloudCover(Option<f64>);

impl CloudCover {
    pub const MISSING_MEAN_VALUE: f64 = 1000.0;

    pub fn new(value: Option<f64>) -> Self {
        Self(value.filter(|v| v.is_finite()))
    }

    pub fn known(value: f64) -> Self {
        Self::new(Some(value))
    }

    pub fn missing() -> Self {
        Self(None)
    }

    pub fn value(&self) -> Option<f64> {
        self.0
    }

    pub fn mean_value(&self) -> f64 {
        self.0.unwrap_or(Self::MISSING_MEAN_VALUE)
    }

    pub fn compare(&self, other: &Self) -> Ordering {
        match (self.0, other.0) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetRef {
    pub key: String,
    pub href: String,
    pub roles: BTreeSet<String>,
    pub requester_pays: bool,
}

impl AssetRef {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn is_object_storage(&self) -> bool {
        self.href.starts_with("s3://")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogItem {
    pub id: String,
    pub bbox: Option<[f64; 4]>,
    /// Raw `datetime` property; grouping in fallback mode uses the exact string.
    pub datetime: Option<String>,
    pub acquired: Option<DateTime<Utc>>,
    pub cloud_cover: CloudCover,
    pub cell_key: Option<String>,
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// Assets in catalog order.
    pub assets: Vec<AssetRef>,
}

impl CatalogItem {
    pub fn covers(&self, x: f64, y: f64) -> bool {
        match self.bbox {
            Some([xmin, ymin, xmax, ymax]) => xmin <= x && x <= xmax && ymin <= y && y <= ymax,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TileFormat {
    Jpeg,
    Png,
}

impl TileFormat {
    pub fn driver(&self) -> &'static str {
        match self {
            TileFormat::Jpeg => "JPEG",
            TileFormat::Png => "PNG",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            TileFormat::Jpeg => "jpg",
            TileFormat::Png => "png",
        }
    }
}

impl fmt::Display for TileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ResampleKernel {
    Near,
    Bilinear,
    Cubic,
}

impl fmt::Display for ResampleKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResampleKernel::Near => write!(f, "near"),
            ResampleKernel::Bilinear => write!(f, "bilinear"),
            ResampleKernel::Cubic => write!(f, "cubic"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StacPreset {
    EarthSearch,
    Planetary,
}

impl StacPreset {
    pub fn url(&self) -> &'static str {
        match self {
            StacPreset::EarthSearch => EARTH_SEARCH,
            StacPreset::Planetary => PLANETARY_STAC,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ImageryProvider {
    #[default]
    S2,
    Naip,
}
