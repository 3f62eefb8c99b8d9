//! Scene selection over catalog search results.
//!
//! Items are grouped by the provider's spatial tiling cell and the clearest capture of each
//! cell is kept, so the union of the selection covers the searched area. When no item carries
//! a cell key the selector falls back to the single acquisition time whose items are clearest
//! on average, keeping every item of that capture.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::info;

use crate::domain::{CatalogItem, CloudCover};

/// Single-field cell keys, in priority order, tried after the composite MGRS triple.
const CELL_KEY_FIELDS: [&str; 3] = ["mgrs:tile", "s2:mgrs_tile", "s2:tile_id"];

/// Derives the spatial cell key from item properties.
///
/// `mgrs:utm_zone` + `mgrs:latitude_band` + `mgrs:grid_square` wins when all three are set,
/// then the first non-empty of [`CELL_KEY_FIELDS`].
pub fn derive_cell_key(properties: &Map<String, Value>) -> Option<String> {
    let part = |name: &str| properties.get(name).and_then(key_text);
    if let (Some(zone), Some(band), Some(square)) = (
        part("mgrs:utm_zone"),
        part("mgrs:latitude_band"),
        part("mgrs:grid_square"),
    ) {
        return Some(format!("{zone}{band}{square}"));
    }
    CELL_KEY_FIELDS.iter().find_map(|name| part(name))
}

fn key_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => {
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_string())
        }
        Value::Number(num) => match num.as_i64() {
            Some(int) => Some(int.to_string()),
            None => num.as_f64().map(|v| {
                if v.fract() == 0.0 {
                    format!("{}", v as i64)
                } else {
                    v.to_string()
                }
            }),
        },
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionMode {
    PerCell { cells: usize },
    TimeGroup { datetime: String, mean_cloud: f64 },
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub items: Vec<CatalogItem>,
    pub mode: SelectionMode,
}

pub struct SceneSelector;

impl SceneSelector {
    /// Returns `None` when no item is selectable.
    pub fn select(items: &[CatalogItem]) -> Option<Selection> {
        let cells = group_by_cell(items);
        let selection = if cells.is_empty() {
            Self::select_time_group(items)?
        } else {
            let chosen = cells
                .values()
                .filter_map(|group| best_in_cell(group))
                .cloned()
                .collect::<Vec<_>>();
            info!(
                selected = chosen.len(),
                cells = cells.len(),
                "selected items per tiling cell"
            );
            Selection {
                items: chosen,
                mode: SelectionMode::PerCell { cells: cells.len() },
            }
        };
        if selection.items.is_empty() {
            return None;
        }
        Some(selection)
    }

    fn select_time_group(items: &[CatalogItem]) -> Option<Selection> {
        let groups = group_by_datetime(items);
        let (datetime, group, mean_cloud) = groups
            .iter()
            .map(|(datetime, group)| (datetime, group, mean_cloud(group)))
            .min_by(|a, b| {
                a.2.total_cmp(&b.2)
                    .then_with(|| compare_time(a.1[0].acquired, b.1[0].acquired))
            })?;
        info!(
            datetime = %datetime,
            mean_cloud,
            items = group.len(),
            "selected acquisition time group"
        );
        Some(Selection {
            items: group.iter().map(|item| (*item).clone()).collect(),
            mode: SelectionMode::TimeGroup {
                datetime: datetime.clone(),
                mean_cloud,
            },
        })
    }
}

/// Items with a cell key, grouped by it. Keyless items are left out.
pub fn group_by_cell(items: &[CatalogItem]) -> BTreeMap<String, Vec<&CatalogItem>> {
    let mut groups: BTreeMap<String, Vec<&CatalogItem>> = BTreeMap::new();
    for item in items {
        if let Some(key) = &item.cell_key {
            groups.entry(key.clone()).or_default().push(item);
        }
    }
    groups
}

/// Items grouped by their exact `datetime` string. Items without one are left out.
pub fn group_by_datetime(items: &[CatalogItem]) -> BTreeMap<String, Vec<&CatalogItem>> {
    let mut groups: BTreeMap<String, Vec<&CatalogItem>> = BTreeMap::new();
    for item in items {
        if let Some(datetime) = &item.datetime {
            groups.entry(datetime.clone()).or_default().push(item);
        }
    }
    groups
}

/// Lowest cloud cover, then earliest acquisition. Untimed items are not candidates.
pub fn best_in_cell<'a>(group: &[&'a CatalogItem]) -> Option<&'a CatalogItem> {
    group
        .iter()
        .copied()
        .filter(|item| item.acquired.is_some())
        .min_by(|a, b| {
            a.cloud_cover
                .compare(&b.cloud_cover)
                .then_with(|| compare_time(a.acquired, b.acquired))
        })
}

fn mean_cloud(group: &[&CatalogItem]) -> f64 {
    if group.is_empty() {
        return CloudCover::MISSING_MEAN_VALUE;
    }
    let total: f64 = group.iter().map(|item| item.cloud_cover.mean_value()).sum();
    total / group.len() as f64
}

fn compare_time(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
