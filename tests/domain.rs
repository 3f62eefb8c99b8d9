use std::str::FromStr;

use assert_matches::assert_matches;

use scenery_forge::domain::{BoundingBox, CloudCover, Crs, TimeRange};
use scenery_forge::error::ForgeError;

#[test]
fn bbox_parses_comma_list() {
    let bbox = BoundingBox::from_str("-122.6, 37.5,-122.3,37.9").unwrap();
    assert_eq!(bbox.to_array(), [-122.6, 37.5, -122.3, 37.9]);
    assert!(bbox.contains(-122.6, 37.9));
    assert!(!bbox.contains(-122.7, 37.7));
}

#[test]
fn bbox_rejects_degenerate_and_malformed() {
    assert_matches!(
        BoundingBox::new(1.0, 0.0, 1.0, 1.0),
        Err(ForgeError::InvalidBoundingBox(_))
    );
    assert_matches!(
        BoundingBox::from_str("1,2,3"),
        Err(ForgeError::InvalidBoundingBox(_))
    );
    assert_matches!(
        BoundingBox::new(f64::NAN, 0.0, 1.0, 1.0),
        Err(ForgeError::InvalidBoundingBox(_))
    );
}

#[test]
fn utm_zone_follows_bbox_centre() {
    let north = BoundingBox::new(-122.6, 37.5, -122.3, 37.9).unwrap();
    assert_eq!(Crs::utm_for(&north).as_str(), "EPSG:32610");
    let south = BoundingBox::new(151.0, -34.0, 151.3, -33.7).unwrap();
    assert_eq!(Crs::utm_for(&south).as_str(), "EPSG:32756");
}

#[test]
fn crs_accepts_epsg_codes_only() {
    assert_eq!(Crs::from_str("epsg:32610").unwrap().as_str(), "EPSG:32610");
    assert_matches!(Crs::from_str("WGS84"), Err(ForgeError::InvalidCrs(_)));
}

#[test]
fn time_range_renders_interval() {
    let range = TimeRange::parse("2025-06-01T00:00:00Z", "2025-10-31T23:59:59+00:00").unwrap();
    assert_eq!(range.to_string(), "2025-06-01T00:00:00Z/2025-10-31T23:59:59Z");
    assert_matches!(
        TimeRange::parse("2025-06-01", "2025-10-31T00:00:00Z"),
        Err(ForgeError::InvalidTimeRange(_))
    );
}

#[test]
fn missing_cloud_cover_sorts_last() {
    let mut values = vec![CloudCover::missing(), CloudCover::known(4.0), CloudCover::known(0.5)];
    values.sort_by(|a, b| a.compare(b));
    assert_eq!(values[0].value(), Some(0.5));
    assert_eq!(values[2].value(), None);
    assert_eq!(values[2].mean_value(), CloudCover::MISSING_MEAN_VALUE);
}
