mod common;

use assert_matches::assert_matches;
use serde_json::json;

use scenery_forge::catalog::{CatalogClient, Endpoint, PageBounds, RetryPolicy, SearchQuery};
use scenery_forge::domain::{BoundingBox, TimeRange};
use scenery_forge::error::ForgeError;

use common::{MockTransport, feature, page, unavailable};

fn query() -> SearchQuery {
    SearchQuery {
        collection: "sentinel-2-l2a".to_string(),
        bbox: BoundingBox::new(-122.6, 37.5, -122.3, 37.9).unwrap(),
        time_range: Some(TimeRange::parse("2025-06-01T00:00:00Z", "2025-10-31T23:59:59Z").unwrap()),
        cloud_lt: Some(5.0),
        limit: 50,
    }
}

fn no_wait(retries: u32) -> RetryPolicy {
    RetryPolicy {
        retries,
        backoff: 0.0,
    }
}

fn endpoint(name: &str) -> Endpoint {
    Endpoint::new(name, format!("https://{name}.test/v1"))
}

#[test]
fn persistent_unavailability_stops_after_retry_budget() {
    let transport = MockTransport::scripted(vec![
        Err(unavailable()),
        Err(unavailable()),
        Err(unavailable()),
        Ok(page(vec![feature("late", "2025-07-01T00:00:00Z", Some(1.0), None)], None)),
    ]);
    let client = CatalogClient::new(transport, vec![endpoint("primary")], no_wait(2));
    let result = client.search(&query(), PageBounds::default());
    assert_matches!(result, Err(ForgeError::Network(message)) if message.contains("503"));
    assert_eq!(client.transport().call_count(), 3);
}

#[test]
fn exhausted_primary_fails_over_to_next_endpoint() {
    let transport = MockTransport::scripted(vec![
        Err(unavailable()),
        Err(unavailable()),
        Ok(page(vec![feature("a", "2025-07-01T00:00:00Z", Some(1.0), None)], None)),
    ]);
    let client = CatalogClient::new(
        transport,
        vec![endpoint("primary"), endpoint("fallback")],
        no_wait(1),
    );
    let outcome = client.search(&query(), PageBounds::default()).unwrap();
    assert_eq!(outcome.endpoint.name, "fallback");
    assert_eq!(outcome.items.len(), 1);
    assert_eq!(
        client.transport().urls(),
        vec![
            "https://primary.test/v1/search",
            "https://primary.test/v1/search",
            "https://fallback.test/v1/search",
        ]
    );
}

#[test]
fn client_errors_are_not_retried_or_failed_over() {
    let transport = MockTransport::scripted(vec![Err(ForgeError::CatalogStatus {
        status: 400,
        message: "bad query".to_string(),
    })]);
    let client = CatalogClient::new(
        transport,
        vec![endpoint("primary"), endpoint("fallback")],
        no_wait(3),
    );
    let result = client.search(&query(), PageBounds::default());
    assert_matches!(result, Err(ForgeError::CatalogStatus { status: 400, .. }));
    assert_eq!(client.transport().call_count(), 1);
}

#[test]
fn undecodable_body_is_not_retried_or_failed_over() {
    let transport = MockTransport::scripted(vec![
        Err(ForgeError::CatalogDecode("expected value at line 1 column 1".to_string())),
        Ok(page(vec![feature("a", "2025-07-01T00:00:00Z", Some(1.0), None)], None)),
    ]);
    let client = CatalogClient::new(
        transport,
        vec![endpoint("primary"), endpoint("fallback")],
        no_wait(3),
    );
    let result = client.search(&query(), PageBounds::default());
    assert_matches!(result, Err(ForgeError::CatalogDecode(_)));
    assert_eq!(client.transport().urls(), vec!["https://primary.test/v1/search"]);
}

#[test]
fn transient_failure_recovers_within_budget() {
    let transport = MockTransport::scripted(vec![
        Err(ForgeError::Network("connection reset".to_string())),
        Ok(page(vec![feature("a", "2025-07-01T00:00:00Z", Some(1.0), None)], None)),
    ]);
    let client = CatalogClient::new(transport, vec![endpoint("primary")], no_wait(2));
    let outcome = client.search(&query(), PageBounds::default()).unwrap();
    assert_eq!(outcome.endpoint.name, "primary");
    assert_eq!(client.transport().call_count(), 2);
}

fn endless_pages() -> MockTransport {
    MockTransport::default().with_route(|url, _| {
        let next = json!({"rel": "next", "href": format!("{url}?more"), "method": "GET"});
        Some(Ok(page(
            vec![
                feature("a", "2025-07-01T00:00:00Z", Some(1.0), None),
                feature("b", "2025-07-02T00:00:00Z", Some(2.0), None),
            ],
            Some(next),
        )))
    })
}

#[test]
fn pagination_stops_at_max_pages() {
    let client = CatalogClient::new(endless_pages(), vec![endpoint("primary")], no_wait(0));
    let outcome = client.search(&query(), PageBounds::new(3, 500)).unwrap();
    assert_eq!(outcome.pages, 3);
    assert_eq!(outcome.items.len(), 6);
    assert_eq!(client.transport().call_count(), 3);
}

#[test]
fn pagination_truncates_to_max_items() {
    let client = CatalogClient::new(endless_pages(), vec![endpoint("primary")], no_wait(0));
    let outcome = client.search(&query(), PageBounds::new(10, 5)).unwrap();
    assert_eq!(outcome.items.len(), 5);
    assert_eq!(outcome.pages, 3);
}

#[test]
fn post_continuation_merges_original_body() {
    let next = json!({
        "rel": "next",
        "href": "https://primary.test/v1/search",
        "method": "POST",
        "body": {"token": "next:abc"},
        "merge": true
    });
    let transport = MockTransport::scripted(vec![
        Ok(page(
            vec![feature("a", "2025-07-01T00:00:00Z", Some(1.0), None)],
            Some(next),
        )),
        Ok(page(
            vec![feature("b", "2025-07-02T00:00:00Z", Some(3.0), None)],
            None,
        )),
    ]);
    let client = CatalogClient::new(transport, vec![endpoint("primary")], no_wait(0));
    let outcome = client.search(&query(), PageBounds::default()).unwrap();
    assert_eq!(outcome.pages, 2);
    assert_eq!(outcome.items.len(), 2);

    let calls = client.transport().calls.lock().unwrap().clone();
    assert_eq!(calls[1].method, "POST");
    let body = calls[1].body.as_ref().unwrap();
    assert_eq!(body["token"], "next:abc");
    assert_eq!(body["collections"][0], "sentinel-2-l2a");
    assert_eq!(body["query"]["eo:cloud_cover"]["lt"], 5.0);
}

#[test]
fn features_without_id_are_skipped() {
    let transport = MockTransport::scripted(vec![Ok(json!({
        "features": [
            {"properties": {"datetime": "2025-07-01T00:00:00Z"}},
            feature("kept", "2025-07-01T00:00:00Z", None, None)
        ]
    }))]);
    let client = CatalogClient::new(transport, vec![endpoint("primary")], no_wait(0));
    let outcome = client.search(&query(), PageBounds::default()).unwrap();
    assert_eq!(outcome.items.len(), 1);
    assert_eq!(outcome.items[0].id, "kept");
    assert!(outcome.items[0].cloud_cover.value().is_none());
}

#[test]
fn fetch_item_reads_single_feature() {
    let transport = MockTransport::default().with_route(|url, _| {
        url.ends_with("/collections/sentinel-2-l2a/items/S2B_1")
            .then(|| Ok(feature("S2B_1", "2025-08-01T00:00:00Z", Some(0.5), Some("10SEG"))))
    });
    let client = CatalogClient::new(transport, vec![endpoint("primary")], no_wait(0));
    let item = client
        .fetch_item(&endpoint("assets"), "sentinel-2-l2a", "S2B_1")
        .unwrap();
    assert_eq!(item.cell_key.as_deref(), Some("10SEG"));
    assert_eq!(
        client.transport().urls(),
        vec!["https://assets.test/v1/collections/sentinel-2-l2a/items/S2B_1"]
    );
}
