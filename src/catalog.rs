use std::collections::BTreeSet;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::domain::{
    AssetRef, BoundingBox, CatalogItem, CloudCover, TimeRange, parse_acquisition_time,
};
use crate::error::ForgeError;
use crate::selector::derive_cell_key;

pub const CLOUD_COVER_FIELD: &str = "eo:cloud_cover";

/// Raw JSON transport used by [`CatalogClient`].
///
/// Implementations return [`ForgeError::Network`] for connection level failures and
/// [`ForgeError::CatalogStatus`] for any non-success HTTP status. A body that is not JSON is
/// [`ForgeError::CatalogDecode`], which is never retried.
pub trait CatalogTransport {
    fn post_json(&self, url: &str, body: &Value) -> Result<Value, ForgeError>;
    fn get_json(&self, url: &str) -> Result<Value, ForgeError>;
}

#[derive(Clone)]
pub struct HttpCatalogTransport {
    client: Client,
}

impl HttpCatalogTransport {
    pub fn new() -> Result<Self, ForgeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("scenery-forge/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ForgeError::Network(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/geo+json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| ForgeError::Network(err.to_string()))?;
        Ok(Self { client })
    }

    fn read_json(response: reqwest::blocking::Response) -> Result<Value, ForgeError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "catalog request failed".to_string());
            return Err(ForgeError::CatalogStatus { status, message });
        }
        response
            .json::<Value>()
            .map_err(|err| ForgeError::CatalogDecode(err.to_string()))
    }
}

impl CatalogTransport for HttpCatalogTransport {
    fn post_json(&self, url: &str, body: &Value) -> Result<Value, ForgeError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .map_err(|err| ForgeError::Network(err.to_string()))?;
        Self::read_json(response)
    }

    fn get_json(&self, url: &str) -> Result<Value, ForgeError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| ForgeError::Network(err.to_string()))?;
        Self::read_json(response)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub name: String,
    pub base_url: String,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn item_url(&self, collection: &str, id: &str) -> String {
        self.url(&format!("collections/{collection}/items/{id}"))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    /// Base of the exponential delay: attempt `n` sleeps `backoff^n` seconds.
    pub backoff: f64,
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let secs = self.backoff.powi(attempt as i32);
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 4,
            backoff: 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PageBounds {
    pub max_pages: usize,
    pub max_items: usize,
}

impl PageBounds {
    pub fn new(max_pages: usize, max_items: usize) -> Self {
        Self {
            max_pages: max_pages.max(1),
            max_items: max_items.max(1),
        }
    }
}

impl Default for PageBounds {
    fn default() -> Self {
        Self::new(10, 500)
    }
}

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub collection: String,
    pub bbox: BoundingBox,
    pub time_range: Option<TimeRange>,
    pub cloud_lt: Option<f64>,
    pub limit: usize,
}

impl SearchQuery {
    pub fn payload(&self) -> Value {
        let mut payload = json!({
            "collections": [self.collection],
            "bbox": self.bbox.to_array(),
            "limit": self.limit,
        });
        if let Some(range) = &self.time_range {
            payload["datetime"] = Value::String(range.to_string());
        }
        if let Some(cloud_lt) = self.cloud_lt {
            let mut filter = Map::new();
            filter.insert(CLOUD_COVER_FIELD.to_string(), json!({ "lt": cloud_lt }));
            payload["query"] = Value::Object(filter);
        }
        payload
    }
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub items: Vec<CatalogItem>,
    /// Endpoint that answered the first page; pagination stayed on it.
    pub endpoint: Endpoint,
    pub pages: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
struct Continuation {
    href: String,
    method: Method,
    body: Option<Value>,
}

pub struct CatalogClient<T: CatalogTransport> {
    transport: T,
    endpoints: Vec<Endpoint>,
    retry: RetryPolicy,
}

impl<T: CatalogTransport> CatalogClient<T> {
    pub fn new(transport: T, endpoints: Vec<Endpoint>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            endpoints,
            retry,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn search(
        &self,
        query: &SearchQuery,
        bounds: PageBounds,
    ) -> Result<SearchOutcome, ForgeError> {
        let payload = query.payload();
        let (endpoint, first) = self.first_page(&payload)?;

        let mut features = page_features(&first);
        let mut next = continuation(&first, &payload);
        let mut pages = 1usize;

        while let Some(cont) = next.take() {
            if pages >= bounds.max_pages || features.len() >= bounds.max_items {
                debug!(pages, items = features.len(), "stopping pagination at bound");
                break;
            }
            let page = match cont.method {
                Method::Post => {
                    let body = cont.body.unwrap_or_else(|| Value::Object(Map::new()));
                    self.with_retries(|| self.transport.post_json(&cont.href, &body))?
                }
                Method::Get => self.with_retries(|| self.transport.get_json(&cont.href))?,
            };
            pages += 1;
            features.extend(page_features(&page));
            next = continuation(&page, &payload);
        }

        features.truncate(bounds.max_items);
        let items = features
            .iter()
            .filter_map(|feature| {
                let item = parse_feature(feature);
                if item.is_none() {
                    warn!("skipping catalog feature without id");
                }
                item
            })
            .collect::<Vec<_>>();
        info!(
            endpoint = %endpoint.name,
            pages,
            items = items.len(),
            "catalog search complete"
        );
        Ok(SearchOutcome {
            items,
            endpoint,
            pages,
        })
    }

    pub fn fetch_item(
        &self,
        endpoint: &Endpoint,
        collection: &str,
        id: &str,
    ) -> Result<CatalogItem, ForgeError> {
        let url = endpoint.item_url(collection, id);
        let value = self.with_retries(|| self.transport.get_json(&url))?;
        parse_feature(&value).ok_or_else(|| ForgeError::InvalidAsset {
            item: id.to_string(),
            reason: format!("malformed catalog item at {url}"),
        })
    }

    fn first_page(&self, payload: &Value) -> Result<(Endpoint, Value), ForgeError> {
        let mut last_error = None;
        for (index, endpoint) in self.endpoints.iter().enumerate() {
            if index > 0 {
                warn!(endpoint = %endpoint.name, "falling back to next catalog endpoint");
            }
            let url = endpoint.url("search");
            match self.with_retries(|| self.transport.post_json(&url, payload)) {
                Ok(page) => return Ok((endpoint.clone(), page)),
                Err(err @ ForgeError::Network(_)) => {
                    warn!(endpoint = %endpoint.name, error = %err, "catalog endpoint failed");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error
            .unwrap_or_else(|| ForgeError::Network("no catalog endpoint configured".to_string())))
    }

    /// Runs `send` until it succeeds, fails permanently, or the retry budget is spent.
    /// An exhausted budget always surfaces as [`ForgeError::Network`].
    fn with_retries<F>(&self, mut send: F) -> Result<Value, ForgeError>
    where
        F: FnMut() -> Result<Value, ForgeError>,
    {
        let mut attempt = 0u32;
        loop {
            match send() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    attempt += 1;
                    if attempt > self.retry.retries {
                        return Err(match err {
                            ForgeError::CatalogStatus { status, .. } => ForgeError::Network(
                                format!("status {status} after {} retries", self.retry.retries),
                            ),
                            other => other,
                        });
                    }
                    let delay = self.retry.delay(attempt);
                    warn!(
                        error = %err,
                        attempt,
                        "catalog request failed; retrying in {:.1}s",
                        delay.as_secs_f64()
                    );
                    thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn page_features(page: &Value) -> Vec<Value> {
    page.get("features")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn continuation(page: &Value, original: &Value) -> Option<Continuation> {
    let link = page
        .get("links")?
        .as_array()?
        .iter()
        .find(|link| link.get("rel").and_then(Value::as_str) == Some("next"))?;
    let href = link.get("href").and_then(Value::as_str)?.to_string();
    if href.is_empty() {
        return None;
    }
    let method = match link.get("method").and_then(Value::as_str) {
        Some(method) if method.eq_ignore_ascii_case("POST") => Method::Post,
        _ => Method::Get,
    };
    let mut body = link.get("body").filter(|body| body.is_object()).cloned();
    let merge = link.get("merge").and_then(Value::as_bool).unwrap_or(false);
    if merge {
        if let (Some(Value::Object(extra)), Value::Object(base)) = (&body, original) {
            let mut merged = base.clone();
            for (key, value) in extra {
                merged.insert(key.clone(), value.clone());
            }
            body = Some(Value::Object(merged));
        }
    }
    Some(Continuation { href, method, body })
}

/// Converts one GeoJSON feature into a [`CatalogItem`]; `None` when it has no id.
pub fn parse_feature(feature: &Value) -> Option<CatalogItem> {
    let id = feature.get("id").and_then(Value::as_str)?.to_string();
    let properties = feature
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let bbox = feature
        .get("bbox")
        .and_then(Value::as_array)
        .filter(|values| values.len() >= 4)
        .and_then(|values| {
            let nums = values
                .iter()
                .take(4)
                .map(Value::as_f64)
                .collect::<Option<Vec<_>>>()?;
            Some([nums[0], nums[1], nums[2], nums[3]])
        });
    let datetime = properties
        .get("datetime")
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    let acquired = datetime.as_deref().and_then(parse_acquisition_time);
    let cloud_cover = CloudCover::new(properties.get(CLOUD_COVER_FIELD).and_then(number_value));
    let cell_key = derive_cell_key(&properties);

    let assets = feature
        .get("assets")
        .and_then(Value::as_object)
        .map(|assets| {
            assets
                .iter()
                .map(|(key, asset)| parse_asset(key, asset))
                .collect()
        })
        .unwrap_or_default();

    Some(CatalogItem {
        id,
        bbox,
        datetime,
        acquired,
        cloud_cover,
        cell_key,
        properties,
        assets,
    })
}

fn parse_asset(key: &str, asset: &Value) -> AssetRef {
    let href = asset
        .get("href")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let roles = asset
        .get("roles")
        .and_then(Value::as_array)
        .map(|roles| {
            roles
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_lowercase)
                .collect::<BTreeSet<_>>()
        })
        .unwrap_or_default();
    let requester_pays = asset
        .get("storage:requester_pays")
        .map(is_truthy)
        .unwrap_or(false);
    AssetRef {
        key: key.to_string(),
        href,
        roles,
        requester_pays,
    }
}

fn number_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(num) => num.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Loose boolean used by catalog flags such as `storage:requester_pays`.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(num) => num.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Value::String(text) => matches!(text.to_lowercase().as_str(), "true" | "1" | "yes"),
        _ => false,
    }
}
