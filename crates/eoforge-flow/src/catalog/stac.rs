//! Catalog backed by a STAC API.
//!
//! Searches go to `POST {base}/search` with the product as the only
//! collection. Result pages are fetched lazily by following `next` links, so
//! a consumer that stops early never requests the remaining pages.
//!
//! ## Mapping
//!
//! | STAC item | [`DatasetRecord`] |
//! |---|---|
//! | `id` (UUID) | `id`; non-UUID ids get a stable name-based UUID and become `tile_id` |
//! | `collection` | `product` |
//! | `properties.datetime` | `datetime` |
//! | `properties.proj:epsg` | `crs` as `EPSG:<code>` |
//! | `properties.deprecated` | `archived` |
//! | data assets | `measurements` |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

use eoforge_core::DatasetId;

use super::{Asset, Catalog, DatasetRecord, DatasetStream, MetadataType, SearchFilter};
use crate::error::{Error, Result};
use crate::stac::{ItemCollection, StacItem, StacLink};

/// Tuning knobs for [`StacApiCatalog`].
#[derive(Debug, Clone)]
pub struct StacOptions {
    /// Items requested per page.
    pub page_size: usize,
    /// Retries after the first attempt for server and network errors.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub retry_delay: Duration,
}

impl Default for StacOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
enum PageRequest {
    Post { url: String, body: Value },
    Get { url: String },
}

impl PageRequest {
    /// The request for the page a `next` link points at.
    fn follow(&self, link: &StacLink) -> Self {
        let previous = match self {
            Self::Post { body, .. } => body.clone(),
            Self::Get { .. } => Value::Null,
        };
        let method = link.method.as_deref().unwrap_or("GET");
        if !method.eq_ignore_ascii_case("POST") {
            return Self::Get {
                url: link.href.clone(),
            };
        }
        let body = match (&link.body, link.merge) {
            (Some(Value::Object(overlay)), true) => {
                let mut merged = previous;
                if let Value::Object(base) = &mut merged {
                    base.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                merged
            }
            (Some(body), _) => body.clone(),
            (None, _) => previous,
        };
        Self::Post {
            url: link.href.clone(),
            body,
        }
    }
}

#[derive(Debug)]
struct Inner {
    base_url: String,
    client: reqwest::Client,
    options: StacOptions,
}

impl Inner {
    fn search_url(&self) -> String {
        format!("{}/search", self.base_url.trim_end_matches('/'))
    }

    async fn fetch(&self, request: &PageRequest) -> Result<ItemCollection> {
        let mut attempt = 0;
        loop {
            let builder = match request {
                PageRequest::Post { url, body } => self.client.post(url).json(body),
                PageRequest::Get { url } => self.client.get(url),
            };
            let failure = match builder.send().await {
                Ok(resp) if resp.status().is_success() => {
                    return resp.json::<ItemCollection>().await.map_err(|e| {
                        Error::serialization(format!("parsing STAC search response: {e}"))
                    });
                }
                Ok(resp) => {
                    let status = resp.status();
                    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
                        return Err(Error::access_denied(format!(
                            "STAC search returned HTTP {status}"
                        )));
                    }
                    if status.is_client_error() {
                        return Err(Error::storage(format!("STAC search returned HTTP {status}")));
                    }
                    format!("HTTP {status}")
                }
                Err(e) => e.to_string(),
            };

            if attempt >= self.options.max_retries {
                return Err(Error::storage(format!(
                    "STAC search failed after {} attempts: {failure}",
                    attempt + 1
                )));
            }
            let delay = self.options.retry_delay * 2_u32.saturating_pow(attempt);
            tracing::warn!(attempt, ?delay, error = %failure, "retrying STAC search");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Catalog backed by a STAC API.
#[derive(Debug, Clone)]
pub struct StacApiCatalog {
    inner: Arc<Inner>,
}

impl StacApiCatalog {
    /// Creates a catalog for the API rooted at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    /// Creates a catalog that uses the given HTTP client.
    #[must_use]
    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            inner: Arc::new(Inner {
                base_url: base_url.into(),
                client,
                options: StacOptions::default(),
            }),
        }
    }

    /// Replaces the tuning options.
    #[must_use]
    pub fn with_options(self, options: StacOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                base_url: self.inner.base_url.clone(),
                client: self.inner.client.clone(),
                options,
            }),
        }
    }

    fn search_body(&self, product: &str, filter: &SearchFilter) -> Value {
        let mut body = json!({
            "collections": [product],
            "limit": self.inner.options.page_size,
        });
        if let Some(time) = &filter.time {
            body["datetime"] = Value::from(time.to_interval());
        }
        if let Some(bbox) = filter.bbox {
            body["bbox"] = json!(bbox);
        }
        if !filter.properties.is_empty() {
            let query: serde_json::Map<String, Value> = filter
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), json!({ "eq": v })))
                .collect();
            body["query"] = Value::Object(query);
        }
        body
    }
}

#[async_trait]
impl Catalog for StacApiCatalog {
    async fn get(&self, id: &DatasetId) -> Result<Option<DatasetRecord>> {
        let request = PageRequest::Post {
            url: self.inner.search_url(),
            body: json!({ "ids": [id.to_string()], "limit": 1 }),
        };
        let page = self.inner.fetch(&request).await?;
        page.features
            .into_iter()
            .next()
            .map(|item| record_from_item(item, None))
            .transpose()
    }

    fn search(&self, product: &str, filter: &SearchFilter) -> DatasetStream {
        let first = PageRequest::Post {
            url: self.inner.search_url(),
            body: self.search_body(product, filter),
        };
        let inner = Arc::clone(&self.inner);
        let product = product.to_string();
        let filter = filter.clone();

        stream::try_unfold(Some(first), move |state| {
            let inner = Arc::clone(&inner);
            async move {
                let Some(request) = state else {
                    return Ok::<_, Error>(None);
                };
                let page = inner.fetch(&request).await?;
                let next = page
                    .next_link()
                    .filter(|_| !page.features.is_empty())
                    .map(|link| request.follow(link));
                tracing::debug!(items = page.features.len(), more = next.is_some(), "fetched STAC page");
                Ok(Some((page.features, next)))
            }
        })
        .map_ok(|items| stream::iter(items.into_iter().map(Ok::<_, Error>)))
        .try_flatten()
        .and_then(move |item| future::ready(record_from_item(item, Some(product.as_str()))))
        .try_filter(move |record| future::ready(!record.archived && filter.matches(record)))
        .boxed()
    }
}

/// Converts a STAC item into a catalog record.
///
/// `product` is used when the item does not name its collection.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if the item has neither a collection nor
/// a fallback product.
pub fn record_from_item(item: StacItem, product: Option<&str>) -> Result<DatasetRecord> {
    let product = item
        .collection
        .clone()
        .or_else(|| product.map(str::to_string))
        .ok_or_else(|| Error::serialization(format!("STAC item {} has no collection", item.id)))?;

    let (id, tile_id) = match Uuid::parse_str(&item.id) {
        Ok(uuid) => (DatasetId::from_uuid(uuid), None),
        Err(_) => {
            let name = format!("{product}/{}", item.id);
            let uuid = Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes());
            (DatasetId::from_uuid(uuid), Some(item.id.clone()))
        }
    };

    let mut record = DatasetRecord::new(id, product);
    record.metadata_type = MetadataType::Eo3;
    record.tile_id = tile_id;
    record.datetime = ["datetime", "start_datetime"]
        .iter()
        .filter_map(|key| item.properties.get(*key).and_then(Value::as_str))
        .find_map(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));
    record.crs = item
        .properties
        .get("proj:epsg")
        .and_then(Value::as_u64)
        .map(|code| format!("EPSG:{code}"))
        .or_else(|| item.properties.get("proj:code").and_then(Value::as_str).map(str::to_string));
    record.archived = item
        .properties
        .get("deprecated")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let item_shape = item.properties.get("proj:shape").and_then(shape_of);
    let item_transform = item.properties.get("proj:transform").and_then(transform_of);
    for (name, asset) in item.assets.iter().filter(|(_, a)| a.is_data()) {
        record.measurements.insert(
            name.clone(),
            Asset {
                href: asset.href.clone(),
                shape: asset.extra.get("proj:shape").and_then(shape_of).or(item_shape),
                transform: asset
                    .extra
                    .get("proj:transform")
                    .and_then(transform_of)
                    .or(item_transform),
            },
        );
    }

    record.geometry = item.geometry;
    record.properties = item.properties;
    Ok(record)
}

fn shape_of(value: &Value) -> Option<[usize; 2]> {
    let values: Vec<usize> = value
        .as_array()?
        .iter()
        .map(|v| v.as_u64().and_then(|n| usize::try_from(n).ok()))
        .collect::<Option<_>>()?;
    values.try_into().ok()
}

fn transform_of(value: &Value) -> Option<[f64; 6]> {
    let values: Vec<f64> = value.as_array()?.iter().map(Value::as_f64).collect::<Option<_>>()?;
    values.get(..6)?.try_into().ok()
}
