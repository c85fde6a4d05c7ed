//! S3 object storage.
//!
//! Objects are addressed virtual-hosted style
//! (`https://{bucket}.s3.{region}.amazonaws.com/{key}`), or path style under
//! the endpoint override. Uploads record the body's SHA-256 as
//! `x-amz-meta-sha256` so that `head` and `list` can report it without
//! reading the object back.

use std::sync::LazyLock;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::{Method, Response, StatusCode};

use eoforge_core::storage::sha256_hex;
use eoforge_core::{Error, ObjectMeta, ObjectUrl, PutOptions, Result, StorageBackend};

use super::sigv4::uri_encode;
use super::{is_denied, AwsClient, AwsConfig};

const SHA256_META: &str = "x-amz-meta-sha256";

static CONTENTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<Contents>(.*?)</Contents>").expect("valid regex"));
static KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Key>(.*?)</Key>").expect("valid regex"));
static SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Size>(\d+)</Size>").expect("valid regex"));
static MODIFIED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<LastModified>(.*?)</LastModified>").expect("valid regex"));
static NEXT_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<NextContinuationToken>(.*?)</NextContinuationToken>").expect("valid regex")
});

/// [`StorageBackend`] over the S3 REST API.
#[derive(Debug, Clone)]
pub struct S3Backend {
    client: AwsClient,
}

impl S3Backend {
    /// Creates a backend.
    #[must_use]
    pub fn new(config: AwsConfig) -> Self {
        Self {
            client: AwsClient::new(config, "s3"),
        }
    }

    fn bucket_url(&self, bucket: &str) -> String {
        match self.client.endpoint_override() {
            Some(endpoint) => format!("{endpoint}/{bucket}"),
            None => format!("https://{bucket}.s3.{}.amazonaws.com", self.client.region()),
        }
    }

    fn object_url(&self, url: &ObjectUrl) -> String {
        format!("{}/{}", self.bucket_url(url.bucket()), uri_encode(url.key(), false))
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        headers: &[(&str, String)],
        body: Bytes,
    ) -> Result<Response> {
        self.client
            .send(method, url, headers, body)
            .await
            .map_err(Error::storage)
    }
}

async fn failure(resp: Response, what: &str) -> Error {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if is_denied(status) {
        Error::access_denied(format!("{what}: HTTP {status}"))
    } else if status == StatusCode::NOT_FOUND {
        Error::NotFound(what.to_string())
    } else {
        Error::storage(format!("{what}: HTTP {status}: {}", body.trim()))
    }
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// One page of a `ListObjectsV2` response: `(key, size, last modified)`
/// entries and the continuation token.
pub(crate) fn parse_list_page(
    xml: &str,
) -> (Vec<(String, u64, Option<DateTime<Utc>>)>, Option<String>) {
    let entries = CONTENTS
        .captures_iter(xml)
        .filter_map(|c| {
            let body = c.get(1)?.as_str();
            let key = unescape(KEY.captures(body)?.get(1)?.as_str());
            let size = SIZE
                .captures(body)
                .and_then(|s| s.get(1)?.as_str().parse().ok())
                .unwrap_or(0);
            let modified = MODIFIED
                .captures(body)
                .and_then(|m| DateTime::parse_from_rfc3339(m.get(1)?.as_str()).ok())
                .map(|t| t.with_timezone(&Utc));
            Some((key, size, modified))
        })
        .collect();
    let token = NEXT_TOKEN
        .captures(xml)
        .and_then(|c| c.get(1))
        .map(|m| unescape(m.as_str()));
    (entries, token)
}

#[async_trait]
impl StorageBackend for S3Backend {
    async fn get(&self, url: &ObjectUrl) -> Result<Bytes> {
        let resp = self
            .request(Method::GET, &self.object_url(url), &[], Bytes::new())
            .await?;
        if !resp.status().is_success() {
            return Err(failure(resp, &url.to_string()).await);
        }
        resp.bytes()
            .await
            .map_err(|e| Error::storage_with_source(format!("reading {url}"), e))
    }

    async fn put(&self, url: &ObjectUrl, data: Bytes, options: &PutOptions) -> Result<()> {
        let mut headers = vec![(SHA256_META, sha256_hex(&data))];
        if let Some(acl) = options.acl {
            headers.push(("x-amz-acl", acl.as_str().to_string()));
        }
        if let Some(content_type) = &options.content_type {
            headers.push(("content-type", content_type.clone()));
        }
        let resp = self
            .request(Method::PUT, &self.object_url(url), &headers, data)
            .await?;
        if !resp.status().is_success() {
            return Err(failure(resp, &url.to_string()).await);
        }
        tracing::debug!(%url, "uploaded");
        Ok(())
    }

    async fn delete(&self, url: &ObjectUrl) -> Result<()> {
        let resp = self
            .request(Method::DELETE, &self.object_url(url), &[], Bytes::new())
            .await?;
        if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(failure(resp, &url.to_string()).await)
        }
    }

    async fn list(&self, prefix: &ObjectUrl) -> Result<Vec<ObjectMeta>> {
        let mut out = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut query = format!("list-type=2&prefix={}", uri_encode(prefix.key(), true));
            if let Some(t) = &token {
                query.push_str(&format!("&continuation-token={}", uri_encode(t, true)));
            }
            let url = format!("{}/?{query}", self.bucket_url(prefix.bucket()));
            let resp = self.request(Method::GET, &url, &[], Bytes::new()).await?;
            if !resp.status().is_success() {
                return Err(failure(resp, &prefix.to_string()).await);
            }
            let xml = resp
                .text()
                .await
                .map_err(|e| Error::storage_with_source(format!("listing {prefix}"), e))?;
            let (entries, next) = parse_list_page(&xml);
            for (key, size, last_modified) in entries {
                let object = ObjectUrl::new(prefix.bucket(), key);
                // Listings do not carry user metadata.
                let sha256 = self.head(&object).await?.and_then(|m| m.sha256);
                out.push(ObjectMeta {
                    url: object,
                    size,
                    sha256,
                    last_modified,
                });
            }
            match next {
                Some(next) => token = Some(next),
                None => return Ok(out),
            }
        }
    }

    async fn head(&self, url: &ObjectUrl) -> Result<Option<ObjectMeta>> {
        let resp = self
            .request(Method::HEAD, &self.object_url(url), &[], Bytes::new())
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(failure(resp, &url.to_string()).await);
        }
        let header = |name: &str| resp.headers().get(name).and_then(|v| v.to_str().ok());
        Ok(Some(ObjectMeta {
            url: url.clone(),
            size: header("content-length")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            sha256: header(SHA256_META).map(str::to_string),
            last_modified: header("last-modified")
                .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
                .map(|t| t.with_timezone(&Utc)),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::Credentials;

    fn backend(endpoint: Option<&str>) -> S3Backend {
        let config = AwsConfig {
            region: "ap-southeast-2".into(),
            credentials: Credentials::new("AKID", "secret"),
            endpoint_url: endpoint.map(str::to_string),
        };
        S3Backend::new(config)
    }

    #[test]
    fn object_addresses() {
        let url = ObjectUrl::new("bucket", "ga_ls8c/1-0-0/a b.tif");
        assert_eq!(
            backend(None).object_url(&url),
            "https://bucket.s3.ap-southeast-2.amazonaws.com/ga_ls8c/1-0-0/a%20b.tif"
        );
        assert_eq!(
            backend(Some("http://localhost:9000/")).object_url(&url),
            "http://localhost:9000/bucket/ga_ls8c/1-0-0/a%20b.tif"
        );
    }

    #[test]
    fn list_pages_are_parsed() {
        let xml = r"<?xml version='1.0' encoding='UTF-8'?>
<ListBucketResult>
  <Contents>
    <Key>out/a&amp;b.tif</Key>
    <LastModified>2024-03-01T12:00:00.000Z</LastModified>
    <Size>42</Size>
  </Contents>
  <Contents><Key>out/c.yaml</Key><Size>7</Size></Contents>
  <NextContinuationToken>tok/1=</NextContinuationToken>
</ListBucketResult>";
        let (entries, token) = parse_list_page(xml);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "out/a&b.tif");
        assert_eq!(entries[0].1, 42);
        assert!(entries[0].2.is_some());
        assert_eq!(entries[1], ("out/c.yaml".to_string(), 7, None));
        assert_eq!(token.as_deref(), Some("tok/1="));
    }

    #[test]
    fn last_page_has_no_token() {
        let (entries, token) = parse_list_page("<ListBucketResult></ListBucketResult>");
        assert!(entries.is_empty());
        assert!(token.is_none());
    }
}
