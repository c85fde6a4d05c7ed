//! Loading configuration documents from disk or over HTTP.
//!
//! A [`ConfigLoader`] reads a document from a local path or an `http(s)://`
//! URL. Remote documents are fetched once and reused for the lifetime of the
//! loader; there is no invalidation.
//!
//! [`lookup`] and [`lookup_path`] walk a parsed document by key, independent
//! of the typed [`Configuration`] model. They serve callers that need one
//! value out of a document without committing to its schema.

use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::config::Configuration;
use crate::error::{Error, Result};

/// Reads configuration documents and caches remote fetches.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    client: reqwest::Client,
    fetched: Mutex<HashMap<String, Arc<str>>>,
}

impl ConfigLoader {
    /// Creates a loader with a default HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a loader that reuses an existing HTTP client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            fetched: Mutex::new(HashMap::new()),
        }
    }

    /// Loads and validates a configuration from `location`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the document cannot be read or
    /// does not validate.
    pub async fn load(&self, location: &str) -> Result<Configuration> {
        let text = self.read_text(location).await?;
        Configuration::from_yaml_str(&text)
    }

    /// Loads the raw document at `location` as an untyped tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the document cannot be read or is
    /// not valid YAML.
    pub async fn load_document(&self, location: &str) -> Result<Value> {
        let text = self.read_text(location).await?;
        serde_yaml::from_str(&text)
            .map_err(|e| Error::configuration(format!("invalid YAML in {location}: {e}")))
    }

    /// Reads one nested value out of the document at `location`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] if the path does not resolve, or the
    /// errors of [`ConfigLoader::load_document`].
    pub async fn get(&self, location: &str, path: &str) -> Result<Value> {
        let doc = self.load_document(location).await?;
        lookup(&doc, path).cloned()
    }

    /// Returns the document text, fetching remote documents at most once.
    async fn read_text(&self, location: &str) -> Result<Arc<str>> {
        if is_http(location) {
            if let Some(cached) = self.cached(location)? {
                tracing::debug!(location, "configuration served from cache");
                return Ok(cached);
            }
            let text: Arc<str> = self.fetch(location).await?.into();
            self.fetched
                .lock()
                .map_err(|_| poison_err())?
                .insert(location.to_string(), Arc::clone(&text));
            return Ok(text);
        }

        if !Path::new(location).is_file() {
            return Err(Error::configuration(format!(
                "configuration must be an http(s) URL or an existing file: {location}"
            )));
        }
        let text = tokio::fs::read_to_string(location).await.map_err(|e| {
            Error::configuration(format!("failed to read configuration {location}: {e}"))
        })?;
        Ok(text.into())
    }

    fn cached(&self, location: &str) -> Result<Option<Arc<str>>> {
        let fetched = self.fetched.lock().map_err(|_| poison_err())?;
        Ok(fetched.get(location).cloned())
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        tracing::info!(url, "fetching configuration");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::configuration(format!("failed to fetch {url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::configuration(format!(
                "failed to fetch {url}: HTTP {status}"
            )));
        }
        response
            .text()
            .await
            .map_err(|e| Error::configuration(format!("failed to read body of {url}: {e}")))
    }
}

fn is_http(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

fn poison_err() -> Error {
    Error::Internal {
        message: "configuration cache lock poisoned".into(),
    }
}

/// Looks up a dotted path such as `specification.transform_args.0.band`.
///
/// Numeric segments index into sequences.
///
/// # Errors
///
/// Returns [`Error::KeyNotFound`] naming the full path if any segment does
/// not resolve.
pub fn lookup<'a>(document: &'a Value, path: &str) -> Result<&'a Value> {
    let segments: Vec<&str> = path.split('.').collect();
    lookup_path(document, &segments)
}

/// Looks up a path given as separate segments.
///
/// # Errors
///
/// Returns [`Error::KeyNotFound`] if any segment does not resolve.
pub fn lookup_path<'a>(document: &'a Value, segments: &[&str]) -> Result<&'a Value> {
    let not_found = || Error::KeyNotFound {
        path: segments.join("."),
    };

    segments.iter().try_fold(document, |node, segment| {
        let next = match node {
            Value::Object(map) => map.get(*segment),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index)),
            _ => None,
        };
        next.ok_or_else(not_found)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const DOC: &str = "specification:\n  product: p\n  measurements: [red]\n  transform: passthrough\noutput:\n  location: /tmp/out\n";

    #[test]
    fn lookup_walks_maps_and_sequences() {
        let doc = json!({"a": {"b": [{"c": 1}, {"c": 2}]}});
        assert_eq!(lookup(&doc, "a.b.1.c").expect("lookup"), &json!(2));
        assert_eq!(lookup_path(&doc, &["a", "b", "0"]).expect("lookup"), &json!({"c": 1}));
    }

    #[test]
    fn lookup_missing_names_path() {
        let doc = json!({"a": {"b": [1]}});
        for path in ["a.x", "a.b.5", "a.b.first", "a.b.0.deeper"] {
            match lookup(&doc, path) {
                Err(Error::KeyNotFound { path: reported }) => assert_eq!(reported, path),
                other => panic!("expected KeyNotFound for {path}, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn loads_local_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(DOC.as_bytes()).expect("write");

        let loader = ConfigLoader::new();
        let path = file.path().to_str().expect("utf8 path");
        let config = loader.load(path).await.expect("load");
        assert_eq!(config.specification.transform, "passthrough");

        let value = loader.get(path, "output.location").await.expect("get");
        assert_eq!(value, json!("/tmp/out"));
    }

    #[tokio::test]
    async fn missing_file_is_configuration_error() {
        let loader = ConfigLoader::new();
        let err = loader.load("/definitely/not/here.yaml").await.unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[tokio::test]
    async fn remote_documents_are_fetched_once() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let hits = Arc::new(AtomicUsize::new(0));
        let server_hits = Arc::clone(&hits);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                server_hits.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0_u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{DOC}",
                    DOC.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        let loader = ConfigLoader::new();
        let url = format!("http://{addr}/job.yaml");
        let first = loader.load(&url).await.expect("first load");
        let second = loader.load(&url).await.expect("second load");
        assert_eq!(first, second);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
