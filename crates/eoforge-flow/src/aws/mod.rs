//! AWS clients for object storage, work queues and notifications.
//!
//! Enabled with the `aws` feature. Requests are plain HTTPS through
//! `reqwest`, signed with Signature Version 4 ([`sigv4`]):
//!
//! - [`S3Backend`] implements [`eoforge_core::StorageBackend`] over the S3
//!   REST API.
//! - [`SqsQueues`] and [`SqsQueue`] implement the work queue traits over the
//!   SQS JSON protocol.
//! - [`SnsNotifier`] publishes notifications over the SNS query protocol.
//!
//! Credentials come from the standard `AWS_*` environment variables.

pub mod s3;
pub mod sigv4;
pub mod sns;
pub mod sqs;

use bytes::Bytes;
use chrono::Utc;
use reqwest::{Method, Response, StatusCode, Url};

pub use s3::S3Backend;
pub use sigv4::Credentials;
pub use sns::SnsNotifier;
pub use sqs::{SqsQueue, SqsQueues};

/// Region used when none is configured.
pub const DEFAULT_REGION: &str = "ap-southeast-2";

/// Connection settings shared by every AWS client.
#[derive(Debug, Clone)]
pub struct AwsConfig {
    /// Region requests are signed for.
    pub region: String,
    /// Signing credentials.
    pub credentials: Credentials,
    /// Overrides every service endpoint (for local emulators).
    pub endpoint_url: Option<String>,
}

impl AwsConfig {
    /// Reads `AWS_REGION` (or `AWS_DEFAULT_REGION`), credentials and
    /// `AWS_ENDPOINT_URL` from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] if no credentials are set.
    pub fn from_env() -> crate::Result<Self> {
        let region = std::env::var("AWS_REGION")
            .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|_| DEFAULT_REGION.to_string());
        Ok(Self {
            region,
            credentials: Credentials::from_env()?,
            endpoint_url: std::env::var("AWS_ENDPOINT_URL").ok(),
        })
    }

    /// Sets the endpoint override.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint.into());
        self
    }
}

/// A signing HTTP client for one service.
#[derive(Debug, Clone)]
pub(crate) struct AwsClient {
    http: reqwest::Client,
    config: AwsConfig,
    service: &'static str,
}

impl AwsClient {
    pub(crate) fn new(config: AwsConfig, service: &'static str) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            service,
        }
    }

    pub(crate) fn region(&self) -> &str {
        &self.config.region
    }

    pub(crate) fn endpoint_override(&self) -> Option<&str> {
        self.config
            .endpoint_url
            .as_deref()
            .map(|e| e.trim_end_matches('/'))
    }

    /// `https://{service}.{region}.amazonaws.com` unless overridden.
    pub(crate) fn endpoint(&self) -> String {
        self.endpoint_override().map_or_else(
            || format!("https://{}.{}.amazonaws.com", self.service, self.config.region),
            str::to_string,
        )
    }

    /// Signs and sends a request.
    pub(crate) async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &[(&str, String)],
        body: Bytes,
    ) -> std::result::Result<Response, String> {
        let parsed = Url::parse(url).map_err(|e| format!("invalid URL {url}: {e}"))?;
        let to_sign: Vec<(String, String)> = headers
            .iter()
            .map(|(k, v)| ((*k).to_ascii_lowercase(), v.clone()))
            .collect();
        let signed = sigv4::sign(
            &self.config.credentials,
            &self.config.region,
            self.service,
            Utc::now(),
            method.as_str(),
            &parsed,
            &to_sign,
            &body,
        );

        let mut request = self.http.request(method, parsed);
        for (name, value) in to_sign.iter().chain(signed.iter()) {
            request = request.header(name.as_str(), value.as_str());
        }
        request
            .body(body)
            .send()
            .await
            .map_err(|e| format!("{} request to {url} failed: {e}", self.service))
    }
}

/// Whether a status means the credentials were refused.
pub(crate) fn is_denied(status: StatusCode) -> bool {
    status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED
}
