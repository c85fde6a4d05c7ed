//! SNS notifications over the query protocol.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;

use crate::error::{Error, Result};
use crate::stac::Notifier;

use super::sigv4::uri_encode;
use super::{is_denied, AwsClient, AwsConfig};

const API_VERSION: &str = "2010-03-31";

/// [`Notifier`] publishing to SNS topics.
#[derive(Debug, Clone)]
pub struct SnsNotifier {
    client: AwsClient,
}

impl SnsNotifier {
    /// Creates a notifier.
    #[must_use]
    pub fn new(config: AwsConfig) -> Self {
        Self {
            client: AwsClient::new(config, "sns"),
        }
    }
}

/// Form body of a `Publish` call.
pub(crate) fn publish_body(
    topic: &str,
    message: &str,
    attributes: &BTreeMap<String, String>,
) -> String {
    let mut params = vec![
        ("Action".to_string(), "Publish".to_string()),
        ("Version".to_string(), API_VERSION.to_string()),
        ("TopicArn".to_string(), topic.to_string()),
        ("Message".to_string(), message.to_string()),
    ];
    for (n, (name, value)) in attributes.iter().enumerate() {
        let prefix = format!("MessageAttributes.entry.{}", n + 1);
        params.push((format!("{prefix}.Name"), name.clone()));
        params.push((format!("{prefix}.Value.DataType"), "String".to_string()));
        params.push((format!("{prefix}.Value.StringValue"), value.clone()));
    }
    params
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k, true), uri_encode(v, true)))
        .collect::<Vec<_>>()
        .join("&")
}

#[async_trait]
impl Notifier for SnsNotifier {
    async fn notify(
        &self,
        topic: &str,
        message: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<()> {
        let body = publish_body(topic, message, attributes);
        let headers = [(
            "content-type",
            "application/x-www-form-urlencoded; charset=utf-8".to_string(),
        )];
        let resp = self
            .client
            .send(
                Method::POST,
                &format!("{}/", self.client.endpoint()),
                &headers,
                Bytes::from(body),
            )
            .await
            .map_err(Error::publish)?;
        let status = resp.status();
        if status.is_success() {
            tracing::info!(topic, "notification published");
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        if is_denied(status) {
            Err(Error::access_denied(format!("publishing to {topic}: HTTP {status}")))
        } else {
            Err(Error::publish(format!(
                "publishing to {topic} failed with HTTP {status}: {}",
                text.trim()
            )))
        }
    }
}
