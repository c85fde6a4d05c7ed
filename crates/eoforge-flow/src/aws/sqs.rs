//! SQS work queues over the JSON protocol.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::dispatch::{
    check_batch, BatchSendResult, OutgoingMessage, QueueProvider, ReceivedMessage, WorkQueue,
};
use crate::error::{Error, Result};

use super::{is_denied, AwsClient, AwsConfig};

/// Longest visibility timeout SQS accepts.
const MAX_VISIBILITY: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Debug, Clone)]
struct Sqs {
    client: AwsClient,
}

impl Sqs {
    async fn call(&self, action: &str, payload: &Value) -> Result<Value> {
        let body = Bytes::from(serde_json::to_vec(payload)?);
        let headers = [
            ("content-type", "application/x-amz-json-1.0".to_string()),
            ("x-amz-target", format!("AmazonSQS.{action}")),
        ];
        let resp = self
            .client
            .send(Method::POST, &format!("{}/", self.client.endpoint()), &headers, body)
            .await
            .map_err(Error::queue)?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::queue(format!("{action}: reading response: {e}")))?;
        if status.is_success() {
            return if text.trim().is_empty() {
                Ok(Value::Null)
            } else {
                Ok(serde_json::from_str(&text)?)
            };
        }
        let fault: Fault = serde_json::from_str(&text).unwrap_or_default();
        if is_denied(status) || fault.kind.contains("AccessDenied") {
            Err(Error::access_denied(format!("{action}: {}", fault.message)))
        } else {
            Err(Error::queue(format!(
                "{action} failed with HTTP {status}: {} {}",
                fault.kind, fault.message
            )))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Fault {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

/// Opens SQS queues by name, caching queue URLs.
#[derive(Debug, Clone)]
pub struct SqsQueues {
    sqs: Sqs,
    urls: Arc<RwLock<HashMap<String, String>>>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::queue("queue URL cache lock poisoned")
}

impl SqsQueues {
    /// Creates a provider.
    #[must_use]
    pub fn new(config: AwsConfig) -> Self {
        Self {
            sqs: Sqs {
                client: AwsClient::new(config, "sqs"),
            },
            urls: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn url_of(&self, name: &str) -> Result<String> {
        if let Some(url) = self.urls.read().map_err(poison_err)?.get(name) {
            return Ok(url.clone());
        }
        let resp = self
            .sqs
            .call("GetQueueUrl", &json!({ "QueueName": name }))
            .await?;
        let url = resp
            .get("QueueUrl")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::queue(format!("no URL returned for queue {name}")))?
            .to_string();
        self.urls
            .write()
            .map_err(poison_err)?
            .insert(name.to_string(), url.clone());
        Ok(url)
    }
}

#[async_trait]
impl QueueProvider for SqsQueues {
    async fn queue(&self, name: &str) -> Result<Arc<dyn WorkQueue>> {
        let url = self.url_of(name).await?;
        Ok(Arc::new(SqsQueue {
            sqs: self.sqs.clone(),
            name: name.to_string(),
            url,
        }))
    }
}

/// One SQS queue.
#[derive(Debug, Clone)]
pub struct SqsQueue {
    sqs: Sqs,
    name: String,
    url: String,
}

impl SqsQueue {
    /// The queue URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendEntry<'a> {
    id: String,
    message_body: &'a str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    message_attributes: BTreeMap<&'a str, AttributeValue>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AttributeValue {
    data_type: String,
    #[serde(default)]
    string_value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendBatchResponse {
    #[serde(default)]
    successful: Vec<BatchEntryId>,
    #[serde(default)]
    failed: Vec<BatchFailure>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BatchEntryId {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BatchFailure {
    id: String,
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReceiveResponse {
    #[serde(default)]
    messages: Vec<SqsMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SqsMessage {
    message_id: String,
    receipt_handle: String,
    body: String,
    #[serde(default)]
    attributes: HashMap<String, String>,
    #[serde(default)]
    message_attributes: BTreeMap<String, AttributeValue>,
}

impl From<SqsMessage> for ReceivedMessage {
    fn from(m: SqsMessage) -> Self {
        Self {
            message_id: m.message_id,
            receipt: m.receipt_handle,
            body: m.body,
            attributes: m
                .message_attributes
                .into_iter()
                .filter_map(|(k, v)| v.string_value.map(|s| (k, s)))
                .collect(),
            receive_count: m
                .attributes
                .get("ApproximateReceiveCount")
                .and_then(|c| c.parse().ok())
                .unwrap_or(1),
        }
    }
}

fn index_of(id: &str, len: usize) -> Result<usize> {
    id.parse::<usize>()
        .ok()
        .filter(|i| *i < len)
        .ok_or_else(|| Error::queue(format!("unexpected batch entry id {id}")))
}

pub(crate) fn parse_send_response(value: Value, len: usize) -> Result<BatchSendResult> {
    let resp: SendBatchResponse = serde_json::from_value(value).unwrap_or_default();
    let mut result = BatchSendResult::default();
    for ok in resp.successful {
        result.sent.push(index_of(&ok.id, len)?);
    }
    for failed in resp.failed {
        let reason = failed.message.unwrap_or(failed.code);
        result.failed.push((index_of(&failed.id, len)?, reason));
    }
    result.sent.sort_unstable();
    result.failed.sort_by_key(|(i, _)| *i);
    Ok(result)
}

#[async_trait]
impl WorkQueue for SqsQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_batch(&self, messages: &[OutgoingMessage]) -> Result<BatchSendResult> {
        check_batch(&self.name, messages.len())?;
        if messages.is_empty() {
            return Ok(BatchSendResult::default());
        }
        let entries: Vec<SendEntry<'_>> = messages
            .iter()
            .enumerate()
            .map(|(i, m)| SendEntry {
                id: i.to_string(),
                message_body: &m.body,
                message_attributes: m
                    .attributes
                    .iter()
                    .map(|(k, v)| {
                        (
                            k.as_str(),
                            AttributeValue {
                                data_type: "String".into(),
                                string_value: Some(v.clone()),
                            },
                        )
                    })
                    .collect(),
            })
            .collect();
        let resp = self
            .sqs
            .call(
                "SendMessageBatch",
                &json!({ "QueueUrl": self.url, "Entries": entries }),
            )
            .await?;
        parse_send_response(resp, messages.len())
    }

    async fn receive(&self, limit: usize, visibility: Duration) -> Result<Vec<ReceivedMessage>> {
        let limit = limit.clamp(1, crate::dispatch::MAX_BATCH);
        let visibility = visibility.min(MAX_VISIBILITY).as_secs();
        let resp = self
            .sqs
            .call(
                "ReceiveMessage",
                &json!({
                    "QueueUrl": self.url,
                    "MaxNumberOfMessages": limit,
                    "VisibilityTimeout": visibility,
                    "WaitTimeSeconds": 1,
                    "MessageAttributeNames": ["All"],
                    "MessageSystemAttributeNames": ["ApproximateReceiveCount"],
                }),
            )
            .await?;
        let resp: ReceiveResponse = serde_json::from_value(resp).unwrap_or_default();
        Ok(resp.messages.into_iter().map(ReceivedMessage::from).collect())
    }

    async fn delete(&self, receipt: &str) -> Result<()> {
        self.sqs
            .call(
                "DeleteMessage",
                &json!({ "QueueUrl": self.url, "ReceiptHandle": receipt }),
            )
            .await?;
        Ok(())
    }

    async fn depth(&self) -> Result<usize> {
        let resp = self
            .sqs
            .call(
                "GetQueueAttributes",
                &json!({
                    "QueueUrl": self.url,
                    "AttributeNames": ["ApproximateNumberOfMessages"],
                }),
            )
            .await?;
        resp.pointer("/Attributes/ApproximateNumberOfMessages")
            .and_then(Value::as_str)
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| Error::queue(format!("{} did not report its depth", self.name)))
    }

    async fn dead_letter_sources(&self) -> Result<Vec<String>> {
        let resp = self
            .sqs
            .call("ListDeadLetterSourceQueues", &json!({ "QueueUrl": self.url }))
            .await?;
        Ok(resp
            .get("queueUrls")
            .and_then(Value::as_array)
            .map(|urls| {
                urls.iter()
                    .filter_map(Value::as_str)
                    .filter_map(|u| u.rsplit('/').next())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_results_map_back_to_indices() -> Result<()> {
        let value = json!({
            "Successful": [{"Id": "2", "MessageId": "m2"}, {"Id": "0", "MessageId": "m0"}],
            "Failed": [{"Id": "1", "Code": "InternalError", "SenderFault": false}],
        });
        let result = parse_send_response(value, 3)?;
        assert_eq!(result.sent, vec![0, 2]);
        assert_eq!(result.failed, vec![(1, "InternalError".to_string())]);
        assert!(!result.all_sent());
        Ok(())
    }

    #[test]
    fn unknown_entry_ids_are_rejected() {
        let value = json!({ "Successful": [{"Id": "7"}] });
        assert!(parse_send_response(value, 3).is_err());
    }

    #[test]
    fn received_messages_keep_attributes_and_counts() {
        let message: SqsMessage = serde_json::from_value(json!({
            "MessageId": "m1",
            "ReceiptHandle": "r1",
            "Body": "{\"id\":\"x\"}",
            "Attributes": {"ApproximateReceiveCount": "3"},
            "MessageAttributes": {"k": {"DataType": "String", "StringValue": "v"}},
        }))
        .expect("message");
        let received = ReceivedMessage::from(message);
        assert_eq!(received.receipt, "r1");
        assert_eq!(received.receive_count, 3);
        assert_eq!(received.attributes.get("k").map(String::as_str), Some("v"));
    }

    #[test]
    fn entries_serialize_in_sqs_shape() {
        let message = OutgoingMessage::new("body");
        let entry = SendEntry {
            id: "0".into(),
            message_body: &message.body,
            message_attributes: BTreeMap::new(),
        };
        assert_eq!(
            serde_json::to_value(entry).expect("json"),
            json!({"Id": "0", "MessageBody": "body"})
        );
    }
}
