//! SQS-compatible queue depth provider.
//!
//! Queue URLs are the configured prefix followed by the queue name. Depth
//! is read with `GetQueueAttributes` over the SQS JSON protocol. Requests
//! are not signed, so this targets local SQS-compatible brokers or a
//! signing proxy in front of AWS.

use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use http::{Method, Uri};
use serde::Deserialize;
use serde_json::json;

use cascade_autoscale::{BoxFuture, QueueDepthProvider};
use cascade_core::SqsConfig;

use crate::transport;

const APPROXIMATE_NUMBER_OF_MESSAGES: &str = "ApproximateNumberOfMessages";
const AMZ_JSON: &str = "application/x-amz-json-1.0";
const GET_QUEUE_ATTRIBUTES: &str = "AmazonSQS.GetQueueAttributes";

#[derive(Debug, Deserialize)]
struct GetQueueAttributesResponse {
    #[serde(rename = "Attributes", default)]
    attributes: std::collections::HashMap<String, String>,
}

/// Reads queue depths from an SQS-compatible endpoint.
#[derive(Debug, Clone)]
pub struct SqsQueueDepths {
    queue_url_prefix: String,
    timeout: Duration,
}

impl SqsQueueDepths {
    pub fn new(config: &SqsConfig, timeout: Duration) -> Self {
        Self {
            queue_url_prefix: config.queue_url_prefix.clone(),
            timeout,
        }
    }

    pub fn queue_url(&self, queue: &str) -> String {
        format!("{}{queue}", self.queue_url_prefix)
    }

    /// `ApproximateNumberOfMessages` of one queue.
    pub async fn approximate_depth(&self, queue: &str) -> anyhow::Result<u64> {
        let queue_url = self.queue_url(queue);
        let endpoint = endpoint_of(&queue_url)?;
        let request = json!({
            "QueueUrl": queue_url,
            "AttributeNames": [APPROXIMATE_NUMBER_OF_MESSAGES],
        });
        let body = serde_json::to_vec(&request).context("encode GetQueueAttributes")?;

        let response = transport::send(
            Method::POST,
            &endpoint,
            &[("content-type", AMZ_JSON), ("x-amz-target", GET_QUEUE_ATTRIBUTES)],
            Bytes::from(body),
            self.timeout,
        )
        .await?
        .error_for_status(&format!("GetQueueAttributes for {queue}"))?;

        parse_depth(&response.body).with_context(|| format!("depth of queue {queue}"))
    }
}

impl QueueDepthProvider for SqsQueueDepths {
    fn depth<'a>(&'a self, queue: &'a str) -> BoxFuture<'a, anyhow::Result<u64>> {
        Box::pin(self.approximate_depth(queue))
    }
}

/// Service endpoint (scheme and authority) of a queue URL.
fn endpoint_of(queue_url: &str) -> anyhow::Result<String> {
    let uri: Uri = queue_url
        .parse()
        .with_context(|| format!("invalid queue url {queue_url}"))?;
    let scheme = uri.scheme_str().unwrap_or("http");
    let authority = uri
        .authority()
        .with_context(|| format!("queue url {queue_url} has no host"))?;
    Ok(format!("{scheme}://{authority}/"))
}

fn parse_depth(body: &[u8]) -> anyhow::Result<u64> {
    let response: GetQueueAttributesResponse =
        serde_json::from_slice(body).context("parse GetQueueAttributes response")?;
    let value = response
        .attributes
        .get(APPROXIMATE_NUMBER_OF_MESSAGES)
        .context("response lacks ApproximateNumberOfMessages")?;
    value
        .parse()
        .with_context(|| format!("invalid ApproximateNumberOfMessages {value:?}"))
}
