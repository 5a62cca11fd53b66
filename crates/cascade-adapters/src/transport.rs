//! Minimal HTTP/1.1 client.
//!
//! One connection per request: the autoscaler makes a handful of calls per
//! tick, so pooling buys nothing and a fresh connection never carries state
//! from a failed call into the next one.

use std::time::Duration;

use anyhow::{Context, bail};
use bytes::Bytes;
use http::{Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::debug;

const USER_AGENT: &str = "cascade/0.1";

/// Longest response body excerpt carried in an error.
const MAX_ERROR_DETAIL_CHARS: usize = 512;

/// Status and fully buffered body of a response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Turn a non-2xx response into an error naming the operation.
    pub fn error_for_status(self, operation: &str) -> anyhow::Result<Self> {
        if self.status.is_success() {
            return Ok(self);
        }
        let detail: String = self.body_text().chars().take(MAX_ERROR_DETAIL_CHARS).collect();
        bail!("{operation} failed with status {}: {detail}", self.status);
    }
}

/// Send one request and buffer the response.
///
/// Only `http://` URLs are supported. The whole exchange, connect included,
/// is bounded by `timeout`.
pub async fn send(
    method: Method,
    url: &str,
    headers: &[(&str, &str)],
    body: Bytes,
    timeout: Duration,
) -> anyhow::Result<HttpResponse> {
    let uri: Uri = url.parse().with_context(|| format!("invalid url {url}"))?;
    if uri.scheme_str() != Some("http") {
        bail!("unsupported url {url}: only http is supported");
    }
    let authority = uri
        .authority()
        .with_context(|| format!("url {url} has no host"))?
        .clone();
    let address = format!("{}:{}", authority.host(), authority.port_u16().unwrap_or(80));
    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();

    let exchange = async {
        let stream = TcpStream::connect(&address)
            .await
            .with_context(|| format!("connect to {address}"))?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .with_context(|| format!("http handshake with {address}"))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "http connection closed with error");
            }
        });

        let mut builder = Request::builder()
            .method(method)
            .uri(target.as_str())
            .header("host", authority.as_str())
            .header("user-agent", USER_AGENT);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder
            .body(Full::new(body))
            .context("build http request")?;

        let response = sender
            .send_request(request)
            .await
            .with_context(|| format!("request to {url}"))?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .with_context(|| format!("read response from {url}"))?
            .to_bytes();

        debug!(%url, %status, bytes = body.len(), "http response");
        Ok::<_, anyhow::Error>(HttpResponse { status, body })
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => bail!("request to {url} timed out after {}ms", timeout.as_millis()),
    }
}
