// src/tier/http.rs — HTTP-backed tier adapter (hosted extraction services)

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use url::Url;

use super::{AdapterResponse, TierAdapter, TierFailure, TierOutput};
use crate::core::types::Tier;
use crate::infra::errors::BillwiseError;

/// Default wait when a 429 carries no usable `retry-after`.
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(5);

pub struct HttpAdapter {
    tier: Tier,
    client: reqwest::Client,
    endpoint: Url,
    headers: BTreeMap<String, String>,
}

impl HttpAdapter {
    pub fn new(
        tier: Tier,
        endpoint: &str,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, BillwiseError> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            BillwiseError::Config(format!("tiers.{tier}.endpoint '{endpoint}': {e}"))
        })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BillwiseError::Config(format!("HTTP client for {tier}: {e}")))?;
        Ok(Self {
            tier,
            client,
            endpoint,
            headers: headers.clone(),
        })
    }
}

#[async_trait]
impl TierAdapter for HttpAdapter {
    fn tier(&self) -> Tier {
        self.tier
    }

    async fn is_available(&self) -> Result<(), String> {
        match self.endpoint.host_str() {
            Some(_) => Ok(()),
            None => Err(format!("endpoint '{}' has no host", self.endpoint)),
        }
    }

    async fn extract(&self, bytes: &[u8], media_type: &str) -> Result<TierOutput, TierFailure> {
        let start = Instant::now();

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header("content-type", media_type)
            .header("accept", "application/json");
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    TierFailure::transient(e.to_string())
                } else {
                    TierFailure::Rejected(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RATE_LIMIT_WAIT);
            return Err(TierFailure::Transient {
                message: "HTTP 429 Too Many Requests".into(),
                retry_after: Some(retry_after),
            });
        }

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = format!("HTTP {}: {}", status, error_body.trim());
            return Err(if status.is_server_error() {
                TierFailure::transient(message)
            } else {
                TierFailure::Rejected(message)
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TierFailure::transient(format!("reading response body: {e}")))?;

        tracing::debug!(
            tier = %self.tier,
            status = status.as_u16(),
            bytes = body.len(),
            "Hosted extractor responded"
        );

        Ok(AdapterResponse::parse(&body)?.into_output(start.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one canned HTTP response on a random local port.
    async fn serve_once(status_line: &'static str, extra: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\n{extra}connection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}/extract")
    }

    fn adapter(endpoint: &str) -> HttpAdapter {
        HttpAdapter::new(
            Tier::HostedVision,
            endpoint,
            &BTreeMap::new(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_endpoint_is_config_error() {
        let err = HttpAdapter::new(
            Tier::HostedVision,
            "not a url",
            &BTreeMap::new(),
            Duration::from_secs(1),
        )
        .err()
        .unwrap();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_success_parses_response() {
        let url = serve_once(
            "200 OK",
            "",
            r#"{"fields":{"usage":254},"confidence":0.92,"raw_text":"254 kWh","cost":0.03}"#,
        )
        .await;
        let a = adapter(&url);
        assert!(a.is_available().await.is_ok());
        let out = a.extract(b"%PDF", "application/pdf").await.unwrap();
        assert_eq!(out.fields["usage"], 254);
        assert_eq!(out.confidence, Some(0.92));
        assert_eq!(out.cost, Some(0.03));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let url = serve_once("503 Service Unavailable", "", r#"{"error":"busy"}"#).await;
        let err = adapter(&url).extract(b"x", "image/png").await.unwrap_err();
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let url = serve_once("429 Too Many Requests", "retry-after: 2\r\n", "{}").await;
        let err = adapter(&url).extract(b"x", "image/png").await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn test_client_error_is_rejected() {
        let url = serve_once("400 Bad Request", "", r#"{"error":"unsupported"}"#).await;
        let err = adapter(&url).extract(b"x", "image/png").await.unwrap_err();
        match err {
            TierFailure::Rejected(msg) => assert!(msg.contains("400")),
            other => panic!("unexpected failure: {other:?}"),
        }
    }
}
