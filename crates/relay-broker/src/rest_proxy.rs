//! HTTP transport for the Kafka REST Proxy v2 JSON API (POST /topics/{topic}).

use crate::{BrokerConfig, SaslCredentials, Transport};
use relay_types::{BrokerAck, TransportError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

const CONTENT_TYPE: &str = "application/vnd.kafka.json.v2+json";
const ACCEPT: &str = "application/vnd.kafka.v2+json, application/json";

#[derive(Debug, Serialize)]
struct ProduceRequest<'a> {
    records: [ProduceRecord<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ProduceRecord<'a> {
    key: &'a str,
    value: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ProduceResponse {
    #[serde(default)]
    offsets: Vec<PartitionOffset>,
}

#[derive(Debug, Deserialize)]
struct PartitionOffset {
    partition: Option<i32>,
    offset: Option<i64>,
    error_code: Option<i64>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProxyError {
    error_code: Option<i64>,
    message: Option<String>,
}

/// Transport that produces single records through a REST proxy. After a connection
/// error the next attempt goes to the next bootstrap endpoint.
pub struct RestProxyTransport {
    client: reqwest::Client,
    endpoints: Vec<String>,
    current: AtomicUsize,
    credentials: Option<SaslCredentials>,
}

impl RestProxyTransport {
    pub fn new(config: &BrokerConfig) -> Result<Self, TransportError> {
        let endpoints = config.endpoint_urls();
        if endpoints.is_empty() {
            return Err(TransportError::Connection(
                "no bootstrap endpoints configured".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.retry.timeout)
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            endpoints,
            current: AtomicUsize::new(0),
            credentials: config.sasl.clone(),
        })
    }

    fn endpoint(&self) -> &str {
        let i = self.current.load(Ordering::Relaxed) % self.endpoints.len();
        &self.endpoints[i]
    }

    fn rotate(&self) {
        if self.endpoints.len() > 1 {
            self.current.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[async_trait::async_trait]
impl Transport for RestProxyTransport {
    async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &serde_json::Value,
    ) -> Result<BrokerAck, TransportError> {
        let body = serde_json::to_vec(&ProduceRequest {
            records: [ProduceRecord {
                key,
                value: payload,
            }],
        })
        .map_err(|e| TransportError::Serialization(e.to_string()))?;

        let url = format!("{}/topics/{}", self.endpoint(), topic);
        debug!(url = %url, key = %key, "producing record");

        let mut req = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .header(reqwest::header::ACCEPT, ACCEPT)
            .body(body);
        if let Some(ref creds) = self.credentials {
            req = req.basic_auth(&creds.username, Some(&creds.password));
        }

        let res = match req.send().await {
            Ok(res) => res,
            Err(e) => {
                warn!(url = %url, error = %e, "rest proxy unreachable, rotating endpoint");
                self.rotate();
                return Err(TransportError::Connection(e.to_string()));
            }
        };

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        if !status.is_success() {
            let message = serde_json::from_str::<ProxyError>(&text)
                .ok()
                .map(|e| match (e.error_code, e.message) {
                    (Some(code), Some(msg)) => format!("{} (error_code {})", msg, code),
                    (_, Some(msg)) => msg,
                    _ => text.clone(),
                })
                .unwrap_or(text);
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ProduceResponse = serde_json::from_str(&text)
            .map_err(|e| TransportError::Serialization(format!("bad proxy response: {}", e)))?;
        let first = parsed.offsets.into_iter().next();
        if let Some(PartitionOffset {
            error_code: Some(code),
            error,
            ..
        }) = &first
        {
            // Per-record errors come back with 200; codes 1 and 2 are retriable on the proxy side.
            let status = if *code == 1 || *code == 2 { 503 } else { 422 };
            return Err(TransportError::Rejected {
                status,
                message: error
                    .clone()
                    .unwrap_or_else(|| format!("error_code {}", code)),
            });
        }
        let (partition, offset) = first
            .map(|o| (o.partition, o.offset))
            .unwrap_or((None, None));
        Ok(BrokerAck {
            topic: topic.to_string(),
            partition,
            offset,
        })
    }
}
