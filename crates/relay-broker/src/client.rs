//! `Broker` implementation: topic naming, retry with backoff and an overall time budget
//! around a single-attempt `Transport`.

use crate::{BrokerConfig, RestProxyTransport};
use async_trait::async_trait;
use relay_types::{Broker, BrokerAck, TransportError};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// One delivery attempt against the broker. No retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &serde_json::Value,
    ) -> Result<BrokerAck, TransportError>;
}

pub struct BrokerClient {
    config: BrokerConfig,
    transport: Arc<dyn Transport>,
}

impl BrokerClient {
    pub fn new(config: BrokerConfig, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    /// Client over the Kafka REST Proxy transport.
    pub fn rest_proxy(config: BrokerConfig) -> Result<Self, TransportError> {
        let transport = RestProxyTransport::new(&config)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn from_env() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let config = BrokerConfig::from_env()?;
        Ok(Self::rest_proxy(config)?)
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    async fn publish_with_retry(
        &self,
        topic: &str,
        key: &str,
        payload: &serde_json::Value,
    ) -> Result<BrokerAck, TransportError> {
        let policy = &self.config.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.transport.send(topic, key, payload).await {
                Ok(ack) => {
                    debug!(topic = %topic, key = %key, attempt = attempt, "record acknowledged");
                    return Ok(ack);
                }
                Err(e) if !e.is_retryable() => {
                    error!(
                        topic = %topic,
                        key = %key,
                        attempt = attempt,
                        error = %e,
                        "non-retryable broker error"
                    );
                    return Err(e);
                }
                Err(e) => {
                    if attempt >= policy.max_attempts {
                        error!(
                            topic = %topic,
                            key = %key,
                            attempt = attempt,
                            error = %e,
                            "max retries exceeded"
                        );
                        return Err(TransportError::Exhausted {
                            attempts: attempt,
                            last: e.to_string(),
                        });
                    }

                    let delay = policy.backoff_for(attempt);
                    warn!(
                        topic = %topic,
                        key = %key,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl Broker for BrokerClient {
    fn topic_for(&self, event_type: &str) -> String {
        self.config.topic_for(event_type)
    }

    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &serde_json::Value,
    ) -> Result<BrokerAck, TransportError> {
        if !self.config.enabled {
            return Err(TransportError::Disabled);
        }
        let budget = self.config.retry.timeout;
        match tokio::time::timeout(budget, self.publish_with_retry(topic, key, payload)).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    topic = %topic,
                    key = %key,
                    budget_ms = budget.as_millis() as u64,
                    "publish timed out"
                );
                Err(TransportError::Timeout(budget))
            }
        }
    }
}
