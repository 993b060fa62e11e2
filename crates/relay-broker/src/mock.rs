//! Mock transport for tests: scripted failures and delays, records what was sent.

use crate::Transport;
use relay_types::{BrokerAck, TransportError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct SentRecord {
    pub topic: String,
    pub key: String,
    pub payload: serde_json::Value,
}

/// In-process transport. Fails the first `failing_times` calls with a connection error,
/// or every call when `always_failing` is set.
pub struct MockTransport {
    remaining_failures: AtomicU32,
    always: Option<TransportError>,
    delay: Option<Duration>,
    calls: AtomicU32,
    sent: Mutex<Vec<SentRecord>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            remaining_failures: AtomicU32::new(0),
            always: None,
            delay: None,
            calls: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_times(self, n: u32) -> Self {
        self.remaining_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn always_failing(mut self, err: TransportError) -> Self {
        self.always = Some(err);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of attempts made, successful or not.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Records that were acknowledged.
    pub fn sent(&self) -> Vec<SentRecord> {
        self.sent.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &serde_json::Value,
    ) -> Result<BrokerAck, TransportError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(ref err) = self.always {
            return Err(err.clone());
        }
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |r| r.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TransportError::Connection(format!(
                "mock connection refused (call {})",
                n + 1
            )));
        }
        if let Ok(mut guard) = self.sent.lock() {
            guard.push(SentRecord {
                topic: topic.to_string(),
                key: key.to_string(),
                payload: payload.clone(),
            });
        }
        Ok(BrokerAck {
            topic: topic.to_string(),
            partition: Some(0),
            offset: Some(n as i64),
        })
    }
}
