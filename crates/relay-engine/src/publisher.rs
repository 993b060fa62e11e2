//! Outbox publisher: record in a committed transaction, then relay in a spawned task.
//!
//! The triggering caller only ever waits for the local commit. Broker latency,
//! failures and panics land in the record's status, never in the caller.

use chrono::{Duration, Utc};
use relay_control::ControlPlane;
use relay_types::{
    Broker, Direction, EnvelopeBuilder, EventRecord, EventStatus, EventStore, RecordPatch,
    RelayError, StoreTransaction,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

pub const DEFAULT_TENANT: &str = "default_tenant";
pub const SYSTEM_ACTOR: &str = "system";
/// How long a `pending` record is left alone before `redeliver` may take it over.
/// Longer than the broker client's default 30 s call budget.
pub const DEFAULT_PENDING_GRACE_SECS: i64 = 120;

/// A domain occurrence to be recorded in the outbox.
#[derive(Debug, Clone)]
pub struct OutboundEvent {
    /// Event type key, e.g. `lmp_grade_submitted`.
    pub event_type: String,
    pub event_name: String,
    pub description: String,
    pub payload: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    pub tenant_id: String,
    pub created_by: String,
}

impl OutboundEvent {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        let event_type = event_type.into();
        Self {
            event_name: event_type.clone(),
            event_type,
            description: String::new(),
            payload,
            metadata: None,
            tenant_id: DEFAULT_TENANT.to_string(),
            created_by: SYSTEM_ACTOR.to_string(),
        }
    }

    pub fn named(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.event_name = name.into();
        self.description = description.into();
        self
    }

    pub fn for_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    pub fn created_by(mut self, actor: impl Into<String>) -> Self {
        self.created_by = actor.into();
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// What happened to one delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Broker acknowledged; record is `published`.
    Published { topic: String },
    /// Broker call failed; record is `failed` with the error recorded.
    Failed { error: String },
    /// Global publishing is off; broker not called, record stays `pending`.
    Skipped,
    /// The outbox write never committed; nothing was recorded.
    NotRecorded { error: String },
    /// The delivery task went away without reporting.
    Abandoned,
}

/// Returned once the outbox record is committed (or known not to be).
#[derive(Debug)]
pub struct PublishReceipt {
    pub record_id: Option<String>,
    outcome: oneshot::Receiver<DeliveryOutcome>,
}

impl PublishReceipt {
    fn not_recorded(error: String) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(DeliveryOutcome::NotRecorded { error });
        Self {
            record_id: None,
            outcome: rx,
        }
    }

    pub fn is_recorded(&self) -> bool {
        self.record_id.is_some()
    }

    /// Wait for the delivery task. Optional; dropping the receipt changes nothing.
    pub async fn outcome(self) -> DeliveryOutcome {
        self.outcome.await.unwrap_or(DeliveryOutcome::Abandoned)
    }
}

#[derive(Clone)]
pub struct Publisher {
    store: Arc<dyn EventStore>,
    broker: Arc<dyn Broker>,
    control: ControlPlane,
    envelopes: EnvelopeBuilder,
    pending_grace: Duration,
}

impl Publisher {
    pub fn new(
        store: Arc<dyn EventStore>,
        broker: Arc<dyn Broker>,
        control: ControlPlane,
        envelopes: EnvelopeBuilder,
    ) -> Self {
        Self {
            store,
            broker,
            control,
            envelopes,
            pending_grace: Duration::seconds(DEFAULT_PENDING_GRACE_SECS),
        }
    }

    pub fn with_pending_grace(mut self, grace: Duration) -> Self {
        self.pending_grace = grace;
        self
    }

    /// Record the event durably, then relay it in the background. Never fails the caller:
    /// a commit failure is logged and reported through the receipt.
    pub async fn publish_event(&self, event: OutboundEvent) -> PublishReceipt {
        let envelope = self.envelopes.build(&event.event_type, event.payload);
        let mut record = EventRecord::outbound(
            &envelope,
            &event.event_name,
            &event.description,
            &event.tenant_id,
            &event.created_by,
        );
        record.event_metadata = event.metadata;

        let mut tx = StoreTransaction::new();
        let record_id = tx.create(record.clone());
        if let Err(e) = self.store.commit(tx).await {
            error!(
                record_id = %record_id,
                event_type = %event.event_type,
                error = %e,
                "failed to record outbox event"
            );
            return PublishReceipt::not_recorded(e.to_string());
        }
        debug!(record_id = %record_id, event_type = %event.event_type, "outbox event recorded");

        PublishReceipt {
            record_id: Some(record_id),
            outcome: self.spawn_delivery(record),
        }
    }

    /// Re-attempt a `failed` or stale `pending` outbox record. Records whose per-event
    /// flag is off are refused. The status change is conditional in the store, so of
    /// two concurrent calls at most one wins.
    pub async fn redeliver(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> Result<PublishReceipt, RelayError> {
        let record = self.control.find(tenant_id, Direction::Outbox, id).await?;
        if !record.enabled {
            return Err(RelayError::validation(
                "Event publishing is disabled for this event",
            ));
        }
        let reset = RecordPatch::default().with_status(EventStatus::Pending);
        let patch = match record.status {
            EventStatus::Failed => reset.when_status(EventStatus::Failed),
            EventStatus::Pending => {
                let cutoff = Utc::now() - self.pending_grace;
                if record.modified_at >= cutoff {
                    return Err(RelayError::validation("Event is still being delivered"));
                }
                reset
                    .when_status(EventStatus::Pending)
                    .when_modified_before(cutoff)
            }
            other => {
                return Err(RelayError::validation(format!(
                    "Event in status {} cannot be redelivered",
                    other
                )))
            }
        };
        if !self.store.update(Direction::Outbox, id, &patch).await? {
            return Err(RelayError::validation("Event is already being redelivered"));
        }
        info!(record_id = %id, retry_count = record.retry_count, "redelivering outbox event");
        Ok(PublishReceipt {
            record_id: Some(record.id.clone()),
            outcome: self.spawn_delivery(record),
        })
    }

    fn spawn_delivery(&self, record: EventRecord) -> oneshot::Receiver<DeliveryOutcome> {
        let (tx, rx) = oneshot::channel();
        let this = self.clone();
        tokio::spawn(async move {
            let outcome = this.deliver(record).await;
            let _ = tx.send(outcome);
        });
        rx
    }

    async fn deliver(&self, record: EventRecord) -> DeliveryOutcome {
        match self.control.publishing_enabled(&record.tenant_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    record_id = %record.id,
                    tenant_id = %record.tenant_id,
                    "global publishing disabled, leaving record pending"
                );
                return DeliveryOutcome::Skipped;
            }
            Err(e) => {
                warn!(
                    record_id = %record.id,
                    error = %e,
                    "could not read publishing flag, leaving record pending"
                );
                return DeliveryOutcome::Skipped;
            }
        }

        let topic = self.broker.topic_for(&record.event_id);
        let broker = Arc::clone(&self.broker);
        let (call_topic, key, payload) = (topic.clone(), record.id.clone(), record.event_data);
        // Separate task so an adapter panic surfaces as a JoinError instead of killing delivery.
        let result =
            tokio::spawn(async move { broker.publish(&call_topic, &key, &payload).await }).await;

        let (patch, outcome) = match result {
            Ok(Ok(ack)) => {
                info!(
                    record_id = %record.id,
                    topic = %topic,
                    partition = ?ack.partition,
                    offset = ?ack.offset,
                    "event published"
                );
                (
                    RecordPatch::delivered(),
                    DeliveryOutcome::Published { topic },
                )
            }
            Ok(Err(e)) => {
                warn!(record_id = %record.id, topic = %topic, error = %e, "event delivery failed");
                let msg = e.to_string();
                (
                    RecordPatch::delivery_failed(msg.clone()),
                    DeliveryOutcome::Failed { error: msg },
                )
            }
            Err(join) => {
                error!(
                    record_id = %record.id,
                    topic = %topic,
                    error = %join,
                    "broker adapter crashed"
                );
                let msg = format!("broker adapter crashed: {}", join);
                (
                    RecordPatch::delivery_failed(msg.clone()),
                    DeliveryOutcome::Failed { error: msg },
                )
            }
        };

        let patch = patch.when_status(EventStatus::Pending);
        match self.store.update(Direction::Outbox, &record.id, &patch).await {
            Ok(true) => {}
            Ok(false) => warn!(
                record_id = %record.id,
                outcome = ?outcome,
                "record no longer pending, delivery outcome not recorded"
            ),
            Err(e) => error!(
                record_id = %record.id,
                error = %e,
                "failed to record delivery outcome"
            ),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_broker::{BrokerClient, BrokerConfig, MockTransport, RetryPolicy, TransportError};
    use relay_store::{InMemoryAuditStore, InMemoryControlStore, InMemoryEventStore};
    use relay_types::{BrokerAck, RecordFilter, StoreError};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        publisher: Publisher,
        store: Arc<InMemoryEventStore>,
        control: ControlPlane,
        transport: Arc<MockTransport>,
    }

    fn harness(transport: MockTransport) -> Harness {
        let store = Arc::new(InMemoryEventStore::new());
        let control = ControlPlane::new(
            store.clone(),
            Arc::new(InMemoryControlStore::new()),
            Arc::new(InMemoryAuditStore::new()),
        );
        let transport = Arc::new(transport);
        let config = BrokerConfig {
            enabled: true,
            retry: RetryPolicy {
                max_attempts: 1,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
                timeout: Duration::from_secs(5),
            },
            ..Default::default()
        };
        let broker = Arc::new(BrokerClient::new(config, transport.clone()));
        let publisher = Publisher::new(
            store.clone(),
            broker,
            control.clone(),
            EnvelopeBuilder::default(),
        );
        Harness {
            publisher,
            store,
            control,
            transport,
        }
    }

    fn grade_event() -> OutboundEvent {
        OutboundEvent::new("lmp_grade_submitted", json!({ "grade": 91.5 }))
            .named("Grade Submitted", "Individual grade submission from LMP to CMP")
    }

    #[tokio::test]
    async fn successful_delivery_marks_published() {
        let h = harness(MockTransport::new());
        let receipt = h.publisher.publish_event(grade_event()).await;
        let id = receipt.record_id.clone().unwrap();
        assert_eq!(
            receipt.outcome().await,
            DeliveryOutcome::Published {
                topic: "lmp_grade_submitted".into()
            }
        );
        let record = h.store.get(Direction::Outbox, &id).await.unwrap().unwrap();
        assert_eq!(record.status, EventStatus::Published);
        assert!(record.processed_at.is_some());
        assert_eq!(record.tenant_id, DEFAULT_TENANT);
        assert_eq!(record.created_by, SYSTEM_ACTOR);

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].key, id);
        assert_eq!(sent[0].payload["id"], json!(id));
        assert_eq!(sent[0].payload["data"]["grade"], json!(91.5));
    }

    #[tokio::test]
    async fn broker_failure_marks_failed_and_caller_is_unaffected() {
        let h = harness(
            MockTransport::new().always_failing(TransportError::Connection("refused".into())),
        );
        let receipt = h.publisher.publish_event(grade_event()).await;
        assert!(receipt.is_recorded());
        let id = receipt.record_id.clone().unwrap();
        assert!(matches!(
            receipt.outcome().await,
            DeliveryOutcome::Failed { .. }
        ));

        let record = h.store.get(Direction::Outbox, &id).await.unwrap().unwrap();
        assert_eq!(record.status, EventStatus::Failed);
        assert_eq!(record.retry_count, 1);
        assert!(!record.error_message.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn global_flag_off_skips_broker_but_records() {
        let h = harness(MockTransport::new());
        h.control
            .set_publishing_enabled(DEFAULT_TENANT, false, "admin")
            .await
            .unwrap();
        let receipt = h.publisher.publish_event(grade_event()).await;
        let id = receipt.record_id.clone().unwrap();
        assert_eq!(receipt.outcome().await, DeliveryOutcome::Skipped);

        let record = h.store.get(Direction::Outbox, &id).await.unwrap().unwrap();
        assert_eq!(record.status, EventStatus::Pending);
        assert_eq!(h.transport.calls(), 0);
    }

    #[tokio::test]
    async fn per_event_flag_does_not_block_recording() {
        let h = harness(MockTransport::new());
        let first = h.publisher.publish_event(grade_event()).await;
        let first_id = first.record_id.clone().unwrap();
        first.outcome().await;
        h.control
            .set_event_flag(DEFAULT_TENANT, Direction::Outbox, &first_id, false, "admin")
            .await
            .unwrap();

        let second = h.publisher.publish_event(grade_event()).await;
        assert!(matches!(
            second.outcome().await,
            DeliveryOutcome::Published { .. }
        ));
        let all = h
            .store
            .list(Direction::Outbox, &RecordFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    struct FailingStore;

    #[async_trait]
    impl EventStore for FailingStore {
        async fn commit(&self, _tx: StoreTransaction) -> Result<(), StoreError> {
            Err(StoreError::Backend("database is locked".into()))
        }
        async fn get(
            &self,
            _direction: Direction,
            _id: &str,
        ) -> Result<Option<EventRecord>, StoreError> {
            Ok(None)
        }
        async fn update(
            &self,
            _direction: Direction,
            _id: &str,
            _patch: &RecordPatch,
        ) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn list(
            &self,
            _direction: Direction,
            _filter: &RecordFilter,
        ) -> Result<Vec<EventRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn commit_failure_is_reported_not_raised() {
        let transport = Arc::new(MockTransport::new());
        let store: Arc<dyn EventStore> = Arc::new(FailingStore);
        let control = ControlPlane::new(
            store.clone(),
            Arc::new(InMemoryControlStore::new()),
            Arc::new(InMemoryAuditStore::new()),
        );
        let broker = Arc::new(BrokerClient::new(
            BrokerConfig {
                enabled: true,
                ..Default::default()
            },
            transport.clone(),
        ));
        let publisher = Publisher::new(store, broker, control, EnvelopeBuilder::default());

        let receipt = publisher.publish_event(grade_event()).await;
        assert!(!receipt.is_recorded());
        assert!(matches!(
            receipt.outcome().await,
            DeliveryOutcome::NotRecorded { .. }
        ));
        assert_eq!(transport.calls(), 0);
    }

    struct PanickingBroker;

    #[async_trait]
    impl Broker for PanickingBroker {
        fn topic_for(&self, event_type: &str) -> String {
            event_type.to_string()
        }
        async fn publish(
            &self,
            _topic: &str,
            _key: &str,
            _payload: &serde_json::Value,
        ) -> Result<BrokerAck, TransportError> {
            panic!("producer exploded")
        }
    }

    #[tokio::test]
    async fn adapter_panic_becomes_failed_status() {
        let store = Arc::new(InMemoryEventStore::new());
        let control = ControlPlane::new(
            store.clone(),
            Arc::new(InMemoryControlStore::new()),
            Arc::new(InMemoryAuditStore::new()),
        );
        let publisher = Publisher::new(
            store.clone(),
            Arc::new(PanickingBroker),
            control,
            EnvelopeBuilder::default(),
        );
        let receipt = publisher.publish_event(grade_event()).await;
        let id = receipt.record_id.clone().unwrap();
        assert!(matches!(
            receipt.outcome().await,
            DeliveryOutcome::Failed { .. }
        ));
        let record = store.get(Direction::Outbox, &id).await.unwrap().unwrap();
        assert_eq!(record.status, EventStatus::Failed);
        assert_eq!(record.retry_count, 1);
    }

    #[tokio::test]
    async fn redeliver_moves_failed_back_through_delivery() {
        let h = harness(MockTransport::new().failing_times(1));
        let receipt = h.publisher.publish_event(grade_event()).await;
        let id = receipt.record_id.clone().unwrap();
        assert!(matches!(
            receipt.outcome().await,
            DeliveryOutcome::Failed { .. }
        ));

        let again = h.publisher.redeliver(DEFAULT_TENANT, &id).await.unwrap();
        assert!(matches!(
            again.outcome().await,
            DeliveryOutcome::Published { .. }
        ));
        let record = h.store.get(Direction::Outbox, &id).await.unwrap().unwrap();
        assert_eq!(record.status, EventStatus::Published);
        assert_eq!(record.retry_count, 1);
        assert!(record.error_message.is_none());

        let err = h.publisher.redeliver(DEFAULT_TENANT, &id).await.unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }

    #[tokio::test]
    async fn redeliver_refuses_in_flight_delivery() {
        let h = harness(
            MockTransport::new()
                .failing_times(1)
                .with_delay(Duration::from_millis(200)),
        );
        let receipt = h.publisher.publish_event(grade_event()).await;
        let id = receipt.record_id.clone().unwrap();

        let (a, b) = tokio::join!(
            h.publisher.redeliver(DEFAULT_TENANT, &id),
            h.publisher.redeliver(DEFAULT_TENANT, &id)
        );
        assert!(matches!(a, Err(RelayError::Validation(_))));
        assert!(matches!(b, Err(RelayError::Validation(_))));

        assert!(matches!(
            receipt.outcome().await,
            DeliveryOutcome::Failed { .. }
        ));
        let again = h.publisher.redeliver(DEFAULT_TENANT, &id).await.unwrap();
        assert!(matches!(
            again.outcome().await,
            DeliveryOutcome::Published { .. }
        ));
        let record = h.store.get(Direction::Outbox, &id).await.unwrap().unwrap();
        assert_eq!(record.status, EventStatus::Published);
        assert_eq!(record.retry_count, 1);
        assert_eq!(h.transport.calls(), 2);
    }

    #[tokio::test]
    async fn concurrent_redeliver_of_failed_record_runs_once() {
        let h = harness(MockTransport::new().failing_times(1));
        let receipt = h.publisher.publish_event(grade_event()).await;
        let id = receipt.record_id.clone().unwrap();
        receipt.outcome().await;

        let (a, b) = tokio::join!(
            h.publisher.redeliver(DEFAULT_TENANT, &id),
            h.publisher.redeliver(DEFAULT_TENANT, &id)
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        let winner = a.or(b).unwrap();
        assert!(matches!(
            winner.outcome().await,
            DeliveryOutcome::Published { .. }
        ));
        assert_eq!(h.transport.calls(), 2);
    }

    #[tokio::test]
    async fn stale_pending_record_can_be_redelivered() {
        let h = harness(MockTransport::new());
        h.control
            .set_publishing_enabled(DEFAULT_TENANT, false, "admin")
            .await
            .unwrap();
        let receipt = h.publisher.publish_event(grade_event()).await;
        let id = receipt.record_id.clone().unwrap();
        assert_eq!(receipt.outcome().await, DeliveryOutcome::Skipped);
        assert!(matches!(
            h.publisher.redeliver(DEFAULT_TENANT, &id).await,
            Err(RelayError::Validation(_))
        ));

        h.control
            .set_publishing_enabled(DEFAULT_TENANT, true, "admin")
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let eager = h.publisher.clone().with_pending_grace(chrono::Duration::zero());
        let again = eager.redeliver(DEFAULT_TENANT, &id).await.unwrap();
        assert!(matches!(
            again.outcome().await,
            DeliveryOutcome::Published { .. }
        ));
    }

    #[tokio::test]
    async fn redeliver_respects_event_flag_and_tenant() {
        let h = harness(
            MockTransport::new().always_failing(TransportError::Rejected {
                status: 400,
                message: "bad".into(),
            }),
        );
        let receipt = h.publisher.publish_event(grade_event()).await;
        let id = receipt.record_id.clone().unwrap();
        receipt.outcome().await;

        assert!(matches!(
            h.publisher.redeliver("other_tenant", &id).await,
            Err(RelayError::NotFound(_))
        ));
        h.control
            .set_event_flag(DEFAULT_TENANT, Direction::Outbox, &id, false, "admin")
            .await
            .unwrap();
        assert!(matches!(
            h.publisher.redeliver(DEFAULT_TENANT, &id).await,
            Err(RelayError::Validation(_))
        ));
    }
}
