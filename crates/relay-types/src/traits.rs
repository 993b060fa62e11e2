//! Capability traits: record store, control flags, audit log and broker.

use crate::{
    AuditListOptions, AuditLogEntry, Direction, EventRecord, RecordFilter, RecordPatch,
    StoreError, StoreTransaction, TransportError,
};
use async_trait::async_trait;

/// Outbox/inbox persistence.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Apply every staged write atomically, or none of them.
    async fn commit(&self, tx: StoreTransaction) -> Result<(), StoreError>;

    /// Single-write transaction. The table is taken from `record.direction`.
    async fn create(&self, record: EventRecord) -> Result<String, StoreError> {
        let mut tx = StoreTransaction::new();
        let id = tx.create(record);
        self.commit(tx).await?;
        Ok(id)
    }

    async fn get(&self, direction: Direction, id: &str) -> Result<Option<EventRecord>, StoreError>;

    /// Field-level update. Returns `false` when no row has that id or the patch's
    /// guards reject the row; in both cases nothing is written.
    async fn update(
        &self,
        direction: Direction,
        id: &str,
        patch: &RecordPatch,
    ) -> Result<bool, StoreError>;

    /// Matching records, newest first (ties by insertion order, newest first).
    async fn list(
        &self,
        direction: Direction,
        filter: &RecordFilter,
    ) -> Result<Vec<EventRecord>, StoreError>;
}

/// Tenant-scoped global switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlFlag {
    EventsPublishing,
    EventsConsuming,
}

impl ControlFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlFlag::EventsPublishing => "events_publishing_enabled",
            ControlFlag::EventsConsuming => "events_consuming_enabled",
        }
    }
}

#[async_trait]
pub trait ControlStore: Send + Sync {
    /// `None` when the flag was never written for the tenant.
    async fn flag(&self, tenant_id: &str, flag: ControlFlag) -> Result<Option<bool>, StoreError>;

    async fn set_flag(
        &self,
        tenant_id: &str,
        flag: ControlFlag,
        value: bool,
    ) -> Result<(), StoreError>;

    /// Write `value` only if the stored flag currently equals `expected`. Returns
    /// whether the write happened.
    async fn replace_flag(
        &self,
        tenant_id: &str,
        flag: ControlFlag,
        expected: bool,
        value: bool,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: AuditLogEntry) -> Result<(), StoreError>;

    async fn list(&self, opts: &AuditListOptions) -> Result<Vec<AuditLogEntry>, StoreError>;
}

/// Broker acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAck {
    pub topic: String,
    pub partition: Option<i32>,
    pub offset: Option<i64>,
}

/// Publish capability in front of the message broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Topic that carries events of `event_type`.
    fn topic_for(&self, event_type: &str) -> String;

    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &serde_json::Value,
    ) -> Result<BrokerAck, TransportError>;
}
