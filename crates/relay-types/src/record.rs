//! Outbox/inbox event records, field-level patches, filters and the caller-owned
//! write transaction.

use crate::{CloudEvent, ScheduleConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which table a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Outbound events relayed to the broker.
    Outbox,
    /// Inbound events staged from the broker.
    Inbox,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Outbox => "outbox",
            Direction::Inbox => "inbox",
        }
    }

    /// Flow type label used by the integration status view.
    pub fn flow_type(self) -> &'static str {
        match self {
            Direction::Outbox => "publishing",
            Direction::Inbox => "consuming",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery state of a record.
///
/// Outbox: `pending -> published | failed`, `failed -> pending` on redelivery.
/// Inbox records land in `received`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Published,
    Received,
    Failed,
    Disabled,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Published => "published",
            EventStatus::Received => "received",
            EventStatus::Failed => "failed",
            EventStatus::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EventStatus::Pending),
            "published" => Some(EventStatus::Published),
            "received" => Some(EventStatus::Received),
            "failed" => Some(EventStatus::Failed),
            "disabled" => Some(EventStatus::Disabled),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the outbox or inbox table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: String,
    pub direction: Direction,
    /// Logical event type key, e.g. `lmp_grade_submitted`. Not unique.
    pub event_id: String,
    pub event_name: String,
    pub description: String,
    /// Publishing-enabled (outbox) or consuming-enabled (inbox).
    pub enabled: bool,
    pub status: EventStatus,
    /// CloudEvent envelope. Written once at creation.
    pub event_data: serde_json::Value,
    #[serde(default)]
    pub event_metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub field_mappings: Option<serde_json::Value>,
    #[serde(default)]
    pub schedule_config: Option<ScheduleConfig>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Bumped by every write, operator or delivery path.
    pub modified_at: DateTime<Utc>,
    /// Last time the delivery path recorded an outcome.
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    pub tenant_id: String,
}

impl EventRecord {
    /// New outbox record in `pending`, keyed by the envelope id.
    pub fn outbound(
        envelope: &CloudEvent,
        event_name: &str,
        description: &str,
        tenant_id: &str,
        created_by: &str,
    ) -> Self {
        Self::from_envelope(
            Direction::Outbox,
            EventStatus::Pending,
            envelope,
            event_name,
            description,
            tenant_id,
            created_by,
        )
    }

    /// New inbox record in `received`, keyed by the inbound envelope id.
    pub fn inbound(
        envelope: &CloudEvent,
        event_name: &str,
        description: &str,
        tenant_id: &str,
        created_by: &str,
    ) -> Self {
        Self::from_envelope(
            Direction::Inbox,
            EventStatus::Received,
            envelope,
            event_name,
            description,
            tenant_id,
            created_by,
        )
    }

    fn from_envelope(
        direction: Direction,
        status: EventStatus,
        envelope: &CloudEvent,
        event_name: &str,
        description: &str,
        tenant_id: &str,
        created_by: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: envelope.id.clone(),
            direction,
            event_id: envelope.event_type.clone(),
            event_name: event_name.to_string(),
            description: description.to_string(),
            enabled: true,
            status,
            event_data: envelope.to_value(),
            event_metadata: None,
            field_mappings: None,
            schedule_config: None,
            retry_count: 0,
            error_message: None,
            created_by: created_by.to_string(),
            created_at: now,
            updated_by: None,
            updated_at: None,
            modified_at: now,
            processed_at: None,
            tenant_id: tenant_id.to_string(),
        }
    }
}

/// Field-level update. Only fields that are set are written, so a delivery
/// outcome and an operator toggle on the same row never clobber each other.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub enabled: Option<bool>,
    pub status: Option<EventStatus>,
    /// Applied by the store as an atomic `retry_count + 1`.
    pub increment_retry: bool,
    /// `Some(None)` clears the message.
    pub error_message: Option<Option<String>>,
    pub field_mappings: Option<serde_json::Value>,
    pub schedule_config: Option<ScheduleConfig>,
    pub updated_by: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    /// Guard: write only while the row is in this status.
    pub expect_status: Option<EventStatus>,
    /// Guard: write only if the row was last modified strictly before this instant.
    pub expect_modified_before: Option<DateTime<Utc>>,
}

impl RecordPatch {
    /// Operator edit: stamps `updatedBy`/`updatedAt`.
    pub fn by_operator(actor: &str) -> Self {
        Self {
            updated_by: Some(actor.to_string()),
            updated_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Delivery path: broker acknowledged the record.
    pub fn delivered() -> Self {
        Self {
            status: Some(EventStatus::Published),
            error_message: Some(None),
            processed_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Delivery path: broker publish failed.
    pub fn delivery_failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(EventStatus::Failed),
            increment_retry: true,
            error_message: Some(Some(message.into())),
            processed_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn with_status(mut self, status: EventStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_field_mappings(mut self, mappings: serde_json::Value) -> Self {
        self.field_mappings = Some(mappings);
        self
    }

    pub fn with_schedule(mut self, schedule: ScheduleConfig) -> Self {
        self.schedule_config = Some(schedule);
        self
    }

    /// Make the write conditional on the row's current status.
    pub fn when_status(mut self, status: EventStatus) -> Self {
        self.expect_status = Some(status);
        self
    }

    pub fn when_modified_before(mut self, at: DateTime<Utc>) -> Self {
        self.expect_modified_before = Some(at);
        self
    }

    /// Whether the guards accept the row as it is now.
    pub fn allows(&self, record: &EventRecord) -> bool {
        self.expect_status.map_or(true, |s| record.status == s)
            && self
                .expect_modified_before
                .map_or(true, |at| record.modified_at < at)
    }

    pub fn is_empty(&self) -> bool {
        *self == RecordPatch::default()
    }

    /// Apply the set fields to an in-memory copy of the row.
    pub fn apply_to(&self, record: &mut EventRecord, now: DateTime<Utc>) {
        if let Some(enabled) = self.enabled {
            record.enabled = enabled;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if self.increment_retry {
            record.retry_count = record.retry_count.saturating_add(1);
        }
        if let Some(ref msg) = self.error_message {
            record.error_message = msg.clone();
        }
        if let Some(ref mappings) = self.field_mappings {
            record.field_mappings = Some(mappings.clone());
        }
        if let Some(ref schedule) = self.schedule_config {
            record.schedule_config = Some(schedule.clone());
        }
        if let Some(ref by) = self.updated_by {
            record.updated_by = Some(by.clone());
        }
        if let Some(at) = self.updated_at {
            record.updated_at = Some(at);
        }
        if let Some(at) = self.processed_at {
            record.processed_at = Some(at);
        }
        record.modified_at = now;
    }
}

/// Filter for `EventStore::list`. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub tenant_id: Option<String>,
    pub enabled: Option<bool>,
    pub status: Option<EventStatus>,
    pub event_id: Option<String>,
}

impl RecordFilter {
    pub fn tenant(tenant_id: &str) -> Self {
        Self {
            tenant_id: Some(tenant_id.to_string()),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &EventRecord) -> bool {
        if let Some(ref t) = self.tenant_id {
            if &record.tenant_id != t {
                return false;
            }
        }
        if let Some(enabled) = self.enabled {
            if record.enabled != enabled {
                return false;
            }
        }
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        if let Some(ref e) = self.event_id {
            if &record.event_id != e {
                return false;
            }
        }
        true
    }
}

/// One write staged in a [`StoreTransaction`].
#[derive(Debug, Clone)]
pub enum StagedWrite {
    Create(EventRecord),
    Update {
        direction: Direction,
        id: String,
        patch: RecordPatch,
    },
}

/// Caller-owned unit of work. Writes become visible only when the store commits
/// the whole transaction; dropping it unapplied is a rollback.
#[derive(Debug, Default)]
pub struct StoreTransaction {
    writes: Vec<StagedWrite>,
}

impl StoreTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an insert; returns the record id.
    pub fn create(&mut self, record: EventRecord) -> String {
        let id = record.id.clone();
        self.writes.push(StagedWrite::Create(record));
        id
    }

    pub fn update(&mut self, direction: Direction, id: impl Into<String>, patch: RecordPatch) {
        self.writes.push(StagedWrite::Update {
            direction,
            id: id.into(),
            patch,
        });
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Discard every staged write.
    pub fn rollback(self) {}

    pub fn into_writes(self) -> Vec<StagedWrite> {
        self.writes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EnvelopeBuilder;

    fn outbox_record() -> EventRecord {
        let envelope = EnvelopeBuilder::default().build(
            "lmp_grade_submitted",
            serde_json::json!({ "grade": 9.5 }),
        );
        EventRecord::outbound(&envelope, "Grade Submitted", "desc", "t1", "system")
    }

    #[test]
    fn outbound_record_starts_pending_and_enabled() {
        let r = outbox_record();
        assert_eq!(r.status, EventStatus::Pending);
        assert!(r.enabled);
        assert_eq!(r.event_id, "lmp_grade_submitted");
        assert_eq!(r.id, r.event_data["id"].as_str().unwrap());
        assert_eq!(r.retry_count, 0);
    }

    #[test]
    fn guards_check_status_and_age() {
        let r = outbox_record();
        assert!(RecordPatch::delivered().allows(&r));
        assert!(RecordPatch::delivered()
            .when_status(EventStatus::Pending)
            .allows(&r));
        assert!(!RecordPatch::delivered()
            .when_status(EventStatus::Failed)
            .allows(&r));
        let later = r.modified_at + chrono::Duration::seconds(1);
        assert!(RecordPatch::default().when_modified_before(later).allows(&r));
        assert!(!RecordPatch::default()
            .when_modified_before(r.modified_at)
            .allows(&r));
    }

    #[test]
    fn patch_only_touches_set_fields() {
        let mut r = outbox_record();
        r.enabled = false;
        let now = Utc::now();
        RecordPatch::delivery_failed("boom").apply_to(&mut r, now);
        assert_eq!(r.status, EventStatus::Failed);
        assert_eq!(r.retry_count, 1);
        assert_eq!(r.error_message.as_deref(), Some("boom"));
        assert!(!r.enabled, "enabled flag must survive a delivery patch");
        assert_eq!(r.modified_at, now);

        RecordPatch::delivered().apply_to(&mut r, now);
        assert_eq!(r.status, EventStatus::Published);
        assert_eq!(r.retry_count, 1);
        assert!(r.error_message.is_none());
    }

    #[test]
    fn filter_matches_on_all_set_fields() {
        let r = outbox_record();
        assert!(RecordFilter::default().matches(&r));
        assert!(RecordFilter::tenant("t1").matches(&r));
        assert!(!RecordFilter::tenant("t2").matches(&r));
        let f = RecordFilter {
            status: Some(EventStatus::Received),
            ..Default::default()
        };
        assert!(!f.matches(&r));
    }

    #[test]
    fn transaction_stages_in_order() {
        let r = outbox_record();
        let mut tx = StoreTransaction::new();
        let id = tx.create(r.clone());
        tx.update(Direction::Outbox, id.clone(), RecordPatch::delivered());
        assert_eq!(tx.len(), 2);
        let writes = tx.into_writes();
        assert!(matches!(&writes[0], StagedWrite::Create(c) if c.id == id));
        assert!(matches!(&writes[1], StagedWrite::Update { id: u, .. } if *u == id));
    }
}
