//! Inbox staging: land inbound CloudEvents as `received` records, and read them back
//! with the operator's field mappings applied.

use crate::{DEFAULT_TENANT, SYSTEM_ACTOR};
use relay_control::ControlPlane;
use relay_types::{CloudEvent, Direction, EventRecord, EventStore, RelayError, StoreError};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An envelope handed over by whatever consumes the broker.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub envelope: Value,
    pub tenant_id: String,
    pub event_name: Option<String>,
    pub description: String,
    pub created_by: String,
}

impl InboundEvent {
    pub fn new(envelope: Value) -> Self {
        Self {
            envelope,
            tenant_id: DEFAULT_TENANT.to_string(),
            event_name: None,
            description: String::new(),
            created_by: SYSTEM_ACTOR.to_string(),
        }
    }

    pub fn for_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    pub fn named(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.event_name = Some(name.into());
        self.description = description.into();
        self
    }

    pub fn created_by(mut self, actor: impl Into<String>) -> Self {
        self.created_by = actor.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Staged(String),
    /// An envelope with this id was already staged; nothing written.
    Duplicate(String),
}

impl StageOutcome {
    pub fn id(&self) -> &str {
        match self {
            StageOutcome::Staged(id) | StageOutcome::Duplicate(id) => id,
        }
    }
}

#[derive(Clone)]
pub struct Inbox {
    store: Arc<dyn EventStore>,
    control: ControlPlane,
}

impl Inbox {
    pub fn new(store: Arc<dyn EventStore>, control: ControlPlane) -> Self {
        Self { store, control }
    }

    /// Validate and persist an inbound envelope. The record id is the envelope id, so
    /// redelivery by the broker is absorbed as `Duplicate`. An id already held by another
    /// tenant is a `Conflict`; nothing about that record is revealed.
    pub async fn stage(&self, event: InboundEvent) -> Result<StageOutcome, RelayError> {
        let envelope = CloudEvent::from_value(&event.envelope)?;
        let name = event
            .event_name
            .unwrap_or_else(|| envelope.event_type.clone());
        let record = EventRecord::inbound(
            &envelope,
            &name,
            &event.description,
            &event.tenant_id,
            &event.created_by,
        );
        match self.store.create(record).await {
            Ok(id) => {
                info!(
                    record_id = %id,
                    event_type = %envelope.event_type,
                    tenant_id = %event.tenant_id,
                    "inbound event staged"
                );
                Ok(StageOutcome::Staged(id))
            }
            Err(StoreError::Duplicate(id)) => {
                let existing = self.store.get(Direction::Inbox, &id).await?;
                if existing.is_some_and(|r| r.tenant_id == event.tenant_id) {
                    debug!(record_id = %id, "inbound event already staged");
                    return Ok(StageOutcome::Duplicate(id));
                }
                warn!(
                    record_id = %id,
                    tenant_id = %event.tenant_id,
                    "inbound event id collides with another tenant's record"
                );
                Err(RelayError::Conflict(
                    "Event id conflicts with an existing event".to_string(),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The envelope `data` of an inbox record with its field mappings applied.
    pub async fn mapped_payload(&self, tenant_id: &str, id: &str) -> Result<Value, RelayError> {
        let record = self.control.find(tenant_id, Direction::Inbox, id).await?;
        let data = record
            .event_data
            .get("data")
            .cloned()
            .unwrap_or(Value::Null);
        Ok(match record.field_mappings {
            Some(ref mappings) => map_fields(&data, mappings),
            None => data,
        })
    }
}

/// Rename top-level fields of `data`. `mappings` is either `{"external": "internal"}` or
/// `[{"source": "external", "target": "internal"}]`. Unmapped fields pass through; a
/// non-object `data` is returned as is.
pub fn map_fields(data: &Value, mappings: &Value) -> Value {
    let Some(fields) = data.as_object() else {
        return data.clone();
    };
    let pairs: Vec<(&str, &str)> = match mappings {
        Value::Object(obj) => obj
            .iter()
            .filter_map(|(from, to)| Some((from.as_str(), to.as_str()?)))
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|m| Some((m.get("source")?.as_str()?, m.get("target")?.as_str()?)))
            .collect(),
        _ => Vec::new(),
    };

    let mut out = Map::new();
    for (key, value) in fields {
        if !pairs.iter().any(|(from, _)| *from == key) {
            out.insert(key.clone(), value.clone());
        }
    }
    for (from, to) in pairs {
        if let Some(value) = fields.get(from) {
            out.insert(to.to_string(), value.clone());
        }
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_store::{InMemoryAuditStore, InMemoryControlStore, InMemoryEventStore};
    use relay_types::{EnvelopeBuilder, EventStatus};
    use serde_json::json;

    fn inbox() -> (Inbox, ControlPlane, Arc<InMemoryEventStore>) {
        let store = Arc::new(InMemoryEventStore::new());
        let control = ControlPlane::new(
            store.clone(),
            Arc::new(InMemoryControlStore::new()),
            Arc::new(InMemoryAuditStore::new()),
        );
        (Inbox::new(store.clone(), control.clone()), control, store)
    }

    fn envelope() -> Value {
        EnvelopeBuilder::new("/CMP/Sync")
            .build("cmp_enrolment_created", json!({ "user": "learner", "course": "TEST101" }))
            .to_value()
    }

    #[test]
    fn object_and_array_mappings() {
        let data = json!({ "user": "learner", "course": "TEST101", "extra": 1 });
        assert_eq!(
            map_fields(&data, &json!({ "user": "username", "course": "courseshortname" })),
            json!({ "username": "learner", "courseshortname": "TEST101", "extra": 1 })
        );
        assert_eq!(
            map_fields(
                &data,
                &json!([{ "source": "user", "target": "username" }, { "bogus": true }])
            ),
            json!({ "username": "learner", "course": "TEST101", "extra": 1 })
        );
        assert_eq!(map_fields(&json!([1, 2]), &json!({ "a": "b" })), json!([1, 2]));
    }

    #[tokio::test]
    async fn same_envelope_id_from_another_tenant_conflicts() {
        let (inbox, _, store) = inbox();
        let env = envelope();
        let first = inbox
            .stage(InboundEvent::new(env.clone()).for_tenant("school_a"))
            .await
            .unwrap();

        let err = inbox
            .stage(InboundEvent::new(env.clone()).for_tenant("school_b"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Conflict(_)));
        assert_eq!(err.code(), 409);

        let kept = store
            .get(Direction::Inbox, first.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept.tenant_id, "school_a");
    }

    #[tokio::test]
    async fn staging_is_idempotent_per_envelope() {
        let (inbox, _, store) = inbox();
        let env = envelope();
        let first = inbox
            .stage(InboundEvent::new(env.clone()).for_tenant("school_a"))
            .await
            .unwrap();
        assert!(matches!(first, StageOutcome::Staged(_)));
        let again = inbox
            .stage(InboundEvent::new(env.clone()).for_tenant("school_a"))
            .await
            .unwrap();
        assert_eq!(again, StageOutcome::Duplicate(first.id().to_string()));

        let record = store
            .get(Direction::Inbox, first.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, EventStatus::Received);
        assert_eq!(record.event_id, "cmp_enrolment_created");
        assert_eq!(record.event_name, "cmp_enrolment_created");
        assert_eq!(record.id, env["id"].as_str().unwrap());
    }

    #[tokio::test]
    async fn invalid_envelope_is_rejected() {
        let (inbox, _, _) = inbox();
        let err = inbox
            .stage(InboundEvent::new(json!({ "specversion": "0.3", "id": "x", "type": "t" })))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }

    #[tokio::test]
    async fn mapped_payload_applies_operator_mappings() {
        let (inbox, control, _) = inbox();
        let staged = inbox
            .stage(InboundEvent::new(envelope()).named("Enrolment", "CMP enrolment"))
            .await
            .unwrap();
        let id = staged.id();

        assert_eq!(
            inbox.mapped_payload(DEFAULT_TENANT, id).await.unwrap(),
            json!({ "user": "learner", "course": "TEST101" })
        );
        control
            .set_field_mappings(DEFAULT_TENANT, id, Some(&json!({ "user": "username" })), "admin")
            .await
            .unwrap();
        assert_eq!(
            inbox.mapped_payload(DEFAULT_TENANT, id).await.unwrap(),
            json!({ "username": "learner", "course": "TEST101" })
        );
        assert!(matches!(
            inbox.mapped_payload("other_tenant", id).await,
            Err(RelayError::NotFound(_))
        ));
    }
}
