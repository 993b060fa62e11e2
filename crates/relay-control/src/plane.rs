//! Tenant-scoped control plane over the record, flag and audit stores.

use crate::validate_schedule;
use relay_types::{
    AuditComponent, AuditListOptions, AuditLogEntry, AuditStore, ControlFlag, ControlStore,
    Direction, EventRecord, EventStore, RecordPatch, RelayError, ScheduleConfig,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Flags that were never written read as enabled.
const FLAG_DEFAULT: bool = true;

/// Global switches, per-event flags, schedules and field mappings. Every write
/// is audited.
#[derive(Clone)]
pub struct ControlPlane {
    events: Arc<dyn EventStore>,
    flags: Arc<dyn ControlStore>,
    audit: Arc<dyn AuditStore>,
}

impl ControlPlane {
    pub fn new(
        events: Arc<dyn EventStore>,
        flags: Arc<dyn ControlStore>,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            events,
            flags,
            audit,
        }
    }

    pub fn audit_log(&self) -> &Arc<dyn AuditStore> {
        &self.audit
    }

    fn flag_component(flag: ControlFlag) -> (AuditComponent, &'static str) {
        match flag {
            ControlFlag::EventsPublishing => {
                (AuditComponent::ProductControl, "eventsPublishingEnabled")
            }
            ControlFlag::EventsConsuming => {
                (AuditComponent::ConsumerControl, "eventsConsumingEnabled")
            }
        }
    }

    pub async fn flag(&self, tenant_id: &str, flag: ControlFlag) -> Result<bool, RelayError> {
        Ok(self
            .flags
            .flag(tenant_id, flag)
            .await?
            .unwrap_or(FLAG_DEFAULT))
    }

    /// Write a global flag and append its audit entry. If the audit append fails the
    /// previous value is restored, unless another write changed the flag meanwhile, and
    /// the error returned.
    pub async fn set_flag(
        &self,
        tenant_id: &str,
        flag: ControlFlag,
        enabled: bool,
        actor: &str,
    ) -> Result<AuditLogEntry, RelayError> {
        let previous = self.flags.flag(tenant_id, flag).await?;
        self.flags.set_flag(tenant_id, flag, enabled).await?;

        let (component, field) = Self::flag_component(flag);
        let entry = AuditLogEntry::new(
            tenant_id,
            component,
            if enabled { "enable" } else { "disable" },
            actor,
        );
        let at = entry.timestamp.to_rfc3339();
        let entry = entry.with_details(json!({ field: enabled, "timestamp": at }));

        if let Err(e) = self.audit.append(entry.clone()).await {
            warn!(
                tenant_id = %tenant_id,
                flag = flag.as_str(),
                error = %e,
                "audit append failed, restoring flag"
            );
            let restore = previous.unwrap_or(FLAG_DEFAULT);
            match self.flags.replace_flag(tenant_id, flag, enabled, restore).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(
                        tenant_id = %tenant_id,
                        flag = flag.as_str(),
                        "flag changed concurrently, not restored"
                    )
                }
                Err(re) => {
                    warn!(
                        tenant_id = %tenant_id,
                        flag = flag.as_str(),
                        error = %re,
                        "failed to restore flag"
                    )
                }
            }
            return Err(e.into());
        }
        info!(
            tenant_id = %tenant_id,
            flag = flag.as_str(),
            enabled = enabled,
            actor = %actor,
            "global flag changed"
        );
        Ok(entry)
    }

    pub async fn publishing_enabled(&self, tenant_id: &str) -> Result<bool, RelayError> {
        self.flag(tenant_id, ControlFlag::EventsPublishing).await
    }

    pub async fn set_publishing_enabled(
        &self,
        tenant_id: &str,
        enabled: bool,
        actor: &str,
    ) -> Result<AuditLogEntry, RelayError> {
        self.set_flag(tenant_id, ControlFlag::EventsPublishing, enabled, actor)
            .await
    }

    pub async fn consuming_enabled(&self, tenant_id: &str) -> Result<bool, RelayError> {
        self.flag(tenant_id, ControlFlag::EventsConsuming).await
    }

    pub async fn set_consuming_enabled(
        &self,
        tenant_id: &str,
        enabled: bool,
        actor: &str,
    ) -> Result<AuditLogEntry, RelayError> {
        self.set_flag(tenant_id, ControlFlag::EventsConsuming, enabled, actor)
            .await
    }

    /// Most recent audited change of a global flag.
    pub async fn last_flag_change(
        &self,
        tenant_id: &str,
        flag: ControlFlag,
    ) -> Result<Option<AuditLogEntry>, RelayError> {
        let (component, _) = Self::flag_component(flag);
        let opts = AuditListOptions {
            tenant_id: Some(tenant_id.to_string()),
            component: Some(component),
            limit: Some(1),
            ..Default::default()
        };
        Ok(self.audit.list(&opts).await?.into_iter().next())
    }

    /// Record by id within the tenant. Other tenants' records read as not found.
    pub async fn find(
        &self,
        tenant_id: &str,
        direction: Direction,
        id: &str,
    ) -> Result<EventRecord, RelayError> {
        match self.events.get(direction, id).await? {
            Some(record) if record.tenant_id == tenant_id => Ok(record),
            _ => Err(RelayError::not_found("Event not found")),
        }
    }

    /// Outbox first, then inbox.
    pub async fn locate(&self, tenant_id: &str, id: &str) -> Result<EventRecord, RelayError> {
        match self.find(tenant_id, Direction::Outbox, id).await {
            Err(RelayError::NotFound(_)) => self.find(tenant_id, Direction::Inbox, id).await,
            other => other,
        }
    }

    async fn patch_and_reload(
        &self,
        record: &EventRecord,
        patch: RecordPatch,
    ) -> Result<EventRecord, RelayError> {
        if !self.events.update(record.direction, &record.id, &patch).await? {
            return Err(RelayError::not_found("Event not found"));
        }
        self.find(&record.tenant_id, record.direction, &record.id)
            .await
    }

    /// Audit failures on per-record edits are logged; the edit itself stands.
    async fn audit_record_change(&self, entry: AuditLogEntry) {
        let event_id = entry.event_id.clone().unwrap_or_default();
        if let Err(e) = self.audit.append(entry).await {
            warn!(record_id = %event_id, error = %e, "failed to append audit entry");
        }
    }

    pub async fn event_flag(
        &self,
        tenant_id: &str,
        direction: Direction,
        id: &str,
    ) -> Result<bool, RelayError> {
        Ok(self.find(tenant_id, direction, id).await?.enabled)
    }

    pub async fn set_event_flag(
        &self,
        tenant_id: &str,
        direction: Direction,
        id: &str,
        enabled: bool,
        actor: &str,
    ) -> Result<EventRecord, RelayError> {
        let record = self.find(tenant_id, direction, id).await?;
        let updated = self
            .patch_and_reload(&record, RecordPatch::by_operator(actor).with_enabled(enabled))
            .await?;

        let component = match direction {
            Direction::Outbox => AuditComponent::PublishingEvent,
            Direction::Inbox => AuditComponent::ConsumingEvent,
        };
        self.audit_record_change(
            AuditLogEntry::new(
                tenant_id,
                component,
                if enabled { "enable" } else { "disable" },
                actor,
            )
            .for_event(&updated.id)
            .with_details(json!({ "eventId": updated.event_id, "enabled": enabled })),
        )
        .await;
        info!(
            record_id = %updated.id,
            direction = %direction,
            enabled = enabled,
            actor = %actor,
            "event flag changed"
        );
        Ok(updated)
    }

    pub async fn schedule(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> Result<Option<ScheduleConfig>, RelayError> {
        Ok(self.locate(tenant_id, id).await?.schedule_config)
    }

    /// Validate then store a schedule on the outbox or inbox record with this id.
    pub async fn set_schedule(
        &self,
        tenant_id: &str,
        id: &str,
        raw: Option<&serde_json::Value>,
        actor: &str,
    ) -> Result<EventRecord, RelayError> {
        let config = validate_schedule(raw)?;
        let record = self.locate(tenant_id, id).await?;
        let updated = self
            .patch_and_reload(
                &record,
                RecordPatch::by_operator(actor).with_schedule(config.clone()),
            )
            .await?;
        self.audit_record_change(
            AuditLogEntry::new(
                tenant_id,
                AuditComponent::IntegrationFlow,
                "update_schedule",
                actor,
            )
            .for_event(&updated.id)
            .with_details(json!({
                "type": updated.direction.flow_type(),
                "scheduleConfig": config,
            })),
        )
        .await;
        Ok(updated)
    }

    /// Replace an inbox record's field mappings (JSON object or array).
    pub async fn set_field_mappings(
        &self,
        tenant_id: &str,
        id: &str,
        raw: Option<&serde_json::Value>,
        actor: &str,
    ) -> Result<EventRecord, RelayError> {
        let mappings = match raw {
            Some(v @ (serde_json::Value::Object(_) | serde_json::Value::Array(_))) => v.clone(),
            _ => return Err(RelayError::validation("Invalid fieldMappings value")),
        };
        let record = self.find(tenant_id, Direction::Inbox, id).await?;
        let updated = self
            .patch_and_reload(
                &record,
                RecordPatch::by_operator(actor).with_field_mappings(mappings.clone()),
            )
            .await?;
        self.audit_record_change(
            AuditLogEntry::new(tenant_id, AuditComponent::FieldMappings, "update", actor)
                .for_event(&updated.id)
                .with_details(json!({ "fieldMappings": mappings })),
        )
        .await;
        Ok(updated)
    }
}
