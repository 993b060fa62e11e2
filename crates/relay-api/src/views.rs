//! camelCase response bodies built from records and audit entries.

use chrono::{DateTime, Utc};
use relay_control::next_scheduled_at;
use relay_types::{AuditLogEntry, Direction, EventRecord, ScheduleConfig};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishingEventView {
    pub id: String,
    pub event_id: String,
    pub event_name: String,
    pub description: String,
    pub event_publishing_enabled: bool,
    pub status: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_by: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&EventRecord> for PublishingEventView {
    fn from(r: &EventRecord) -> Self {
        Self {
            id: r.id.clone(),
            event_id: r.event_id.clone(),
            event_name: r.event_name.clone(),
            description: r.description.clone(),
            event_publishing_enabled: r.enabled,
            status: r.status.to_string(),
            created_by: r.created_by.clone(),
            created_at: r.created_at,
            updated_by: r.updated_by.clone(),
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumingEventView {
    pub id: String,
    pub event_id: String,
    pub event_name: String,
    pub description: String,
    pub event_consuming_enabled: bool,
    pub status: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_by: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub field_mappings: Option<Value>,
    pub schedule_config: Option<ScheduleConfig>,
}

impl From<&EventRecord> for ConsumingEventView {
    fn from(r: &EventRecord) -> Self {
        Self {
            id: r.id.clone(),
            event_id: r.event_id.clone(),
            event_name: r.event_name.clone(),
            description: r.description.clone(),
            event_consuming_enabled: r.enabled,
            status: r.status.to_string(),
            created_by: r.created_by.clone(),
            created_at: r.created_at,
            updated_by: r.updated_by.clone(),
            updated_at: r.updated_at,
            field_mappings: r.field_mappings.clone(),
            schedule_config: r.schedule_config.clone(),
        }
    }
}

/// `{<flagKey>: bool, events: [...]}` for the publishing and consuming listings.
pub fn event_list<T: Serialize>(flag_key: &str, enabled: bool, events: Vec<T>) -> Value {
    json!({ flag_key: enabled, "events": events })
}

/// Synthesized delivery log id. Each record has exactly one.
pub fn log_id(record: &EventRecord) -> String {
    format!("{}_log_1", record.id)
}

fn log_details(record: &EventRecord, full: bool) -> Value {
    let mut details = json!({
        "eventData": record.event_data,
        "eventMetadata": record.event_metadata,
        "scheduleConfig": record.schedule_config,
    });
    if record.direction == Direction::Inbox {
        details["fieldMappings"] = json!(record.field_mappings);
    }
    if full {
        details["tenantId"] = json!(record.tenant_id);
        details["createdBy"] = json!(record.created_by);
        details["createdAt"] = json!(record.created_at);
        details["updatedBy"] = json!(record.updated_by);
        details["updatedAt"] = json!(record.updated_at);
    }
    details
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntryView {
    pub log_id: String,
    pub event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    pub status: String,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub details: Value,
}

impl LogEntryView {
    pub fn summary(record: &EventRecord) -> Self {
        Self::build(record, false)
    }

    pub fn detail(record: &EventRecord) -> Self {
        Self::build(record, true)
    }

    fn build(record: &EventRecord, full: bool) -> Self {
        Self {
            log_id: log_id(record),
            event_id: record.event_id.clone(),
            event_name: full.then(|| record.event_name.clone()),
            status: record.status.to_string(),
            retry_count: record.retry_count,
            error_message: record.error_message.clone(),
            timestamp: record.modified_at,
            details: log_details(record, full),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogListView {
    pub event_id: String,
    pub event_name: String,
    pub logs: Vec<LogEntryView>,
}

impl From<&EventRecord> for LogListView {
    fn from(r: &EventRecord) -> Self {
        Self {
            event_id: r.event_id.clone(),
            event_name: r.event_name.clone(),
            logs: vec![LogEntryView::summary(r)],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastUpdateView {
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
    pub action: String,
}

impl From<AuditLogEntry> for LastUpdateView {
    fn from(e: AuditLogEntry) -> Self {
        Self {
            updated_by: e.actor,
            updated_at: e.timestamp,
            action: e.action,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMappingsView {
    pub id: String,
    pub event_id: String,
    pub event_name: String,
    pub field_mappings: Option<Value>,
    pub updated_by: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&EventRecord> for FieldMappingsView {
    fn from(r: &EventRecord) -> Self {
        Self {
            id: r.id.clone(),
            event_id: r.event_id.clone(),
            event_name: r.event_name.clone(),
            field_mappings: r.field_mappings.clone(),
            updated_by: r.updated_by.clone(),
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveEventView {
    pub id: String,
    pub event_id: String,
    pub event_name: String,
    pub description: String,
    pub status: String,
    pub schedule_config: Option<ScheduleConfig>,
    pub field_mappings: Option<Value>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_processed: Option<DateTime<Utc>>,
}

impl From<&EventRecord> for ActiveEventView {
    fn from(r: &EventRecord) -> Self {
        Self {
            id: r.id.clone(),
            event_id: r.event_id.clone(),
            event_name: r.event_name.clone(),
            description: r.description.clone(),
            status: r.status.to_string(),
            schedule_config: r.schedule_config.clone(),
            field_mappings: r.field_mappings.clone(),
            created_by: r.created_by.clone(),
            created_at: r.created_at,
            last_processed: r.processed_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveEventsView {
    pub active_events: Vec<ActiveEventView>,
    pub total_count: usize,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStatusView {
    pub id: String,
    pub event_id: String,
    pub event_name: String,
    #[serde(rename = "type")]
    pub flow_type: &'static str,
    pub status: String,
    pub schedule_config: Option<ScheduleConfig>,
    pub is_active: bool,
    pub last_processed: Option<DateTime<Utc>>,
    pub next_scheduled: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub error_message: Option<String>,
}

impl FlowStatusView {
    pub fn new(r: &EventRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: r.id.clone(),
            event_id: r.event_id.clone(),
            event_name: r.event_name.clone(),
            flow_type: r.direction.flow_type(),
            status: r.status.to_string(),
            schedule_config: r.schedule_config.clone(),
            is_active: r.enabled,
            last_processed: r.processed_at,
            next_scheduled: next_scheduled_at(r.schedule_config.as_ref(), now),
            retry_count: r.retry_count,
            error_message: r.error_message.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleUpdatedView {
    pub id: String,
    pub event_id: String,
    pub event_name: String,
    pub schedule_config: Option<ScheduleConfig>,
    pub updated_by: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub message: &'static str,
}

impl From<&EventRecord> for ScheduleUpdatedView {
    fn from(r: &EventRecord) -> Self {
        Self {
            id: r.id.clone(),
            event_id: r.event_id.clone(),
            event_name: r.event_name.clone(),
            schedule_config: r.schedule_config.clone(),
            updated_by: r.updated_by.clone(),
            updated_at: r.updated_at,
            message: "Schedule configuration updated successfully",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_types::{EnvelopeBuilder, Frequency};

    fn record(direction: Direction) -> EventRecord {
        let env = EnvelopeBuilder::default().build("lmp_grade_submitted", json!({ "grade": 7 }));
        match direction {
            Direction::Outbox => {
                EventRecord::outbound(&env, "Grade Submitted", "", "default_tenant", "system")
            }
            Direction::Inbox => {
                EventRecord::inbound(&env, "Grade Submitted", "", "default_tenant", "system")
            }
        }
    }

    #[test]
    fn log_views_carry_direction_specific_details() {
        let out = record(Direction::Outbox);
        let summary = serde_json::to_value(LogEntryView::summary(&out)).unwrap();
        assert_eq!(summary["logId"], json!(format!("{}_log_1", out.id)));
        assert_eq!(summary["retryCount"], json!(0));
        assert!(summary.get("eventName").is_none());
        assert!(summary["details"].get("fieldMappings").is_none());
        assert!(summary["details"].get("tenantId").is_none());

        let inbox = record(Direction::Inbox);
        let detail = serde_json::to_value(LogEntryView::detail(&inbox)).unwrap();
        assert_eq!(detail["eventName"], json!("Grade Submitted"));
        assert!(detail["details"].get("fieldMappings").is_some());
        assert_eq!(detail["details"]["tenantId"], json!("default_tenant"));
    }

    #[test]
    fn flow_status_computes_next_fire() {
        let mut r = record(Direction::Inbox);
        r.schedule_config = Some(ScheduleConfig::new(true, Frequency::Hourly));
        let now = Utc::now();
        let v = serde_json::to_value(FlowStatusView::new(&r, now)).unwrap();
        assert_eq!(v["type"], json!("consuming"));
        assert_eq!(v["isActive"], json!(true));
        assert_eq!(
            v["nextScheduled"],
            json!(now + chrono::Duration::seconds(3600))
        );
    }
}
