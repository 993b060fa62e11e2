//! Append-only audit log entries and list options.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Administrative area an audit entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditComponent {
    ProductControl,
    ConsumerControl,
    PublishingEvent,
    ConsumingEvent,
    FieldMappings,
    IntegrationFlow,
}

impl AuditComponent {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditComponent::ProductControl => "product_control",
            AuditComponent::ConsumerControl => "consumer_control",
            AuditComponent::PublishingEvent => "publishing_event",
            AuditComponent::ConsumingEvent => "consuming_event",
            AuditComponent::FieldMappings => "field_mappings",
            AuditComponent::IntegrationFlow => "integration_flow",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "product_control" => Some(AuditComponent::ProductControl),
            "consumer_control" => Some(AuditComponent::ConsumerControl),
            "publishing_event" => Some(AuditComponent::PublishingEvent),
            "consuming_event" => Some(AuditComponent::ConsumingEvent),
            "field_mappings" => Some(AuditComponent::FieldMappings),
            "integration_flow" => Some(AuditComponent::IntegrationFlow),
            _ => None,
        }
    }
}

/// One audit row. Never mutated or deleted once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: String,
    pub tenant_id: String,
    pub component: AuditComponent,
    /// e.g. `enable`, `disable`, `update_schedule`.
    pub action: String,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl AuditLogEntry {
    pub fn new(
        tenant_id: &str,
        component: AuditComponent,
        action: impl Into<String>,
        actor: &str,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            component,
            action: action.into(),
            actor: actor.to_string(),
            event_id: None,
            timestamp: Utc::now(),
            details: serde_json::Value::Null,
        }
    }

    pub fn for_event(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Options for listing audit entries (filter + pagination). Newest first.
#[derive(Debug, Clone, Default)]
pub struct AuditListOptions {
    pub tenant_id: Option<String>,
    pub component: Option<AuditComponent>,
    pub event_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub const DEFAULT_AUDIT_LIMIT: usize = 100;

impl AuditListOptions {
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        if let Some(ref t) = self.tenant_id {
            if &entry.tenant_id != t {
                return false;
            }
        }
        if let Some(c) = self.component {
            if entry.component != c {
                return false;
            }
        }
        if let Some(ref e) = self.event_id {
            if entry.event_id.as_deref() != Some(e.as_str()) {
                return false;
            }
        }
        true
    }

    /// Filter, reverse to newest first, then skip/take. `entries` must be in append order.
    pub fn apply(&self, entries: &[AuditLogEntry]) -> Vec<AuditLogEntry> {
        let offset = self.offset.unwrap_or(0);
        let limit = self.limit.unwrap_or(DEFAULT_AUDIT_LIMIT);
        entries
            .iter()
            .rev()
            .filter(|e| self.matches(e))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_filters_and_pages_newest_first() {
        let entries: Vec<AuditLogEntry> = (0..5)
            .map(|i| {
                let component = if i % 2 == 0 {
                    AuditComponent::ProductControl
                } else {
                    AuditComponent::PublishingEvent
                };
                AuditLogEntry::new("t1", component, format!("a{}", i), "admin")
            })
            .collect();

        let opts = AuditListOptions {
            component: Some(AuditComponent::ProductControl),
            ..Default::default()
        };
        let actions: Vec<_> = opts.apply(&entries).into_iter().map(|e| e.action).collect();
        assert_eq!(actions, vec!["a4", "a2", "a0"]);

        let paged = AuditListOptions {
            limit: Some(2),
            offset: Some(1),
            ..Default::default()
        };
        let actions: Vec<_> = paged.apply(&entries).into_iter().map(|e| e.action).collect();
        assert_eq!(actions, vec!["a3", "a2"]);
    }

    #[test]
    fn component_serializes_snake_case() {
        let v = serde_json::to_value(AuditComponent::IntegrationFlow).unwrap();
        assert_eq!(v, "integration_flow");
        assert_eq!(
            AuditComponent::parse("field_mappings"),
            Some(AuditComponent::FieldMappings)
        );
    }
}
