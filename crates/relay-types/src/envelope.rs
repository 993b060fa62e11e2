//! CloudEvent envelope and builder.

use crate::RelayError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const SPEC_VERSION: &str = "1.0";
pub const DEFAULT_SOURCE: &str = "/LMP/Moodle";
pub const JSON_CONTENT_TYPE: &str = "application/json";

fn default_content_type() -> String {
    JSON_CONTENT_TYPE.to_string()
}

/// CloudEvents 1.0 envelope (structured JSON mode).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudEvent {
    pub specversion: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub id: String,
    #[serde(default = "Utc::now")]
    pub time: DateTime<Utc>,
    #[serde(default = "default_content_type")]
    pub datacontenttype: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl CloudEvent {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    /// Parse an inbound envelope. Requires spec version 1.0 and non-empty `id`/`type`.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, RelayError> {
        let event: CloudEvent = serde_json::from_value(value.clone())
            .map_err(|e| RelayError::validation(format!("Invalid CloudEvent envelope: {}", e)))?;
        if event.specversion != SPEC_VERSION {
            return Err(RelayError::validation(format!(
                "Unsupported CloudEvent specversion: {}",
                event.specversion
            )));
        }
        if event.id.trim().is_empty() {
            return Err(RelayError::validation("CloudEvent id must not be empty"));
        }
        if event.event_type.trim().is_empty() {
            return Err(RelayError::validation("CloudEvent type must not be empty"));
        }
        Ok(event)
    }
}

/// Wraps domain payloads into envelopes stamped with a fixed source.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    source: String,
}

impl EnvelopeBuilder {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Fresh envelope with a v4 UUID id and the current UTC time.
    pub fn build(&self, event_type: &str, data: serde_json::Value) -> CloudEvent {
        CloudEvent {
            specversion: SPEC_VERSION.to_string(),
            event_type: event_type.to_string(),
            source: self.source.clone(),
            id: Uuid::new_v4().to_string(),
            time: Utc::now(),
            datacontenttype: JSON_CONTENT_TYPE.to_string(),
            data,
        }
    }
}

impl Default for EnvelopeBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn build_fills_fixed_fields() {
        let ev = EnvelopeBuilder::default().build("lmp_grade_submitted", json!({ "grade": 7 }));
        let v = ev.to_value();
        assert_eq!(v["specversion"], "1.0");
        assert_eq!(v["type"], "lmp_grade_submitted");
        assert_eq!(v["source"], DEFAULT_SOURCE);
        assert_eq!(v["datacontenttype"], "application/json");
        assert_eq!(v["data"]["grade"], 7);
        assert!(Uuid::parse_str(v["id"].as_str().unwrap()).is_ok());
        assert!(DateTime::parse_from_rfc3339(v["time"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn ids_do_not_repeat() {
        let b = EnvelopeBuilder::new("/test");
        let ids: HashSet<String> = (0..1000).map(|_| b.build("t", json!({})).id).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn from_value_validates_envelope() {
        let ok = json!({
            "specversion": "1.0",
            "type": "cmp_course_updated",
            "source": "/CMP",
            "id": "abc-1",
            "data": { "course": "MATH101" }
        });
        let ev = CloudEvent::from_value(&ok).unwrap();
        assert_eq!(ev.event_type, "cmp_course_updated");
        assert_eq!(ev.datacontenttype, JSON_CONTENT_TYPE);

        let mut bad = ok.clone();
        bad["specversion"] = json!("0.3");
        assert!(matches!(
            CloudEvent::from_value(&bad),
            Err(RelayError::Validation(_))
        ));

        let mut no_id = ok;
        no_id["id"] = json!("  ");
        assert!(CloudEvent::from_value(&no_id).is_err());
    }
}
