//! Relay schedule configuration (stored and exposed; execution is external).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Immediate,
    Hourly,
    Daily,
    Weekly,
    Custom,
}

impl Frequency {
    pub const ALL: [Frequency; 5] = [
        Frequency::Immediate,
        Frequency::Hourly,
        Frequency::Daily,
        Frequency::Weekly,
        Frequency::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Immediate => "immediate",
            Frequency::Hourly => "hourly",
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == s)
    }

    /// Fixed offset from now for the interval frequencies.
    pub fn fixed_offset_secs(self) -> Option<i64> {
        match self {
            Frequency::Immediate => Some(0),
            Frequency::Hourly => Some(3_600),
            Frequency::Daily => Some(86_400),
            Frequency::Weekly => Some(604_800),
            Frequency::Custom => None,
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{enabled, frequency, cronExpression?}`. `custom` requires a cron expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub frequency: Frequency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
}

impl ScheduleConfig {
    pub fn new(enabled: bool, frequency: Frequency) -> Self {
        Self {
            enabled,
            frequency,
            cron_expression: None,
        }
    }

    pub fn custom(enabled: bool, cron_expression: impl Into<String>) -> Self {
        Self {
            enabled,
            frequency: Frequency::Custom,
            cron_expression: Some(cron_expression.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case_and_omits_missing_cron() {
        let v = serde_json::to_value(ScheduleConfig::new(true, Frequency::Daily)).unwrap();
        assert_eq!(v, serde_json::json!({ "enabled": true, "frequency": "daily" }));
        let v = serde_json::to_value(ScheduleConfig::custom(false, "0 */5 * * * *")).unwrap();
        assert_eq!(v["cronExpression"], "0 */5 * * * *");
    }

    #[test]
    fn parse_frequency() {
        assert_eq!(Frequency::parse("weekly"), Some(Frequency::Weekly));
        assert_eq!(Frequency::parse("monthly"), None);
    }
}
