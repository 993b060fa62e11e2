//! Schedule validation and next-fire-time computation.

use chrono::{DateTime, Duration, Utc};
use relay_types::{Frequency, RelayError, ScheduleConfig};
use std::str::FromStr;

const FREQUENCY_ERROR: &str =
    "Invalid frequency value. Must be one of: immediate, hourly, daily, weekly, custom";

/// The `cron` crate wants a seconds field; classic 5-field expressions get one prepended.
fn normalize_cron(expr: &str) -> String {
    let expr = expr.trim();
    if expr.split_whitespace().count() == 5 {
        format!("0 {}", expr)
    } else {
        expr.to_string()
    }
}

fn parse_cron(expr: &str) -> Result<cron::Schedule, cron::error::Error> {
    cron::Schedule::from_str(&normalize_cron(expr))
}

/// Validate a raw `scheduleConfig` value. Nothing is written until this passes.
pub fn validate_schedule(raw: Option<&serde_json::Value>) -> Result<ScheduleConfig, RelayError> {
    let obj = match raw {
        Some(serde_json::Value::Object(obj)) => obj,
        _ => return Err(RelayError::validation("Invalid scheduleConfig value")),
    };
    for field in ["enabled", "frequency"] {
        if obj.get(field).map_or(true, |v| v.is_null()) {
            return Err(RelayError::validation(format!(
                "Missing required field in scheduleConfig: {}",
                field
            )));
        }
    }
    let enabled = obj
        .get("enabled")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| RelayError::validation("scheduleConfig.enabled must be a boolean"))?;
    let frequency = obj
        .get("frequency")
        .and_then(|v| v.as_str())
        .and_then(Frequency::parse)
        .ok_or_else(|| RelayError::validation(FREQUENCY_ERROR))?;

    let cron_expression = obj
        .get("cronExpression")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    if frequency == Frequency::Custom {
        let expr = cron_expression.as_deref().ok_or_else(|| {
            RelayError::validation("cronExpression is required when frequency is 'custom'")
        })?;
        parse_cron(expr)
            .map_err(|e| RelayError::validation(format!("Invalid cronExpression: {}", e)))?;
    }

    Ok(ScheduleConfig {
        enabled,
        frequency,
        cron_expression,
    })
}

/// Next fire time. `None` when the schedule is absent or disabled.
pub fn next_scheduled_at(
    config: Option<&ScheduleConfig>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let config = config.filter(|c| c.enabled)?;
    match config.frequency.fixed_offset_secs() {
        Some(secs) => Some(now + Duration::seconds(secs)),
        None => {
            let expr = config.cron_expression.as_deref()?;
            parse_cron(expr).ok()?.after(&now).next()
        }
    }
}
