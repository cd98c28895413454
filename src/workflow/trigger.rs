//! Trigger matching
//!
//! Triggers are stateless matchers. They decide whether an inbound bus event
//! or a scheduler tick should start a workflow and nothing more; deduplicating
//! repeated deliveries is the delivery substrate's job.

use crate::error::DefinitionError;
use crate::workflow::result::Payload;
use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// What starts a workflow
#[derive(Debug, Clone, Default)]
pub enum Trigger {
    /// Started by a matching bus event
    Event(EventTrigger),
    /// Started by the scheduler clock
    Schedule(ScheduleTrigger),
    /// No trigger, only reachable through manual invocation
    #[default]
    Manual,
}

impl Trigger {
    pub fn matches_event(&self, event: &InboundEvent) -> bool {
        match self {
            Trigger::Event(trigger) => trigger.matches(event),
            _ => false,
        }
    }

    pub fn matches_tick(&self, timestamp: DateTime<Utc>) -> bool {
        match self {
            Trigger::Schedule(trigger) => trigger.matches_at(timestamp),
            _ => false,
        }
    }

    /// Short label for logs and listings ("event", "schedule", "manual")
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::Event(_) => "event",
            Trigger::Schedule(_) => "schedule",
            Trigger::Manual => "manual",
        }
    }
}

/// Event delivered by a bus
///
/// `body` must be a JSON object; it becomes the run's initial payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub bus: String,
    pub source: String,
    #[serde(alias = "detailType", alias = "detail-type")]
    pub detail_type: String,
    #[serde(default)]
    pub body: Payload,
}

/// Bus/source/detail-type pattern
///
/// All three attributes must match; within `sources` and `detail_types`
/// membership is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTrigger {
    pub bus: String,
    pub sources: BTreeSet<String>,
    pub detail_types: BTreeSet<String>,
}

impl EventTrigger {
    pub fn new<S, D>(bus: impl Into<String>, sources: S, detail_types: D) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        Self {
            bus: bus.into(),
            sources: sources.into_iter().map(Into::into).collect(),
            detail_types: detail_types.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, event: &InboundEvent) -> bool {
        event.bus == self.bus
            && self.sources.contains(&event.source)
            && self.detail_types.contains(&event.detail_type)
    }
}

/// Cron schedule evaluated in a fixed timezone (UTC unless configured)
#[derive(Debug, Clone)]
pub struct ScheduleTrigger {
    expression: String,
    timezone: Tz,
    schedule: Schedule,
}

impl ScheduleTrigger {
    /// Parse a six-field cron expression (sec min hour day month weekday)
    ///
    /// Five-field expressions are accepted and run at second zero.
    pub fn new(expression: &str) -> Result<Self, DefinitionError> {
        Self::with_timezone(expression, "UTC")
    }

    pub fn with_timezone(expression: &str, timezone: &str) -> Result<Self, DefinitionError> {
        let normalized = normalize_cron_expression(expression);
        let schedule =
            Schedule::from_str(&normalized).map_err(|e| DefinitionError::InvalidSchedule {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;
        let timezone: Tz = timezone
            .parse()
            .map_err(|_| DefinitionError::InvalidTimezone(timezone.to_string()))?;

        Ok(Self {
            expression: normalized,
            timezone,
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Whether the schedule fires within the minute containing `timestamp`
    pub fn matches_at(&self, timestamp: DateTime<Utc>) -> bool {
        let Some(minute) = timestamp.with_second(0).and_then(|t| t.with_nanosecond(0)) else {
            return false;
        };
        let window_start = minute.with_timezone(&self.timezone);
        let window_end = window_start + Duration::minutes(1);

        // `after` is exclusive, so step back one second to include second zero
        self.schedule
            .after(&(window_start - Duration::seconds(1)))
            .next()
            .is_some_and(|fire| fire < window_end)
    }

    /// Next firing strictly after `after`, in UTC
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.timezone))
            .next()
            .map(|fire| fire.with_timezone(&Utc))
    }
}

fn normalize_cron_expression(expr: &str) -> String {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    match parts.len() {
        5 => format!("0 {}", parts.join(" ")),
        _ => parts.join(" "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(bus: &str, source: &str, detail_type: &str) -> InboundEvent {
        InboundEvent {
            bus: bus.to_string(),
            source: source.to_string(),
            detail_type: detail_type.to_string(),
            body: Payload::new(),
        }
    }

    #[test]
    fn test_event_match_is_conjunctive_across_attributes() {
        let trigger = EventTrigger::new("default", ["foodsmart", "crm"], ["sync.completed"]);

        assert!(trigger.matches(&event("default", "foodsmart", "sync.completed")));
        assert!(trigger.matches(&event("default", "crm", "sync.completed")));
        assert!(!trigger.matches(&event("default", "foodsmart", "sync.failed")));
        assert!(!trigger.matches(&event("ops", "foodsmart", "sync.completed")));
        assert!(!trigger.matches(&event("default", "warehouse", "sync.completed")));
    }

    #[test]
    fn test_event_deserializes_camel_case_detail_type() {
        let parsed: InboundEvent = serde_json::from_value(serde_json::json!({
            "bus": "default",
            "source": "foodsmart",
            "detailType": "sync.completed",
            "body": {"rows": 10}
        }))
        .unwrap();

        assert_eq!(parsed.detail_type, "sync.completed");
        assert_eq!(parsed.body.get("rows"), Some(&serde_json::json!(10)));
    }

    #[test]
    fn test_schedule_matches_at_minute_granularity() {
        let trigger = ScheduleTrigger::new("0 30 3 * * *").unwrap();

        let inside = Utc.with_ymd_and_hms(2025, 3, 4, 3, 30, 42).unwrap();
        let before = Utc.with_ymd_and_hms(2025, 3, 4, 3, 29, 59).unwrap();
        let after = Utc.with_ymd_and_hms(2025, 3, 4, 3, 31, 0).unwrap();

        assert!(trigger.matches_at(inside));
        assert!(!trigger.matches_at(before));
        assert!(!trigger.matches_at(after));
    }

    #[test]
    fn test_schedule_respects_timezone() {
        // 09:00 in Tokyo is 00:00 UTC
        let trigger = ScheduleTrigger::with_timezone("0 0 9 * * *", "Asia/Tokyo").unwrap();

        let utc_midnight = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let utc_nine = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();

        assert!(trigger.matches_at(utc_midnight));
        assert!(!trigger.matches_at(utc_nine));
    }

    #[test]
    fn test_five_field_expression_is_normalized() {
        let trigger = ScheduleTrigger::new("*/15 * * * *").unwrap();
        assert_eq!(trigger.expression(), "0 */15 * * * *");
    }

    #[test]
    fn test_invalid_expression_and_timezone() {
        assert!(matches!(
            ScheduleTrigger::new("not a cron"),
            Err(DefinitionError::InvalidSchedule { .. })
        ));
        assert!(matches!(
            ScheduleTrigger::with_timezone("0 * * * * *", "Mars/Olympus"),
            Err(DefinitionError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn test_next_fire_after() {
        let trigger = ScheduleTrigger::new("0 0 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 10, 15, 0).unwrap();

        let next = trigger.next_fire_after(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 1, 11, 0, 0).unwrap());
    }

    #[test]
    fn test_manual_trigger_never_matches() {
        let trigger = Trigger::Manual;
        assert!(!trigger.matches_event(&event("default", "foodsmart", "sync.completed")));
        assert!(!trigger.matches_tick(Utc::now()));
    }
}
