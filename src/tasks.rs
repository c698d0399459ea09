//! Scheduled task model and storage.

pub mod due;
pub mod store;

pub use store::TaskLog;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a scheduled task fires.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    /// `value` is a cron expression.
    Cron,
    /// `value` is a positive number of seconds.
    Interval,
    /// `value` is an ISO-8601 timestamp; the task fires once.
    Once,
}

impl ScheduleKind {
    pub const ALL: [ScheduleKind; 3] = [
        ScheduleKind::Cron,
        ScheduleKind::Interval,
        ScheduleKind::Once,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleKind::Cron => "cron",
            ScheduleKind::Interval => "interval",
            ScheduleKind::Once => "once",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cron" => Some(ScheduleKind::Cron),
            "interval" => Some(ScheduleKind::Interval),
            "once" => Some(ScheduleKind::Once),
            _ => None,
        }
    }
}

impl std::fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A durable scheduled job. Appended by the `schedule_task` tool, marked by
/// the scheduler on dispatch, deactivated by `cancel_task`; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledTask {
    pub id: String,
    pub prompt: String,
    #[serde(rename = "type")]
    pub kind: ScheduleKind,
    pub value: String,
    /// Delivery target captured at creation time.
    pub channel: Option<String>,
    pub chat_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_tier: Option<String>,
}

impl ScheduledTask {
    /// Thread id the agent is invoked with when this task runs.
    pub fn thread_id(&self) -> String {
        format!("scheduler_{}", self.id)
    }
}

/// Input for creating a task via the task log.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub prompt: String,
    pub kind: ScheduleKind,
    pub value: String,
    pub channel: Option<String>,
    pub chat_id: Option<String>,
    pub model_tier: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_strings() {
        for kind in ScheduleKind::ALL {
            assert_eq!(ScheduleKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ScheduleKind::parse("weekly"), None);
    }

    #[test]
    fn serializes_with_snake_case_type_field() {
        let task = ScheduledTask {
            id: "ab12cd34".to_string(),
            prompt: "check the weather".to_string(),
            kind: ScheduleKind::Interval,
            value: "3600".to_string(),
            channel: Some("telegram".to_string()),
            chat_id: Some("42".to_string()),
            created_at: "2025-01-01T00:00:00Z".parse().expect("timestamp"),
            last_run: None,
            active: true,
            model_tier: None,
        };

        let json = serde_json::to_value(&task).expect("serialize");
        assert_eq!(json["type"], "interval");
        assert_eq!(json["last_run"], serde_json::Value::Null);
        // model_tier is omitted entirely when unset.
        assert!(json.get("model_tier").is_none());
    }
}
