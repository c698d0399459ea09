//! Scheduled-task tools: create, list, cancel.

use crate::context;
use crate::llm::ToolDefinition;
use crate::tasks::{NewTask, ScheduleKind, TaskLog};
use crate::tools::Tool;
use crate::util::preview;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

const PROMPT_PREVIEW_LEN: usize = 60;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct CronToolError(String);

/// Schedule a prompt to run later or on a recurring basis. The delivery
/// target is captured from the task-local invocation context.
#[derive(Clone)]
pub struct ScheduleTaskTool {
    log: Arc<TaskLog>,
}

impl ScheduleTaskTool {
    pub fn new(log: Arc<TaskLog>) -> Self {
        Self { log }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ScheduleTaskArgs {
    /// What the agent should do when the task runs.
    pub prompt: String,
    /// One of 'cron', 'interval', 'once'.
    pub schedule_type: String,
    /// Cron expression, seconds, or ISO timestamp depending on the type.
    pub schedule_value: String,
    /// Optional model tier the task should run on.
    #[serde(default)]
    pub model_tier: Option<String>,
}

impl Tool for ScheduleTaskTool {
    const NAME: &'static str = "schedule_task";

    type Error = CronToolError;
    type Args = ScheduleTaskArgs;
    type Output = String;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Schedule a task to run later or on a recurring basis. \
                          The result is delivered back to the chat that scheduled it."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "prompt": {
                        "type": "string",
                        "description": "What the agent should do when the task runs"
                    },
                    "schedule_type": {
                        "type": "string",
                        "enum": ScheduleKind::ALL.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
                        "description": "'cron' (cron expression), 'interval' (seconds), or 'once' (ISO timestamp)"
                    },
                    "schedule_value": {
                        "type": "string",
                        "description": "The schedule value matching the type"
                    },
                    "model_tier": {
                        "type": "string",
                        "description": "Optional model tier to run the task on"
                    }
                },
                "required": ["prompt", "schedule_type", "schedule_value"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let Some(kind) = ScheduleKind::parse(&args.schedule_type) else {
            return Err(CronToolError(format!(
                "Invalid schedule_type: {}. Use 'cron', 'interval', or 'once'.",
                args.schedule_type
            )));
        };

        let origin = context::current_origin();
        let task = self
            .log
            .schedule(NewTask {
                prompt: args.prompt,
                kind,
                value: args.schedule_value,
                channel: origin.as_ref().map(|origin| origin.channel.clone()),
                chat_id: origin.as_ref().map(|origin| origin.chat_id.clone()),
                model_tier: args.model_tier,
            })
            .await
            .map_err(|error| CronToolError(error.to_string()))?;

        Ok(format!(
            "Task scheduled: id={}, type={}, value={}",
            task.id, task.kind, task.value
        ))
    }
}

/// List all active scheduled tasks.
#[derive(Clone)]
pub struct ListTasksTool {
    log: Arc<TaskLog>,
}

impl ListTasksTool {
    pub fn new(log: Arc<TaskLog>) -> Self {
        Self { log }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListTasksArgs {}

impl Tool for ListTasksTool {
    const NAME: &'static str = "list_tasks";

    type Error = CronToolError;
    type Args = ListTasksArgs;
    type Output = String;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "List all active scheduled tasks.".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    async fn call(&self, _args: Self::Args) -> Result<Self::Output, Self::Error> {
        let active = self
            .log
            .list_active()
            .await
            .map_err(|error| CronToolError(error.to_string()))?;

        if active.is_empty() {
            return Ok("No active scheduled tasks.".to_string());
        }

        let lines: Vec<String> = active
            .iter()
            .map(|task| {
                format!(
                    "- [{}] {}={} | {} | last_run={}",
                    task.id,
                    task.kind,
                    task.value,
                    preview(&task.prompt, PROMPT_PREVIEW_LEN),
                    task.last_run
                        .map(|ts| ts.to_rfc3339())
                        .unwrap_or_else(|| "never".to_string()),
                )
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

/// Cancel a scheduled task by id.
#[derive(Clone)]
pub struct CancelTaskTool {
    log: Arc<TaskLog>,
}

impl CancelTaskTool {
    pub fn new(log: Arc<TaskLog>) -> Self {
        Self { log }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CancelTaskArgs {
    pub task_id: String,
}

impl Tool for CancelTaskTool {
    const NAME: &'static str = "cancel_task";

    type Error = CronToolError;
    type Args = CancelTaskArgs;
    type Output = String;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Cancel a scheduled task by its ID.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "task_id": {"type": "string", "description": "Id of the task to cancel"}
                },
                "required": ["task_id"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        let cancelled = self
            .log
            .cancel(&args.task_id)
            .await
            .map_err(|error| CronToolError(error.to_string()))?;

        if cancelled {
            Ok(format!("Task {} cancelled.", args.task_id))
        } else {
            Ok(format!("Task {} not found.", args.task_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolOutcome, ToolRegistry};
    use serde_json::json;

    fn registry_with_log(dir: &tempfile::TempDir) -> (ToolRegistry, Arc<TaskLog>) {
        let log = Arc::new(TaskLog::new(dir.path().join("tasks.json")));
        let mut registry = ToolRegistry::new();
        registry.register(ScheduleTaskTool::new(log.clone()));
        registry.register(ListTasksTool::new(log.clone()));
        registry.register(CancelTaskTool::new(log.clone()));
        (registry, log)
    }

    #[tokio::test]
    async fn schedule_captures_the_invocation_origin() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (registry, log) = registry_with_log(&dir);

        let outcome = context::scope(None, async {
            context::set_origin("telegram", "42");
            registry
                .call(
                    "schedule_task",
                    json!({
                        "prompt": "remind me to stretch",
                        "schedule_type": "interval",
                        "schedule_value": "3600"
                    }),
                )
                .await
        })
        .await;

        assert!(!outcome.is_error, "unexpected error: {}", outcome.content);
        assert!(outcome.content.starts_with("Task scheduled: id="));

        let tasks = log.load().await.expect("load");
        assert_eq!(tasks[0].channel.as_deref(), Some("telegram"));
        assert_eq!(tasks[0].chat_id.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn schedule_rejects_unknown_types_as_error_strings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (registry, _log) = registry_with_log(&dir);

        let outcome = registry
            .call(
                "schedule_task",
                json!({
                    "prompt": "p",
                    "schedule_type": "weekly",
                    "schedule_value": "1"
                }),
            )
            .await;
        assert!(outcome.is_error);
        assert!(outcome.content.contains("Invalid schedule_type"));
    }

    #[tokio::test]
    async fn list_and_cancel_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (registry, log) = registry_with_log(&dir);

        assert_eq!(
            registry.call("list_tasks", json!({})).await,
            ToolOutcome::ok("No active scheduled tasks.")
        );

        let task = log
            .schedule(NewTask {
                prompt: "water the plants".to_string(),
                kind: ScheduleKind::Interval,
                value: "86400".to_string(),
                channel: None,
                chat_id: None,
                model_tier: None,
            })
            .await
            .expect("schedule");

        let listed = registry.call("list_tasks", json!({})).await;
        assert!(listed.content.contains(&task.id));
        assert!(listed.content.contains("last_run=never"));

        let cancelled = registry
            .call("cancel_task", json!({"task_id": task.id}))
            .await;
        assert!(cancelled.content.contains("cancelled"));

        let missing = registry
            .call("cancel_task", json!({"task_id": "zzzz"}))
            .await;
        assert!(missing.content.contains("not found"));
    }
}
