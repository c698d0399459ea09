//! Task log: the scheduled-tasks JSON file under a shared async lock.
//!
//! Every read-modify-write of the file happens with the log's mutex held,
//! so the scheduler's mark pass and the tools' schedule/cancel operations
//! never interleave. Saves go through a temp file + rename.

use crate::error::{Result, StoreError};
use crate::tasks::due::{is_due, parse_cron, parse_utc};
use crate::tasks::{NewTask, ScheduleKind, ScheduledTask};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Shared handle on the scheduled-tasks file.
#[derive(Debug)]
pub struct TaskLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl TaskLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Validate and append a new task. Returns the stored task.
    pub async fn schedule(&self, input: NewTask) -> Result<ScheduledTask> {
        validate_value(input.kind, &input.value)?;

        let task = ScheduledTask {
            id: uuid::Uuid::new_v4().simple().to_string()[..8].to_string(),
            prompt: input.prompt,
            kind: input.kind,
            value: input.value,
            channel: input.channel,
            chat_id: input.chat_id,
            created_at: Utc::now(),
            last_run: None,
            active: true,
            model_tier: input.model_tier,
        };

        let _guard = self.lock.lock().await;
        let mut tasks = self.read().await?;
        tasks.push(task.clone());
        self.write(&tasks).await?;

        tracing::info!(
            task_id = %task.id,
            kind = %task.kind,
            value = %task.value,
            channel = task.channel.as_deref().unwrap_or("-"),
            chat_id = task.chat_id.as_deref().unwrap_or("-"),
            "task scheduled"
        );
        Ok(task)
    }

    /// All tasks, including inactive ones.
    pub async fn load(&self) -> Result<Vec<ScheduledTask>> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    /// Active tasks only, for display.
    pub async fn list_active(&self) -> Result<Vec<ScheduledTask>> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read()
            .await?
            .into_iter()
            .filter(|task| task.active)
            .collect())
    }

    /// Deactivate a task by id. Returns false when the id is unknown.
    pub async fn cancel(&self, task_id: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut tasks = self.read().await?;
        let Some(task) = tasks.iter_mut().find(|task| task.id == task_id) else {
            return Ok(false);
        };
        task.active = false;
        self.write(&tasks).await?;
        tracing::info!(task_id = %task_id, "task cancelled");
        Ok(true)
    }

    /// Mark every due active task as run at `now` (deactivating once-tasks)
    /// and return copies of the marked tasks for dispatch.
    ///
    /// The whole pass happens under the log's lock, so `last_run` is
    /// committed before any caller can start executing the returned tasks.
    pub async fn check_and_mark(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
        let _guard = self.lock.lock().await;
        let mut tasks = self.read().await?;

        let mut due = Vec::new();
        for task in tasks.iter_mut() {
            if !task.active || !is_due(task, now) {
                continue;
            }
            task.last_run = Some(now);
            if task.kind == ScheduleKind::Once {
                task.active = false;
            }
            due.push(task.clone());
        }

        if !due.is_empty() {
            self.write(&tasks).await?;
        }
        Ok(due)
    }

    async fn read(&self) -> Result<Vec<ScheduledTask>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => serde_json::from_str(&raw).map_err(|error| {
                StoreError::Read {
                    path: self.path.display().to_string(),
                    message: error.to_string(),
                }
                .into()
            }),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(error) => Err(StoreError::Read {
                path: self.path.display().to_string(),
                message: error.to_string(),
            }
            .into()),
        }
    }

    async fn write(&self, tasks: &[ScheduledTask]) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| write_error(&self.path, &error))?;
        }

        let body = serde_json::to_vec_pretty(tasks)
            .map_err(|error| write_error(&self.path, &error))?;

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &body)
            .await
            .map_err(|error| write_error(&tmp_path, &error))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|error| write_error(&self.path, &error))?;
        Ok(())
    }
}

fn write_error(path: &Path, error: &dyn std::fmt::Display) -> StoreError {
    StoreError::Write {
        path: path.display().to_string(),
        message: error.to_string(),
    }
}

/// Reject values that can never fire for their schedule kind.
fn validate_value(kind: ScheduleKind, value: &str) -> Result<()> {
    match kind {
        ScheduleKind::Cron => parse_cron(value).map(|_| ()).map_err(|error| {
            StoreError::InvalidTask(format!("invalid cron expression '{value}': {error}")).into()
        }),
        ScheduleKind::Interval => match value.parse::<i64>() {
            Ok(seconds) if seconds > 0 => Ok(()),
            _ => Err(StoreError::InvalidTask(format!(
                "interval must be a positive number of seconds, got '{value}'"
            ))
            .into()),
        },
        ScheduleKind::Once => parse_utc(value).map(|_| ()).ok_or_else(|| {
            StoreError::InvalidTask(format!("invalid ISO timestamp '{value}'")).into()
        }),
    }
}
