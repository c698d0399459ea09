//! Scheduler: polls the task log, marks due tasks, dispatches workers.
//!
//! Marking happens atomically under the task-log lock before any worker
//! starts, so overlapping ticks can never double-dispatch a task. Workers
//! run outside the lock, one tokio task each, and are drained (not
//! aborted) on shutdown.

use crate::agent::{Agent, AgentInput};
use crate::channels::{ChannelRegistry, SendOptions};
use crate::context::{self, InvocationOrigin};
use crate::llm::router::{set_active_tier, tier_scope};
use crate::tasks::{ScheduledTask, TaskLog};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::{JoinHandle, JoinSet};

/// Polling scheduler for the shared task log.
pub struct Scheduler {
    log: Arc<TaskLog>,
    agent: Arc<dyn Agent>,
    channels: Arc<ChannelRegistry>,
    poll_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    workers: Arc<Mutex<JoinSet<()>>>,
}

impl Scheduler {
    pub fn new(
        log: Arc<TaskLog>,
        agent: Arc<dyn Agent>,
        channels: Arc<ChannelRegistry>,
        poll_interval_secs: u64,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            log,
            agent,
            channels,
            poll_interval: Duration::from_secs(poll_interval_secs.max(1)),
            shutdown_tx,
            loop_handle: Mutex::new(None),
            workers: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Launch the polling loop.
    pub async fn start(self: Arc<Self>) {
        let scheduler = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.poll_interval);
            // The first tick of tokio's interval fires immediately; skip
            // catch-up ticks if a pass falls behind.
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        scheduler.tick().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        *self.loop_handle.lock().await = Some(handle);
        tracing::info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "scheduler started"
        );
    }

    /// Stop the loop and drain in-flight workers.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.loop_handle.lock().await.take() {
            let _ = handle.await;
        }
        self.drain_workers().await;
        tracing::info!("scheduler stopped");
    }

    /// One polling pass: mark due tasks under the log's lock, then spawn
    /// one worker per due task outside it. Returns the dispatch count.
    pub async fn tick(&self) -> usize {
        // Reap workers that already finished so the set stays small.
        {
            let mut workers = self.workers.lock().await;
            while workers.try_join_next().is_some() {}
        }

        let due = match self.log.check_and_mark(Utc::now()).await {
            Ok(due) => due,
            Err(error) => {
                tracing::error!(%error, "scheduler check failed");
                return 0;
            }
        };

        let count = due.len();
        for task in due {
            tracing::info!(task_id = %task.id, kind = %task.kind, "running scheduled task");
            let agent = self.agent.clone();
            let channels = self.channels.clone();
            let mut workers = self.workers.lock().await;
            workers.spawn(execute_task(agent, channels, task));
        }
        count
    }

    /// Await every currently tracked worker.
    pub async fn drain_workers(&self) {
        let mut workers = self.workers.lock().await;
        while workers.join_next().await.is_some() {}
    }
}

/// Run one scheduled task: fresh tier and invocation-context scopes,
/// agent invocation, delivery to the task's channel. The tier scope is
/// dropped on every exit path, so the tier never leaks across tasks.
async fn execute_task(
    agent: Arc<dyn Agent>,
    channels: Arc<ChannelRegistry>,
    task: ScheduledTask,
) {
    let origin = match (&task.channel, &task.chat_id) {
        (Some(channel), Some(chat_id)) => Some(InvocationOrigin {
            channel: channel.clone(),
            chat_id: chat_id.clone(),
        }),
        _ => None,
    };

    tier_scope(context::scope(origin, async {
        if let Some(tier) = &task.model_tier {
            set_active_tier(tier);
        }

        let thread_id = task.thread_id();
        let response = match agent
            .invoke(AgentInput::text(task.prompt.clone()), &thread_id)
            .await
        {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(task_id = %task.id, %error, "scheduled task failed");
                return;
            }
        };

        if response.text.trim().is_empty() {
            tracing::debug!(task_id = %task.id, "task produced no output, skipping delivery");
            return;
        }

        let (Some(channel), Some(chat_id)) = (&task.channel, &task.chat_id) else {
            tracing::warn!(task_id = %task.id, "task has no delivery target, result discarded");
            return;
        };

        let options = SendOptions {
            disable_notification: true,
            ..Default::default()
        };
        match channels.send_to(channel, chat_id, &response.text, options).await {
            Ok(_) => {
                tracing::info!(task_id = %task.id, channel = %channel, chat_id = %chat_id, "scheduled result delivered");
            }
            Err(error) => {
                tracing::warn!(task_id = %task.id, channel = %channel, %error, "failed to deliver scheduled result");
            }
        }
    }))
    .await
}
