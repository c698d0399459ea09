//! Message router: admission, trigger matching, thread identity, agent
//! invocation, session logging.

use crate::agent::{Agent, AgentInput};
use crate::agent::response::AgentResponse;
use crate::config::TelegramConfig;
use crate::context;
use crate::llm::{ContentPart, UserContent};
use crate::sessions::SessionMap;
use crate::IncomingMessage;
use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt as _;

/// Per-channel settings the router needs at dispatch time.
#[derive(Debug, Clone, Default)]
pub struct ChannelRuntimeConfig {
    pub trigger: String,
    /// Empty list allows everyone.
    pub allowed_users: Vec<String>,
}

impl From<&TelegramConfig> for ChannelRuntimeConfig {
    fn from(config: &TelegramConfig) -> Self {
        Self {
            trigger: config.trigger.clone(),
            allowed_users: config.allowed_users.clone(),
        }
    }
}

/// Routes messages from channels to the agent.
pub struct MessageRouter {
    agent: Arc<dyn Agent>,
    sessions: Arc<SessionMap>,
    sessions_dir: PathBuf,
}

impl MessageRouter {
    pub fn new(agent: Arc<dyn Agent>, sessions: Arc<SessionMap>, sessions_dir: PathBuf) -> Self {
        Self {
            agent,
            sessions,
            sessions_dir,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionMap> {
        &self.sessions
    }

    /// Process one inbound message. Returns the agent's response when the
    /// message was admitted and answered; errors never cross this
    /// boundary.
    pub async fn handle_message(
        &self,
        msg: &IncomingMessage,
        channel_config: &ChannelRuntimeConfig,
    ) -> Option<AgentResponse> {
        if !self.is_user_allowed(channel_config, &msg.user_id) {
            tracing::warn!(
                channel = %msg.channel,
                user_id = %msg.user_id,
                "blocked message from unauthorized user"
            );
            return None;
        }

        if msg.reset_session {
            if let Err(error) = self.sessions.reset(&msg.channel, &msg.chat_id).await {
                tracing::error!(%error, "failed to persist session reset");
            }
            return None;
        }

        let (should_respond, clean_text) = should_respond(msg, &channel_config.trigger);
        if !should_respond {
            return None;
        }

        let has_image = msg.image_base64.as_deref().is_some_and(|data| !data.is_empty());
        if clean_text.is_empty() && !has_image {
            return None;
        }

        let thread_id = self.sessions.thread_id(&msg.channel, &msg.chat_id).await;

        // Expose the origin so tools like schedule_task can capture a
        // delivery target.
        context::set_origin(&msg.channel, &msg.chat_id);

        let formatted = format!(
            "[{}] [{}]: {clean_text}",
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            msg.user_name
        );
        let content = match (&msg.image_base64, has_image) {
            (Some(image), true) => {
                let mime = if msg.image_mime_type.is_empty() {
                    "image/jpeg"
                } else {
                    msg.image_mime_type.as_str()
                };
                UserContent::Parts(vec![
                    ContentPart::Text { text: formatted },
                    ContentPart::ImageUrl {
                        url: format!("data:{mime};base64,{image}"),
                    },
                ])
            }
            _ => UserContent::Text(formatted),
        };

        self.log_session(&thread_id, "user", &clean_text, msg).await;

        tracing::info!(
            channel = %msg.channel,
            chat_id = %msg.chat_id,
            user = %msg.user_name,
            thread_id = %thread_id,
            "processing message"
        );

        let response = match self
            .agent
            .invoke(AgentInput { content }, &thread_id)
            .await
        {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(thread_id = %thread_id, %error, "agent error");
                AgentResponse::from_text(format!("Sorry, I encountered an error: {error}"))
            }
        };

        self.log_session(&thread_id, "assistant", &response.text, msg)
            .await;
        Some(response)
    }

    fn is_user_allowed(&self, channel_config: &ChannelRuntimeConfig, user_id: &str) -> bool {
        channel_config.allowed_users.is_empty()
            || channel_config.allowed_users.iter().any(|id| id == user_id)
    }

    /// Append one entry to the thread's JSONL session log. Failures only
    /// warn; logging never blocks a response.
    async fn log_session(&self, thread_id: &str, role: &str, content: &str, msg: &IncomingMessage) {
        let entry = json!({
            "role": role,
            "content": content,
            "ts": Utc::now().to_rfc3339(),
            "channel": msg.channel,
            "user_id": if role == "user" { json!(msg.user_id) } else { json!(null) },
        });

        if let Err(error) = self.append_log(thread_id, &entry.to_string()).await {
            tracing::warn!(%error, "failed to log message");
        }
    }

    async fn append_log(&self, thread_id: &str, line: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.sessions_dir).await?;
        let path = self.sessions_dir.join(format!("{thread_id}.jsonl"));
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(format!("{line}\n").as_bytes()).await?;
        Ok(())
    }
}

/// Decide whether to respond and extract the cleaned text. Private chats
/// always respond; group chats respond only to messages starting with the
/// trigger (case-insensitive), which is stripped.
pub fn should_respond(msg: &IncomingMessage, trigger: &str) -> (bool, String) {
    let text = msg.text.trim();

    if msg.is_private {
        return (true, text.to_string());
    }

    match strip_prefix_ignore_case(text, trigger) {
        Some(rest) => (true, rest.trim().to_string()),
        None => (false, text.to_string()),
    }
}

/// Strip `prefix` from the start of `text`, comparing case-insensitively
/// character by character.
fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let mut indices = text.char_indices();
    for expected in prefix.chars() {
        let (_, actual) = indices.next()?;
        if !actual.to_lowercase().eq(expected.to_lowercase()) {
            return None;
        }
    }
    let rest = indices.next().map(|(index, _)| index).unwrap_or(text.len());
    Some(&text[rest..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::store::DocStore;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    /// Agent stub that records invocations and replies with a fixed text.
    struct StubAgent {
        invocations: Mutex<Vec<(String, AgentInput)>>,
        fail: bool,
    }

    impl StubAgent {
        fn new() -> Self {
            Self {
                invocations: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                invocations: Mutex::new(Vec::new()),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl Agent for StubAgent {
        async fn invoke(
            &self,
            input: AgentInput,
            thread_id: &str,
        ) -> crate::Result<AgentResponse> {
            self.invocations
                .lock()
                .await
                .push((thread_id.to_string(), input));
            if self.fail {
                return Err(AgentError::EmptyResponse.into());
            }
            Ok(AgentResponse::from_text("stub reply"))
        }
    }

    fn router_with(
        dir: &tempfile::TempDir,
        agent: Arc<StubAgent>,
    ) -> MessageRouter {
        let sessions = Arc::new(SessionMap::new(DocStore::open(
            dir.path().join("session_counters.json"),
        )));
        MessageRouter::new(agent, sessions, dir.path().join("sessions"))
    }

    fn group_msg(text: &str) -> IncomingMessage {
        IncomingMessage::text("telegram", "42", "7", "alice", text)
    }

    fn private_msg(text: &str) -> IncomingMessage {
        let mut msg = group_msg(text);
        msg.is_private = true;
        msg
    }

    fn config(trigger: &str, allowed: &[&str]) -> ChannelRuntimeConfig {
        ChannelRuntimeConfig {
            trigger: trigger.to_string(),
            allowed_users: allowed.iter().map(|id| id.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn group_trigger_is_stripped_and_thread_assigned() {
        let dir = tempfile::tempdir().expect("tempdir");
        let agent = Arc::new(StubAgent::new());
        let router = router_with(&dir, agent.clone());

        let response = router
            .handle_message(&group_msg("@Bot  weather?"), &config("@Bot", &[]))
            .await;
        assert!(response.is_some());

        let invocations = agent.invocations.lock().await;
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].0, "telegram_42");
        let UserContent::Text(text) = &invocations[0].1.content else {
            panic!("expected text content");
        };
        assert!(text.ends_with("[alice]: weather?"), "got: {text}");
    }

    #[tokio::test]
    async fn trigger_match_is_case_insensitive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let agent = Arc::new(StubAgent::new());
        let router = router_with(&dir, agent.clone());

        let response = router
            .handle_message(&group_msg("@x   hello"), &config("@X", &[]))
            .await;
        assert!(response.is_some());

        let invocations = agent.invocations.lock().await;
        let UserContent::Text(text) = &invocations[0].1.content else {
            panic!("expected text content");
        };
        assert!(text.ends_with("[alice]: hello"), "got: {text}");
    }

    #[tokio::test]
    async fn group_messages_without_trigger_are_dropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let agent = Arc::new(StubAgent::new());
        let router = router_with(&dir, agent.clone());

        let response = router
            .handle_message(&group_msg("just chatting"), &config("@Bot", &[]))
            .await;
        assert!(response.is_none());
        assert!(agent.invocations.lock().await.is_empty());
    }

    #[tokio::test]
    async fn private_chats_skip_the_trigger() {
        let dir = tempfile::tempdir().expect("tempdir");
        let agent = Arc::new(StubAgent::new());
        let router = router_with(&dir, agent.clone());

        let response = router
            .handle_message(&private_msg("hello there"), &config("@Bot", &[]))
            .await;
        assert!(response.is_some());
    }

    #[tokio::test]
    async fn disallowed_users_are_dropped_before_the_agent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let agent = Arc::new(StubAgent::new());
        let router = router_with(&dir, agent.clone());

        let response = router
            .handle_message(&private_msg("hi"), &config("@Bot", &["1", "2"]))
            .await;
        assert!(response.is_none());
        assert!(agent.invocations.lock().await.is_empty());
    }

    #[tokio::test]
    async fn empty_allowlist_admits_everyone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let agent = Arc::new(StubAgent::new());
        let router = router_with(&dir, agent.clone());

        let response = router
            .handle_message(&private_msg("hi"), &config("@Bot", &[]))
            .await;
        assert!(response.is_some());
    }

    #[tokio::test]
    async fn reset_bumps_the_thread_and_returns_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let agent = Arc::new(StubAgent::new());
        let router = router_with(&dir, agent.clone());
        let config = config("@Bot", &[]);

        let mut reset = private_msg("");
        reset.reset_session = true;
        assert!(router.handle_message(&reset, &config).await.is_none());

        router
            .handle_message(&private_msg("hi"), &config)
            .await
            .expect("admitted");
        let invocations = agent.invocations.lock().await;
        assert_eq!(invocations[0].0, "telegram_42_s1");
    }

    #[tokio::test]
    async fn empty_messages_are_dropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let agent = Arc::new(StubAgent::new());
        let router = router_with(&dir, agent.clone());

        let response = router
            .handle_message(&private_msg("   "), &config("@Bot", &[]))
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn image_only_messages_are_admitted_as_parts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let agent = Arc::new(StubAgent::new());
        let router = router_with(&dir, agent.clone());

        let mut msg = private_msg("");
        msg.image_base64 = Some("AAAA".to_string());
        msg.image_mime_type = "image/png".to_string();

        let response = router.handle_message(&msg, &config("@Bot", &[])).await;
        assert!(response.is_some());

        let invocations = agent.invocations.lock().await;
        let UserContent::Parts(parts) = &invocations[0].1.content else {
            panic!("expected parts content");
        };
        assert!(matches!(
            &parts[1],
            ContentPart::ImageUrl { url } if url == "data:image/png;base64,AAAA"
        ));
    }

    #[tokio::test]
    async fn agent_errors_become_apologies_not_panics() {
        let dir = tempfile::tempdir().expect("tempdir");
        let agent = Arc::new(StubAgent::failing());
        let router = router_with(&dir, agent.clone());

        let response = router
            .handle_message(&private_msg("hi"), &config("@Bot", &[]))
            .await
            .expect("a response is still produced");
        assert!(response.text.contains("Sorry, I encountered an error"));
    }

    #[tokio::test]
    async fn session_log_gets_user_and_assistant_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let agent = Arc::new(StubAgent::new());
        let router = router_with(&dir, agent.clone());

        router
            .handle_message(&private_msg("log me"), &config("@Bot", &[]))
            .await
            .expect("admitted");

        let log = std::fs::read_to_string(dir.path().join("sessions/telegram_42.jsonl"))
            .expect("session log written");
        let lines: Vec<serde_json::Value> = log
            .lines()
            .map(|line| serde_json::from_str(line).expect("jsonl line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["role"], "user");
        assert_eq!(lines[0]["content"], "log me");
        assert_eq!(lines[0]["user_id"], "7");
        assert_eq!(lines[1]["role"], "assistant");
        assert_eq!(lines[1]["user_id"], serde_json::Value::Null);
    }
}
