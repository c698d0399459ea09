//! Agent invocation contract and the conversation agent.
//!
//! The router and scheduler only depend on the [`Agent`] trait; the
//! default implementation drives the tier router in a tool loop with a
//! per-thread checkpointed history.

pub mod checkpoints;
pub mod response;

use crate::agent::checkpoints::CheckpointStore;
use crate::agent::response::{AgentResponse, extract_turn};
use crate::error::Result;
use crate::llm::{BoundRouter, ChatMessage, UserContent};
use crate::tools::ToolRegistry;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Input for one agent invocation, already formatted by the caller.
#[derive(Debug, Clone)]
pub struct AgentInput {
    pub content: UserContent,
}

impl AgentInput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: UserContent::Text(content.into()),
        }
    }
}

/// The invocation contract the rest of the system depends on.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Run one turn on the conversation identified by `thread_id`.
    async fn invoke(&self, input: AgentInput, thread_id: &str) -> Result<AgentResponse>;
}

/// Tool-looping agent over the tier router with checkpointed history.
pub struct ConversationAgent {
    bound: BoundRouter,
    tools: Arc<ToolRegistry>,
    checkpoints: CheckpointStore,
    system_prompt: String,
    max_tool_iterations: usize,
}

impl ConversationAgent {
    pub fn new(
        bound: BoundRouter,
        tools: Arc<ToolRegistry>,
        checkpoints: CheckpointStore,
        system_prompt: impl Into<String>,
        max_tool_iterations: usize,
    ) -> Self {
        Self {
            bound,
            tools,
            checkpoints,
            system_prompt: system_prompt.into(),
            max_tool_iterations: max_tool_iterations.max(1),
        }
    }

    /// Messages sent to the model: the current system prompt plus the
    /// stored history. The system prompt is prepended per call rather
    /// than persisted, so prompt changes apply to existing threads.
    fn with_system(&self, history: &[ChatMessage]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !self.system_prompt.is_empty() {
            messages.push(ChatMessage::system(self.system_prompt.clone()));
        }
        messages.extend_from_slice(history);
        messages
    }
}

#[async_trait]
impl Agent for ConversationAgent {
    async fn invoke(&self, input: AgentInput, thread_id: &str) -> Result<AgentResponse> {
        let mut history = self.checkpoints.load(thread_id).await?;
        history.push(ChatMessage::User {
            content: input.content,
        });

        for iteration in 0..self.max_tool_iterations {
            let turn = self.bound.complete(&self.with_system(&history)).await?;
            let tool_calls = turn.tool_calls.clone();
            history.push(turn.into());

            if tool_calls.is_empty() {
                break;
            }
            if iteration + 1 == self.max_tool_iterations {
                tracing::warn!(
                    thread_id,
                    max = self.max_tool_iterations,
                    "tool iteration limit reached"
                );
            }

            // Execute tool calls in the order the model issued them.
            for call in tool_calls {
                let outcome = self.tools.call(&call.name, call.arguments.clone()).await;
                tracing::debug!(
                    thread_id,
                    tool = %call.name,
                    is_error = outcome.is_error,
                    "tool executed"
                );
                history.push(ChatMessage::Tool {
                    tool_call_id: call.id,
                    content: outcome.content,
                    is_error: outcome.is_error,
                });
            }
        }

        self.checkpoints.save(thread_id, &history).await?;
        Ok(extract_turn(&history))
    }
}

/// Compose the system prompt: base persona plus any workspace memory
/// files that exist.
pub fn load_system_prompt(workspace: &Path) -> String {
    let mut sections = vec![
        "You are Ciana, a helpful personal assistant reachable through chat channels."
            .to_string(),
    ];

    for name in ["IDENTITY.md", "AGENT.md", "MEMORY.md"] {
        let path = workspace.join(name);
        match std::fs::read_to_string(&path) {
            Ok(contents) if !contents.trim().is_empty() => {
                tracing::info!(path = %path.display(), "memory file loaded");
                sections.push(contents.trim().to_string());
            }
            _ => {}
        }
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelRouterConfig, ProviderConfig};
    use crate::llm::{TierRouter, ToolDefinition};
    use crate::tools::Tool;
    use axum::Json;
    use axum::routing::post;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct UpperTool;

    #[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
    struct UpperArgs {
        text: String,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("upper failed")]
    struct UpperError;

    impl Tool for UpperTool {
        const NAME: &'static str = "upper";

        type Error = UpperError;
        type Args = UpperArgs;
        type Output = String;

        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: Self::NAME.to_string(),
                description: "Uppercase text".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }),
            }
        }

        async fn call(&self, args: Self::Args) -> std::result::Result<Self::Output, Self::Error> {
            Ok(args.text.to_uppercase())
        }
    }

    /// Mock chat-completions endpoint: first call requests the `upper`
    /// tool, second call answers with text that echoes the tool result.
    async fn mock_provider() -> String {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = axum::Router::new().route(
            "/chat/completions",
            post(move |Json(body): Json<Value>| {
                let calls = calls.clone();
                async move {
                    let call_index = calls.fetch_add(1, Ordering::SeqCst);
                    if call_index == 0 {
                        Json(json!({
                            "choices": [{"message": {
                                "role": "assistant",
                                "content": null,
                                "tool_calls": [{
                                    "id": "call_1",
                                    "type": "function",
                                    "function": {"name": "upper", "arguments": "{\"text\":\"hi\"}"}
                                }]
                            }}]
                        }))
                    } else {
                        // Echo the tool result from the request back as text.
                        let tool_result = body["messages"]
                            .as_array()
                            .and_then(|messages| {
                                messages.iter().rev().find(|m| m["role"] == "tool")
                            })
                            .and_then(|m| m["content"].as_str())
                            .unwrap_or("?")
                            .to_string();
                        Json(json!({
                            "choices": [{"message": {
                                "role": "assistant",
                                "content": format!("The tool said: {tool_result}")
                            }}]
                        }))
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock provider");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock provider");
        });
        format!("http://{addr}")
    }

    async fn build_agent(base_url: &str) -> ConversationAgent {
        let provider = ProviderConfig {
            name: "mock".to_string(),
            model: "mock-1".to_string(),
            api_key: "k".to_string(),
            base_url: Some(base_url.to_string()),
            ..Default::default()
        };
        let router = TierRouter::from_config(&ModelRouterConfig::default(), &provider)
            .expect("router builds");

        let mut registry = ToolRegistry::new();
        registry.register(UpperTool);
        let registry = Arc::new(registry);
        let bound = router.bind_tools(&registry.definitions());

        let pool = sqlx::SqlitePool::connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should connect");
        let checkpoints = CheckpointStore::new(pool);
        checkpoints.migrate().await.expect("migrate");

        ConversationAgent::new(bound, registry, checkpoints, "You are a test agent.", 5)
    }

    #[tokio::test]
    async fn runs_the_tool_loop_and_checkpoints_the_thread() {
        let base = mock_provider().await;
        let agent = build_agent(&base).await;

        let response = agent
            .invoke(AgentInput::text("please uppercase hi"), "telegram_42")
            .await
            .expect("invoke");

        assert_eq!(response.text, "The tool said: HI");
        // Events: the tool call (paired with its result) then the text.
        assert_eq!(response.events.len(), 2);

        // History persisted: user, assistant(tool_calls), tool, assistant.
        let history = agent
            .checkpoints
            .load("telegram_42")
            .await
            .expect("load checkpoint");
        assert_eq!(history.len(), 4);
        assert!(matches!(history[2], ChatMessage::Tool { .. }));
    }

    #[tokio::test]
    async fn threads_are_isolated() {
        let base = mock_provider().await;
        let agent = build_agent(&base).await;

        agent
            .invoke(AgentInput::text("first"), "thread_a")
            .await
            .expect("invoke");
        let other = agent
            .checkpoints
            .load("thread_b")
            .await
            .expect("load checkpoint");
        assert!(other.is_empty());
    }

    #[test]
    fn system_prompt_includes_existing_memory_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("IDENTITY.md"), "I am Ciana.").expect("write");

        let prompt = load_system_prompt(dir.path());
        assert!(prompt.contains("I am Ciana."));
        assert!(prompt.starts_with("You are Ciana"));
    }
}
