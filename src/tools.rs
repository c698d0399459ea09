//! Tools available to the agent.

pub mod cron;
pub mod host;
pub mod model_router;
pub mod web;

use crate::llm::ToolDefinition;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Result of one tool execution as the agent sees it: a string payload
/// plus an error flag. Tool failures are values, not panics.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Static trait for tools. Use this for type-safe implementations.
pub trait Tool: Send + Sync + 'static {
    const NAME: &'static str;

    type Error: std::error::Error + Send + Sync + 'static;
    type Args: serde::de::DeserializeOwned + Send;
    type Output: serde::Serialize + Send;

    /// Tool surface advertised to the model.
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool.
    fn call(
        &self,
        args: Self::Args,
    ) -> impl Future<Output = std::result::Result<Self::Output, Self::Error>> + Send;
}

/// Dynamic companion trait for storing tools behind `Arc<dyn ToolDyn>`.
pub trait ToolDyn: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn definition(&self) -> ToolDefinition;

    fn call_raw<'a>(&'a self, args: Value) -> Pin<Box<dyn Future<Output = ToolOutcome> + Send + 'a>>;
}

/// Blanket implementation: any Tool is usable dynamically. Argument and
/// output mapping errors surface as error outcomes, never as panics.
impl<T: Tool> ToolDyn for T {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn definition(&self) -> ToolDefinition {
        Tool::definition(self)
    }

    fn call_raw<'a>(&'a self, args: Value) -> Pin<Box<dyn Future<Output = ToolOutcome> + Send + 'a>> {
        Box::pin(async move {
            let args: T::Args = match serde_json::from_value(args) {
                Ok(args) => args,
                Err(error) => {
                    return ToolOutcome::error(format!(
                        "Invalid arguments for {}: {error}",
                        T::NAME
                    ));
                }
            };

            match Tool::call(self, args).await {
                Ok(output) => match serde_json::to_value(output) {
                    Ok(Value::String(text)) => ToolOutcome::ok(text),
                    Ok(value) => ToolOutcome::ok(value.to_string()),
                    Err(error) => {
                        ToolOutcome::error(format!("{} output failed to serialize: {error}", T::NAME))
                    }
                },
                Err(error) => ToolOutcome::error(error.to_string()),
            }
        })
    }
}

/// Registry of tools, preserving registration order for tool definitions.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn ToolDyn>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn register(&mut self, tool: impl Tool) {
        self.tools.push(Arc::new(tool));
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Definitions in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|tool| tool.definition()).collect()
    }

    /// Execute a tool by name. Unknown names produce an error outcome so
    /// the model can correct itself.
    pub async fn call(&self, name: &str, args: Value) -> ToolOutcome {
        let Some(tool) = self.tools.iter().find(|tool| tool.name() == name) else {
            return ToolOutcome::error(format!("Unknown tool: {name}"));
        };
        tool.call_raw(args).await
    }
}
