//! Structured agent responses extracted from a conversation turn.

use crate::llm::ChatMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event within an agent turn, in the order the agent produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseEvent {
    /// A plain text block from the assistant.
    Text { text: String },
    /// An extended-thinking block.
    Thinking { text: String },
    /// A tool invocation paired with its result.
    ToolCall {
        tool_id: String,
        name: String,
        input_summary: String,
        result_text: String,
        is_error: bool,
    },
}

/// Structured response from one agent invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentResponse {
    /// Final user-facing text: the last text block of the turn.
    pub text: String,
    pub events: Vec<ResponseEvent>,
}

impl AgentResponse {
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            events: vec![ResponseEvent::Text { text: text.clone() }],
            text,
        }
    }
}

/// Extract the structured response for the current turn: everything after
/// the last user message. Tool calls are paired with their results by id;
/// the final text is the last text event.
pub fn extract_turn(messages: &[ChatMessage]) -> AgentResponse {
    let turn_start = messages
        .iter()
        .rposition(|message| matches!(message, ChatMessage::User { .. }))
        .map(|index| index + 1)
        .unwrap_or(0);
    let turn = &messages[turn_start..];

    // First pass: collect tool results by call id.
    let mut tool_results: std::collections::HashMap<&str, (&str, bool)> =
        std::collections::HashMap::new();
    for message in turn {
        if let ChatMessage::Tool {
            tool_call_id,
            content,
            is_error,
        } = message
        {
            tool_results.insert(tool_call_id.as_str(), (content.as_str(), *is_error));
        }
    }

    // Second pass: build events from assistant messages.
    let mut events = Vec::new();
    for message in turn {
        let ChatMessage::Assistant {
            content,
            thinking,
            tool_calls,
        } = message
        else {
            continue;
        };

        if let Some(text) = thinking
            && !text.trim().is_empty()
        {
            events.push(ResponseEvent::Thinking {
                text: text.trim().to_string(),
            });
        }

        if let Some(text) = content
            && !text.trim().is_empty()
        {
            events.push(ResponseEvent::Text {
                text: text.trim().to_string(),
            });
        }

        for call in tool_calls {
            let (result_text, is_error) = tool_results
                .get(call.id.as_str())
                .map(|(text, is_error)| (crate::util::truncate_default(text), *is_error))
                .unwrap_or_default();
            events.push(ResponseEvent::ToolCall {
                tool_id: call.id.clone(),
                name: call.name.clone(),
                input_summary: summarize_tool_input(&call.name, &call.arguments),
                result_text,
                is_error,
            });
        }
    }

    let text = events
        .iter()
        .rev()
        .find_map(|event| match event {
            ResponseEvent::Text { text } => Some(text.clone()),
            _ => None,
        })
        .unwrap_or_default();

    AgentResponse { text, events }
}

/// Compact one-line summary of tool arguments for display.
pub fn summarize_tool_input(tool_name: &str, arguments: &Value) -> String {
    let cap = |value: &str| crate::util::preview(value, 70);

    if tool_name == "host_execute" {
        if let Some(command) = arguments.get("command").and_then(Value::as_str) {
            return cap(command);
        }
    }

    for key in ["file_path", "command", "pattern", "query", "url", "prompt"] {
        if let Some(value) = arguments.get(key).and_then(Value::as_str) {
            return cap(value);
        }
    }

    if let Some(object) = arguments.as_object() {
        for value in object.values() {
            if let Some(text) = value.as_str()
                && !text.is_empty()
            {
                return crate::util::preview(text, 60);
            }
        }
    }
    String::new()
}
