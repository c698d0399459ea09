//! Chat model types and the tier-routing layer.

pub mod provider;
pub mod router;

pub use provider::ChatProvider;
pub use router::{BoundRouter, TierRouter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One message in a conversation, as a closed set of roles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ChatMessage {
    System {
        content: String,
    },
    User {
        content: UserContent,
    },
    Assistant {
        #[serde(default)]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thinking: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolInvocation>,
    },
    Tool {
        tool_call_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage::User {
            content: UserContent::Text(content.into()),
        }
    }
}

/// User message content: plain text or a list of typed parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// One block of multimodal user content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    /// `url` is typically a `data:` URL for inline images.
    ImageUrl { url: String },
}

/// A tool call issued by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// A tool surface advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool's arguments object.
    pub parameters: Value,
}

/// One assistant turn returned by a provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantTurn {
    pub content: Option<String>,
    pub thinking: Option<String>,
    pub tool_calls: Vec<ToolInvocation>,
}

impl From<AssistantTurn> for ChatMessage {
    fn from(turn: AssistantTurn) -> Self {
        ChatMessage::Assistant {
            content: turn.content,
            thinking: turn.thinking,
            tool_calls: turn.tool_calls,
        }
    }
}
