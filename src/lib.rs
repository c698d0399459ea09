//! Ciana: a multi-channel conversational-agent host.
//!
//! Inbound messages flow channel → router → agent → channel; scheduled
//! tasks flow task log → scheduler → agent → channel; privileged host
//! commands flow tool → gateway client → gateway server → subprocess.

pub mod agent;
pub mod channels;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod router;
pub mod scheduler;
pub mod sessions;
pub mod store;
pub mod tasks;
pub mod tools;
pub mod transcription;
pub mod util;

pub use agent::response::{AgentResponse, ResponseEvent};
pub use error::{Error, Result};

use serde::{Deserialize, Serialize};

/// Normalized inbound message from any channel adapter.
///
/// Created once per inbound event, never mutated, discarded after dispatch.
/// Either `text` or `image_base64` is non-empty unless `reset_session` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Adapter name this message arrived on (e.g. "telegram").
    pub channel: String,
    pub chat_id: String,
    pub user_id: String,
    pub user_name: String,
    pub text: String,
    pub is_private: bool,
    /// Id of the message this one replies to, if any.
    pub reply_to: Option<String>,
    /// Platform message id of this message, if the adapter exposes one.
    pub message_id: Option<String>,
    /// True when the user asked for a fresh conversation (e.g. /new).
    #[serde(default)]
    pub reset_session: bool,
    /// Base64-encoded image payload attached to the message.
    pub image_base64: Option<String>,
    /// Mime type for `image_base64`; ignored when no image is attached.
    #[serde(default)]
    pub image_mime_type: String,
}

impl IncomingMessage {
    /// Plain-text message with no attachments.
    pub fn text(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            user_name: user_name.into(),
            text: text.into(),
            is_private: false,
            reply_to: None,
            message_id: None,
            reset_session: false,
            image_base64: None,
            image_mime_type: String::new(),
        }
    }

    /// True when the message carries neither text nor an image.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.image_base64.as_deref().unwrap_or("").is_empty()
    }
}
