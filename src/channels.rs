//! Channel contract and dynamic dispatch companion.

pub mod telegram;

use crate::agent::response::AgentResponse;
use crate::error::{ChannelError, Result};
use crate::IncomingMessage;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

/// Future returned by a message handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Option<AgentResponse>> + Send>>;

/// Callback invoked per admitted inbound message.
pub type MessageHandler = Arc<dyn Fn(IncomingMessage) -> HandlerFuture + Send + Sync>;

/// Options for an outbound message.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub reply_to_message_id: Option<String>,
    /// Deliver without a notification sound (used by the scheduler).
    pub disable_notification: bool,
}

/// Result of a send.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendResult {
    pub message_id: Option<String>,
}

/// Static trait for channel adapters.
/// Use this for type-safe implementations.
pub trait Channel: Send + Sync + 'static {
    /// Unique name for this adapter.
    fn name(&self) -> &str;

    /// Register the inbound message handler. Called before `start`.
    fn on_message(&self, handler: MessageHandler);

    /// Start receiving messages (non-blocking).
    fn start(&self) -> impl Future<Output = Result<()>> + Send;

    /// Gracefully stop the channel.
    fn stop(&self) -> impl Future<Output = Result<()>> + Send;

    /// Send a text message to a chat.
    fn send(
        &self,
        chat_id: &str,
        text: &str,
        options: SendOptions,
    ) -> impl Future<Output = Result<SendResult>> + Send;

    /// Send a file to a chat.
    fn send_file(
        &self,
        chat_id: &str,
        path: &Path,
        caption: Option<&str>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Dynamic trait for runtime polymorphism.
/// Use this when storing different adapters behind `Arc<dyn ChannelDyn>`.
pub trait ChannelDyn: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn on_message(&self, handler: MessageHandler);

    fn start<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn stop<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn send<'a>(
        &'a self,
        chat_id: &'a str,
        text: &'a str,
        options: SendOptions,
    ) -> Pin<Box<dyn Future<Output = Result<SendResult>> + Send + 'a>>;

    fn send_file<'a>(
        &'a self,
        chat_id: &'a str,
        path: &'a Path,
        caption: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Blanket implementation: any Channel automatically implements ChannelDyn.
impl<T: Channel> ChannelDyn for T {
    fn name(&self) -> &str {
        Channel::name(self)
    }

    fn on_message(&self, handler: MessageHandler) {
        Channel::on_message(self, handler)
    }

    fn start<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Channel::start(self))
    }

    fn stop<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Channel::stop(self))
    }

    fn send<'a>(
        &'a self,
        chat_id: &'a str,
        text: &'a str,
        options: SendOptions,
    ) -> Pin<Box<dyn Future<Output = Result<SendResult>> + Send + 'a>> {
        Box::pin(Channel::send(self, chat_id, text, options))
    }

    fn send_file<'a>(
        &'a self,
        chat_id: &'a str,
        path: &'a Path,
        caption: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Channel::send_file(self, chat_id, path, caption))
    }
}

/// Name → adapter map used for scheduled-result delivery.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: HashMap<String, Arc<dyn ChannelDyn>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    pub fn register(&mut self, channel: Arc<dyn ChannelDyn>) {
        self.channels.insert(channel.name().to_string(), channel);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ChannelDyn>> {
        self.channels.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Send on a named channel; unknown names are an error value.
    pub async fn send_to(
        &self,
        channel: &str,
        chat_id: &str,
        text: &str,
        options: SendOptions,
    ) -> Result<SendResult> {
        let Some(adapter) = self.channels.get(channel) else {
            return Err(ChannelError::Unknown(channel.to_string()).into());
        };
        adapter.send(chat_id, text, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    struct RecordingChannel {
        sent: Arc<Mutex<Vec<(String, String, bool)>>>,
    }

    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            "recording"
        }

        fn on_message(&self, _handler: MessageHandler) {}

        async fn start(&self) -> Result<()> {
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }

        async fn send(
            &self,
            chat_id: &str,
            text: &str,
            options: SendOptions,
        ) -> Result<SendResult> {
            self.sent.lock().await.push((
                chat_id.to_string(),
                text.to_string(),
                options.disable_notification,
            ));
            Ok(SendResult {
                message_id: Some("1".to_string()),
            })
        }

        async fn send_file(
            &self,
            _chat_id: &str,
            _path: &Path,
            _caption: Option<&str>,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn registry_routes_sends_by_name() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let channel = Arc::new(RecordingChannel { sent: sent.clone() });

        let mut registry = ChannelRegistry::new();
        registry.register(channel);

        let result = registry
            .send_to(
                "recording",
                "42",
                "hello",
                SendOptions {
                    disable_notification: true,
                    ..Default::default()
                },
            )
            .await
            .expect("send");
        assert_eq!(result.message_id.as_deref(), Some("1"));
        assert_eq!(
            sent.lock().await.as_slice(),
            &[("42".to_string(), "hello".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn unknown_channel_is_an_error_value() {
        let registry = ChannelRegistry::new();
        let error = registry
            .send_to("ghost", "42", "hello", SendOptions::default())
            .await
            .expect_err("unknown channel");
        assert!(error.to_string().contains("unknown channel"));
    }
}
