//! Telegram channel adapter.
//!
//! Speaks the Bot API directly over HTTP: a long-poll `getUpdates` loop
//! for inbound messages, `sendMessage`/`sendDocument` for outbound.
//! Handler invocations run on their own tasks so a slow agent turn never
//! blocks polling; the tasks are tracked and drained on stop.

use crate::channels::{Channel, MessageHandler, SendOptions, SendResult};
use crate::config::TelegramConfig;
use crate::error::{ChannelError, Result};
use crate::transcription::TranscriptionService;
use crate::IncomingMessage;
use base64::Engine as _;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::{JoinHandle, JoinSet};

/// Telegram's hard limit on message length.
pub const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;

/// Long-poll window for getUpdates.
const POLL_TIMEOUT_SECS: u64 = 25;

/// Telegram channel adapter.
pub struct TelegramChannel {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    /// `https://api.telegram.org/bot<token>`, overridable for tests.
    api_base: String,
    /// `https://api.telegram.org/file/bot<token>`.
    file_base: String,
    token: String,
    handler: std::sync::RwLock<Option<MessageHandler>>,
    transcription: Option<Arc<TranscriptionService>>,
    shutdown_tx: watch::Sender<bool>,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<JoinSet<()>>,
}

impl TelegramChannel {
    pub fn new(config: &TelegramConfig, transcription: Option<Arc<TranscriptionService>>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                http: reqwest::Client::new(),
                api_base: format!("https://api.telegram.org/bot{}", config.token),
                file_base: format!("https://api.telegram.org/file/bot{}", config.token),
                token: config.token.clone(),
                handler: std::sync::RwLock::new(None),
                transcription,
                shutdown_tx,
                poll_handle: Mutex::new(None),
                tasks: Mutex::new(JoinSet::new()),
            }),
        }
    }
}

impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    fn on_message(&self, handler: MessageHandler) {
        *self.inner.handler.write().expect("handler lock") = Some(handler);
    }

    async fn start(&self) -> Result<()> {
        if self.inner.token.is_empty() {
            return Err(ChannelError::Start {
                name: "telegram".to_string(),
                message: "missing bot token".to_string(),
            }
            .into());
        }
        if self.inner.handler.read().expect("handler lock").is_none() {
            return Err(ChannelError::Start {
                name: "telegram".to_string(),
                message: "no message handler registered".to_string(),
            }
            .into());
        }

        let inner = self.inner.clone();
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut offset: i64 = 0;
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    updates = inner.poll_updates(offset) => {
                        match updates {
                            Ok(updates) => {
                                for update in updates {
                                    if let Some(update_id) = update.get("update_id").and_then(Value::as_i64) {
                                        offset = offset.max(update_id + 1);
                                    }
                                    inner.clone().dispatch_update(update).await;
                                }
                            }
                            Err(error) => {
                                tracing::warn!(%error, "telegram poll failed, backing off");
                                tokio::time::sleep(Duration::from_secs(5)).await;
                            }
                        }
                    }
                }
            }
        });

        *self.inner.poll_handle.lock().await = Some(handle);
        tracing::info!("telegram channel started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let _ = self.inner.shutdown_tx.send(true);
        if let Some(handle) = self.inner.poll_handle.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }

        // Drain in-flight handler tasks so responses already being
        // produced still go out.
        let mut tasks = self.inner.tasks.lock().await;
        while tasks.join_next().await.is_some() {}
        tracing::info!("telegram channel stopped");
        Ok(())
    }

    async fn send(&self, chat_id: &str, text: &str, options: SendOptions) -> Result<SendResult> {
        self.inner.send_text(chat_id, text, &options).await
    }

    async fn send_file(
        &self,
        chat_id: &str,
        path: &std::path::Path,
        caption: Option<&str>,
    ) -> Result<()> {
        let bytes = tokio::fs::read(path).await.map_err(|error| ChannelError::Send {
            name: "telegram".to_string(),
            message: format!("cannot read {}: {error}", path.display()),
        })?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());

        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part(
                "document",
                reqwest::multipart::Part::bytes(bytes).file_name(filename),
            );
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }

        let response = self
            .inner
            .http
            .post(format!("{}/sendDocument", self.inner.api_base))
            .multipart(form)
            .send()
            .await
            .map_err(|error| send_error(error.to_string()))?;
        if !response.status().is_success() {
            return Err(send_error(format!("HTTP {}", response.status().as_u16())).into());
        }
        Ok(())
    }
}

impl Inner {
    async fn poll_updates(&self, offset: i64) -> std::result::Result<Vec<Value>, String> {
        let response = self
            .http
            .post(format!("{}/getUpdates", self.api_base))
            .json(&json!({
                "timeout": POLL_TIMEOUT_SECS,
                "offset": offset,
                "allowed_updates": ["message"],
            }))
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .send()
            .await
            .map_err(|error| error.to_string())?;

        if !response.status().is_success() {
            return Err(format!("getUpdates returned HTTP {}", response.status().as_u16()));
        }

        let payload: Value = response.json().await.map_err(|error| error.to_string())?;
        Ok(payload
            .get("result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Normalize one update and hand it to the registered handler on its
    /// own task.
    async fn dispatch_update(self: Arc<Self>, update: Value) {
        let Some(raw) = parse_update(&update) else {
            return;
        };

        let handler = self.handler.read().expect("handler lock").clone();
        let Some(handler) = handler else {
            return;
        };

        let inner = self.clone();
        let mut tasks = self.tasks.lock().await;
        // Reap finished handler tasks as we go.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let Some(envelope) = inner.resolve_attachments(raw).await else {
                return;
            };
            let chat_id = envelope.chat_id.clone();
            let reply_to = if envelope.is_private {
                None
            } else {
                envelope.message_id.clone()
            };

            if let Some(response) = handler(envelope).await
                && !response.text.trim().is_empty()
            {
                let options = SendOptions {
                    reply_to_message_id: reply_to,
                    disable_notification: false,
                };
                if let Err(error) = inner.send_text(&chat_id, &response.text, &options).await {
                    tracing::error!(%error, chat_id = %chat_id, "failed to deliver response");
                }
            }
        });
    }

    /// Download and attach media referenced by the raw message: photos
    /// become base64 images, voice notes are transcribed into text.
    async fn resolve_attachments(&self, raw: RawMessage) -> Option<IncomingMessage> {
        let mut envelope = raw.envelope;

        if let Some(file_id) = raw.photo_file_id {
            match self.download_file(&file_id).await {
                Ok(bytes) => {
                    envelope.image_base64 =
                        Some(base64::engine::general_purpose::STANDARD.encode(&bytes));
                    envelope.image_mime_type = "image/jpeg".to_string();
                }
                Err(error) => {
                    tracing::warn!(%error, "failed to download photo, passing text only");
                }
            }
        }

        if let Some((file_id, mime_type)) = raw.voice {
            let Some(transcription) = &self.transcription else {
                tracing::warn!("voice message received but transcription is not configured");
                return None;
            };
            let bytes = match self.download_file(&file_id).await {
                Ok(bytes) => bytes,
                Err(error) => {
                    tracing::warn!(%error, "failed to download voice message");
                    return None;
                }
            };
            match transcription.transcribe(bytes, "audio.ogg", &mime_type).await {
                Ok(text) if !text.trim().is_empty() => {
                    envelope.text = text;
                }
                Ok(_) => return None,
                Err(error) => {
                    tracing::warn!(%error, "transcription failed");
                    return None;
                }
            }
        }

        Some(envelope)
    }

    async fn download_file(&self, file_id: &str) -> std::result::Result<Vec<u8>, String> {
        let response = self
            .http
            .get(format!("{}/getFile", self.api_base))
            .query(&[("file_id", file_id)])
            .send()
            .await
            .map_err(|error| error.to_string())?;
        let payload: Value = response.json().await.map_err(|error| error.to_string())?;
        let file_path = payload
            .pointer("/result/file_path")
            .and_then(Value::as_str)
            .ok_or_else(|| "getFile returned no file_path".to_string())?;

        let file = self
            .http
            .get(format!("{}/{file_path}", self.file_base))
            .send()
            .await
            .map_err(|error| error.to_string())?;
        if !file.status().is_success() {
            return Err(format!("file download returned HTTP {}", file.status().as_u16()));
        }
        file.bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|error| error.to_string())
    }

    async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        options: &SendOptions,
    ) -> Result<SendResult> {
        let mut first_message_id = None;

        for (index, chunk) in chunk_text(text, TELEGRAM_MAX_MESSAGE_LEN).into_iter().enumerate() {
            let mut body = json!({
                "chat_id": chat_id,
                "text": chunk,
                "disable_notification": options.disable_notification,
            });
            // Only the first chunk replies to the triggering message.
            if index == 0
                && let Some(reply_to) = &options.reply_to_message_id
            {
                body["reply_to_message_id"] = json!(reply_to.parse::<i64>().unwrap_or_default());
            }

            let response = self
                .http
                .post(format!("{}/sendMessage", self.api_base))
                .json(&body)
                .send()
                .await
                .map_err(|error| send_error(error.to_string()))?;
            if !response.status().is_success() {
                return Err(send_error(format!("HTTP {}", response.status().as_u16())).into());
            }

            if index == 0 {
                let payload: Value = response.json().await.unwrap_or_default();
                first_message_id = payload
                    .pointer("/result/message_id")
                    .and_then(Value::as_i64)
                    .map(|id| id.to_string());
            }
        }

        Ok(SendResult {
            message_id: first_message_id,
        })
    }
}

fn send_error(message: String) -> ChannelError {
    ChannelError::Send {
        name: "telegram".to_string(),
        message,
    }
}

/// A parsed update before attachments are resolved.
#[derive(Debug, Clone)]
struct RawMessage {
    envelope: IncomingMessage,
    photo_file_id: Option<String>,
    /// (file_id, mime_type) of a voice or audio attachment.
    voice: Option<(String, String)>,
}

/// Extract the message fields from one `getUpdates` entry. Pure; returns
/// None for updates without a usable message.
fn parse_update(update: &Value) -> Option<RawMessage> {
    let message = update.get("message")?;
    let chat = message.get("chat")?;
    let chat_id = chat.get("id")?.as_i64()?.to_string();
    let is_private = chat.get("type").and_then(Value::as_str) == Some("private");

    let from = message.get("from")?;
    let user_id = from.get("id")?.as_i64()?.to_string();
    let user_name = from
        .get("username")
        .and_then(Value::as_str)
        .or_else(|| from.get("first_name").and_then(Value::as_str))
        .unwrap_or("unknown")
        .to_string();

    let text = message
        .get("text")
        .or_else(|| message.get("caption"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let mut envelope = IncomingMessage {
        channel: "telegram".to_string(),
        chat_id,
        user_id,
        user_name,
        text: text.clone(),
        is_private,
        reply_to: message
            .pointer("/reply_to_message/message_id")
            .and_then(Value::as_i64)
            .map(|id| id.to_string()),
        message_id: message
            .get("message_id")
            .and_then(Value::as_i64)
            .map(|id| id.to_string()),
        reset_session: false,
        image_base64: None,
        image_mime_type: String::new(),
    };

    // /new resets the conversation; nothing else is processed.
    if text.trim() == "/new" || text.trim().starts_with("/new ") {
        envelope.reset_session = true;
        envelope.text = String::new();
        return Some(RawMessage {
            envelope,
            photo_file_id: None,
            voice: None,
        });
    }

    // Largest photo size is last in the array.
    let photo_file_id = message
        .get("photo")
        .and_then(Value::as_array)
        .and_then(|sizes| sizes.last())
        .and_then(|size| size.get("file_id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let voice = message
        .get("voice")
        .or_else(|| message.get("audio"))
        .and_then(|media| {
            let file_id = media.get("file_id")?.as_str()?.to_string();
            let mime_type = media
                .get("mime_type")
                .and_then(Value::as_str)
                .unwrap_or("audio/ogg")
                .to_string();
            Some((file_id, mime_type))
        });

    if envelope.text.is_empty() && photo_file_id.is_none() && voice.is_none() {
        return None;
    }

    Some(RawMessage {
        envelope,
        photo_file_id,
        voice,
    })
}

/// Split text into chunks under `max_chars`, preferring newline
/// boundaries.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.chars().count() > max_chars {
        let byte_cap = rest
            .char_indices()
            .nth(max_chars)
            .map(|(index, _)| index)
            .unwrap_or(rest.len());
        let cut = rest[..byte_cap]
            .rfind('\n')
            .filter(|&position| position > 0)
            .unwrap_or(byte_cap);
        chunks.push(rest[..cut].to_string());
        rest = rest[cut..].trim_start_matches('\n');
    }

    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_update(text: &str, chat_type: &str) -> Value {
        json!({
            "update_id": 100,
            "message": {
                "message_id": 5,
                "from": {"id": 7, "username": "alice"},
                "chat": {"id": 42, "type": chat_type},
                "text": text,
            }
        })
    }

    #[test]
    fn parses_group_text_messages() {
        let raw = parse_update(&text_update("@Ciana hello", "group")).expect("parsed");
        assert_eq!(raw.envelope.channel, "telegram");
        assert_eq!(raw.envelope.chat_id, "42");
        assert_eq!(raw.envelope.user_id, "7");
        assert_eq!(raw.envelope.user_name, "alice");
        assert_eq!(raw.envelope.text, "@Ciana hello");
        assert!(!raw.envelope.is_private);
        assert_eq!(raw.envelope.message_id.as_deref(), Some("5"));
    }

    #[test]
    fn private_chats_are_flagged() {
        let raw = parse_update(&text_update("hi", "private")).expect("parsed");
        assert!(raw.envelope.is_private);
    }

    #[test]
    fn falls_back_to_first_name_when_no_username() {
        let update = json!({
            "message": {
                "message_id": 1,
                "from": {"id": 7, "first_name": "Alice"},
                "chat": {"id": 42, "type": "private"},
                "text": "hi",
            }
        });
        let raw = parse_update(&update).expect("parsed");
        assert_eq!(raw.envelope.user_name, "Alice");
    }

    #[test]
    fn slash_new_becomes_a_session_reset() {
        let raw = parse_update(&text_update("/new", "private")).expect("parsed");
        assert!(raw.envelope.reset_session);
        assert!(raw.envelope.text.is_empty());
    }

    #[test]
    fn photo_messages_keep_the_largest_size() {
        let update = json!({
            "message": {
                "message_id": 9,
                "from": {"id": 7, "username": "alice"},
                "chat": {"id": 42, "type": "private"},
                "caption": "look at this",
                "photo": [
                    {"file_id": "small", "width": 90},
                    {"file_id": "large", "width": 1280}
                ],
            }
        });
        let raw = parse_update(&update).expect("parsed");
        assert_eq!(raw.envelope.text, "look at this");
        assert_eq!(raw.photo_file_id.as_deref(), Some("large"));
    }

    #[test]
    fn voice_messages_carry_file_and_mime() {
        let update = json!({
            "message": {
                "message_id": 9,
                "from": {"id": 7, "username": "alice"},
                "chat": {"id": 42, "type": "private"},
                "voice": {"file_id": "v1", "mime_type": "audio/ogg"},
            }
        });
        let raw = parse_update(&update).expect("parsed");
        assert_eq!(raw.voice, Some(("v1".to_string(), "audio/ogg".to_string())));
    }

    #[test]
    fn updates_without_content_are_ignored() {
        let update = json!({
            "message": {
                "message_id": 9,
                "from": {"id": 7, "username": "alice"},
                "chat": {"id": 42, "type": "private"},
            }
        });
        assert!(parse_update(&update).is_none());
        assert!(parse_update(&json!({"update_id": 1})).is_none());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        assert_eq!(chunk_text("hello", 4096), vec!["hello"]);
    }

    #[test]
    fn long_text_splits_at_newlines_under_the_cap() {
        let text = format!("{}\n{}", "a".repeat(4000), "b".repeat(500));
        let chunks = chunk_text(&text, TELEGRAM_MAX_MESSAGE_LEN);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(4000));
        assert_eq!(chunks[1], "b".repeat(500));
    }

    #[test]
    fn unbroken_text_splits_at_the_hard_cap() {
        let text = "x".repeat(TELEGRAM_MAX_MESSAGE_LEN * 2 + 10);
        let chunks = chunk_text(&text, TELEGRAM_MAX_MESSAGE_LEN);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= TELEGRAM_MAX_MESSAGE_LEN));
        let total: usize = chunks.iter().map(String::len).sum();
        assert_eq!(total, text.len());
    }
}
