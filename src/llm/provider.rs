//! OpenAI-compatible chat-completions client.
//!
//! One `ChatProvider` per configured model. The request/response mapping
//! targets the `/chat/completions` surface that OpenAI, Groq, OpenRouter,
//! DeepSeek, Mistral and friends share.

use crate::config::{ProviderConfig, TierConfig};
use crate::error::LlmError;
use crate::llm::{AssistantTurn, ChatMessage, ContentPart, ToolDefinition, ToolInvocation, UserContent};
use serde_json::{Value, json};

/// Chat completion client for a single provider/model pair.
#[derive(Debug, Clone)]
pub struct ChatProvider {
    http: reqwest::Client,
    provider: String,
    model: String,
    api_key: String,
    base_url: String,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
}

impl ChatProvider {
    /// Build a provider from the default `provider` config section.
    pub fn from_provider_config(config: &ProviderConfig) -> Result<Self, LlmError> {
        Self::new(
            &config.name,
            &config.model,
            &config.api_key,
            config.base_url.as_deref(),
            config.temperature,
            config.max_tokens,
        )
    }

    /// Build a provider for one tier, inheriting unset fields from the
    /// default provider section.
    pub fn from_tier_config(
        tier: &TierConfig,
        defaults: &ProviderConfig,
    ) -> Result<Self, LlmError> {
        Self::new(
            tier.provider.as_deref().unwrap_or(&defaults.name),
            &tier.model,
            tier.api_key.as_deref().unwrap_or(&defaults.api_key),
            tier.base_url.as_deref().or(defaults.base_url.as_deref()),
            tier.temperature.or(defaults.temperature),
            tier.max_tokens.or(defaults.max_tokens),
        )
    }

    fn new(
        provider: &str,
        model: &str,
        api_key: &str,
        base_url: Option<&str>,
        temperature: Option<f64>,
        max_tokens: Option<u32>,
    ) -> Result<Self, LlmError> {
        if api_key.is_empty() {
            return Err(LlmError::MissingProviderKey(provider.to_string()));
        }
        let base_url = match base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => default_base_url(provider)
                .ok_or_else(|| LlmError::UnknownProvider(provider.to_string()))?
                .to_string(),
        };

        Ok(Self {
            http: reqwest::Client::new(),
            provider: provider.to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            base_url,
            temperature,
            max_tokens,
        })
    }

    /// Human-readable "provider:model" label.
    pub fn label(&self) -> String {
        format!("{}:{}", self.provider, self.model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run one completion. `tools` is the pre-serialized tool payload
    /// produced by [`wire_tools`]; `None` advertises no tools.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&Value>,
    ) -> Result<AssistantTurn, LlmError> {
        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(wire_message).collect::<Vec<_>>(),
        });
        if let Some(tools) = tools
            && tools.as_array().is_some_and(|entries| !entries.is_empty())
        {
            body["tools"] = tools.clone();
        }
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|error| LlmError::ProviderRequest(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let snippet: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(500)
                .collect();
            return Err(LlmError::ProviderRequest(format!(
                "{} returned HTTP {status}: {snippet}",
                self.provider
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| LlmError::CompletionFailed(error.to_string()))?;
        parse_completion(&payload)
    }
}

/// Default OpenAI-compatible endpoint per provider name.
fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("https://api.openai.com/v1"),
        "groq" => Some("https://api.groq.com/openai/v1"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "deepseek" => Some("https://api.deepseek.com/v1"),
        "mistral" => Some("https://api.mistral.ai/v1"),
        "together" => Some("https://api.together.xyz/v1"),
        "fireworks" => Some("https://api.fireworks.ai/inference/v1"),
        "xai" => Some("https://api.x.ai/v1"),
        _ => None,
    }
}

/// Serialize tool definitions to the `tools` request payload once, so the
/// cost is paid at bind time rather than per call.
pub fn wire_tools(tools: &[ToolDefinition]) -> Value {
    Value::Array(
        tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect(),
    )
}

fn wire_message(message: &ChatMessage) -> Value {
    match message {
        ChatMessage::System { content } => json!({"role": "system", "content": content}),
        ChatMessage::User { content } => match content {
            UserContent::Text(text) => json!({"role": "user", "content": text}),
            UserContent::Parts(parts) => json!({
                "role": "user",
                "content": parts.iter().map(wire_part).collect::<Vec<_>>(),
            }),
        },
        ChatMessage::Assistant {
            content,
            tool_calls,
            ..
        } => {
            let mut wire = json!({"role": "assistant", "content": content});
            if !tool_calls.is_empty() {
                wire["tool_calls"] = Value::Array(
                    tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments.to_string(),
                                }
                            })
                        })
                        .collect(),
                );
            }
            wire
        }
        ChatMessage::Tool {
            tool_call_id,
            content,
            ..
        } => json!({
            "role": "tool",
            "tool_call_id": tool_call_id,
            "content": content,
        }),
    }
}

fn wire_part(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => json!({"type": "text", "text": text}),
        ContentPart::ImageUrl { url } => json!({"type": "image_url", "image_url": {"url": url}}),
    }
}

fn parse_completion(payload: &Value) -> Result<AssistantTurn, LlmError> {
    let message = payload
        .pointer("/choices/0/message")
        .ok_or_else(|| LlmError::CompletionFailed("response has no choices".to_string()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_string);
    let thinking = message
        .get("reasoning_content")
        .and_then(Value::as_str)
        .filter(|text| !text.trim().is_empty())
        .map(str::to_string);

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| calls.iter().filter_map(parse_tool_call).collect())
        .unwrap_or_default();

    Ok(AssistantTurn {
        content,
        thinking,
        tool_calls,
    })
}

fn parse_tool_call(call: &Value) -> Option<ToolInvocation> {
    let id = call.get("id")?.as_str()?.to_string();
    let function = call.get("function")?;
    let name = function.get("name")?.as_str()?.to_string();
    let raw_arguments = function
        .get("arguments")
        .and_then(Value::as_str)
        .unwrap_or("{}");
    let arguments = serde_json::from_str(raw_arguments)
        .unwrap_or_else(|_| Value::String(raw_arguments.to_string()));
    Some(ToolInvocation {
        id,
        name,
        arguments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tools_uses_function_envelope() {
        let tools = vec![ToolDefinition {
            name: "schedule_task".to_string(),
            description: "Schedule a task".to_string(),
            parameters: json!({"type": "object"}),
        }];
        let wire = wire_tools(&tools);
        assert_eq!(wire[0]["type"], "function");
        assert_eq!(wire[0]["function"]["name"], "schedule_task");
    }

    #[test]
    fn assistant_tool_calls_serialize_arguments_as_strings() {
        let message = ChatMessage::Assistant {
            content: None,
            thinking: None,
            tool_calls: vec![ToolInvocation {
                id: "call_1".to_string(),
                name: "web_search".to_string(),
                arguments: json!({"query": "rust"}),
            }],
        };
        let wire = wire_message(&message);
        assert_eq!(wire["tool_calls"][0]["function"]["arguments"], "{\"query\":\"rust\"}");
    }

    #[test]
    fn multimodal_user_content_becomes_typed_parts() {
        let message = ChatMessage::User {
            content: UserContent::Parts(vec![
                ContentPart::Text {
                    text: "what is this?".to_string(),
                },
                ContentPart::ImageUrl {
                    url: "data:image/jpeg;base64,AAAA".to_string(),
                },
            ]),
        };
        let wire = wire_message(&message);
        assert_eq!(wire["content"][0]["type"], "text");
        assert_eq!(wire["content"][1]["image_url"]["url"], "data:image/jpeg;base64,AAAA");
    }

    #[test]
    fn parses_text_completion() {
        let payload = json!({
            "choices": [{"message": {"role": "assistant", "content": "hello"}}]
        });
        let turn = parse_completion(&payload).expect("parse");
        assert_eq!(turn.content.as_deref(), Some("hello"));
        assert!(turn.tool_calls.is_empty());
    }

    #[test]
    fn parses_tool_calls_with_json_arguments() {
        let payload = json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_9",
                    "type": "function",
                    "function": {"name": "cancel_task", "arguments": "{\"task_id\":\"ab12\"}"}
                }]
            }}]
        });
        let turn = parse_completion(&payload).expect("parse");
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].name, "cancel_task");
        assert_eq!(turn.tool_calls[0].arguments["task_id"], "ab12");
    }

    #[test]
    fn malformed_tool_arguments_survive_as_raw_strings() {
        let payload = json!({
            "choices": [{"message": {
                "role": "assistant",
                "tool_calls": [{
                    "id": "call_9",
                    "function": {"name": "t", "arguments": "{broken"}
                }]
            }}]
        });
        let turn = parse_completion(&payload).expect("parse");
        assert_eq!(turn.tool_calls[0].arguments, json!("{broken"));
    }

    #[test]
    fn empty_choices_is_an_error() {
        let payload = json!({"choices": []});
        assert!(parse_completion(&payload).is_err());
    }

    #[test]
    fn missing_key_is_rejected_at_construction() {
        let config = ProviderConfig {
            name: "openai".to_string(),
            model: "gpt-4.1".to_string(),
            ..Default::default()
        };
        let error = ChatProvider::from_provider_config(&config).expect_err("must fail");
        assert!(matches!(error, LlmError::MissingProviderKey(_)));
    }

    #[test]
    fn unknown_provider_requires_base_url() {
        let config = ProviderConfig {
            name: "local-llama".to_string(),
            model: "llama3".to_string(),
            api_key: "k".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            ChatProvider::from_provider_config(&config),
            Err(LlmError::UnknownProvider(_))
        ));

        let with_url = ProviderConfig {
            base_url: Some("http://localhost:8080/v1".to_string()),
            ..config
        };
        let provider = ChatProvider::from_provider_config(&with_url).expect("builds");
        assert_eq!(provider.label(), "local-llama:llama3");
    }
}
