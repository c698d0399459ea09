//! Host execution tool: runs commands on the host via the gateway.

use crate::gateway::GatewayClient;
use crate::llm::ToolDefinition;
use crate::tools::Tool;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

const MAX_OUTPUT_LENGTH: usize = 15_000;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HostToolError(String);

/// Execute an allowlisted command on the host through the gateway.
#[derive(Clone)]
pub struct HostExecuteTool {
    client: Arc<GatewayClient>,
    /// Bridge name → allowed command basenames, for the tool description
    /// and a cheap pre-check before the round trip.
    bridges: HashMap<String, Vec<String>>,
    default_timeout: u64,
}

impl HostExecuteTool {
    pub fn new(
        client: Arc<GatewayClient>,
        bridges: HashMap<String, Vec<String>>,
        default_timeout: u64,
    ) -> Self {
        Self {
            client,
            bridges,
            default_timeout,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct HostExecuteArgs {
    /// Bridge name, e.g. "apple-notes" or "spotify".
    pub bridge: String,
    /// Shell-style command string; split into an argument list, never
    /// passed to a shell.
    pub command: String,
    /// Seconds. 0 uses the configured default.
    #[serde(default)]
    pub timeout: u64,
}

impl Tool for HostExecuteTool {
    const NAME: &'static str = "host_execute";

    type Error = HostToolError;
    type Args = HostExecuteArgs;
    type Output = String;

    fn definition(&self) -> ToolDefinition {
        let mut bridge_names: Vec<&String> = self.bridges.keys().collect();
        bridge_names.sort();
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: format!(
                "Execute a command on the host via the secure gateway. \
                 Available bridges: {}.",
                bridge_names
                    .iter()
                    .map(|name| name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "bridge": {"type": "string", "description": "Bridge name"},
                    "command": {"type": "string", "description": "Command string, e.g. \"memo list\""},
                    "timeout": {"type": "integer", "description": "Seconds; 0 = default"}
                },
                "required": ["bridge", "command"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        if !self.bridges.contains_key(&args.bridge) {
            let mut available: Vec<&str> =
                self.bridges.keys().map(|name| name.as_str()).collect();
            available.sort();
            let available = if available.is_empty() {
                "(none)".to_string()
            } else {
                available.join(", ")
            };
            return Err(HostToolError(format!(
                "Unknown bridge '{}'. Available: {available}",
                args.bridge
            )));
        }

        let cmd = split_command(&args.command)
            .map_err(|error| HostToolError(format!("Invalid command syntax: {error}")))?;
        if cmd.is_empty() {
            return Err(HostToolError("Empty command.".to_string()));
        }

        let timeout = if args.timeout > 0 {
            args.timeout
        } else {
            self.default_timeout
        };

        let result = self.client.execute(&args.bridge, &cmd, None, timeout).await;
        if !result.error.is_empty() {
            return Err(HostToolError(result.error));
        }

        let mut output = result.stdout.trim().to_string();
        if result.returncode != 0 {
            let stderr = result.stderr.trim();
            output = if !stderr.is_empty() {
                format!("Command failed (exit {}):\n{stderr}", result.returncode)
            } else if !output.is_empty() {
                format!("Command failed (exit {}):\n{output}", result.returncode)
            } else {
                format!("Command failed with exit code {}.", result.returncode)
            };
        }

        if output.is_empty() {
            return Ok("(no output)".to_string());
        }
        if output.chars().count() > MAX_OUTPUT_LENGTH {
            let cap = output
                .char_indices()
                .nth(MAX_OUTPUT_LENGTH)
                .map(|(idx, _)| idx)
                .unwrap_or(output.len());
            output.truncate(cap);
            output.push_str("\n\n... (truncated)");
        }
        Ok(output)
    }
}

/// Split a shell-style command string into arguments. Supports single and
/// double quotes and backslash escapes; no expansion of any kind.
pub fn split_command(command: &str) -> std::result::Result<Vec<String>, String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = command.chars();

    while let Some(ch) = chars.next() {
        match quote {
            Some('\'') => {
                if ch == '\'' {
                    quote = None;
                } else {
                    current.push(ch);
                }
            }
            Some('"') => match ch {
                '"' => quote = None,
                '\\' => {
                    let Some(next) = chars.next() else {
                        return Err("trailing backslash".to_string());
                    };
                    if !matches!(next, '"' | '\\' | '$' | '`') {
                        current.push('\\');
                    }
                    current.push(next);
                }
                _ => current.push(ch),
            },
            _ => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    in_word = true;
                }
                '\\' => {
                    let Some(next) = chars.next() else {
                        return Err("trailing backslash".to_string());
                    };
                    current.push(next);
                    in_word = true;
                }
                ch if ch.is_whitespace() => {
                    if in_word {
                        args.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                _ => {
                    current.push(ch);
                    in_word = true;
                }
            },
        }
    }

    if quote.is_some() {
        return Err("unterminated quote".to_string());
    }
    if in_word {
        args.push(current);
    }
    Ok(args)
}
