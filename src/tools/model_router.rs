//! In-chat model tier switching.

use crate::llm::ToolDefinition;
use crate::llm::router::set_active_tier;
use crate::tools::Tool;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SwitchModelError(String);

/// Switch the active model tier for the rest of the current turn.
#[derive(Clone)]
pub struct SwitchModelTool {
    /// Allowlist of known tier names, sorted.
    tiers: Vec<String>,
}

impl SwitchModelTool {
    pub fn new(mut tiers: Vec<String>) -> Self {
        tiers.sort();
        Self { tiers }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SwitchModelArgs {
    /// Tier name to switch to.
    pub tier: String,
}

impl Tool for SwitchModelTool {
    const NAME: &'static str = "switch_model";

    type Error = SwitchModelError;
    type Args = SwitchModelArgs;
    type Output = String;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: format!(
                "Switch to a different model tier for the rest of this conversation turn. \
                 Use a stronger tier for complex coding, architecture or nuanced reasoning; \
                 stay on the current tier for simple tasks. The switch takes effect on the \
                 NEXT step, with full access to tools, memory and history. \
                 Available tiers: {}.",
                self.tiers.join(", ")
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "tier": {
                        "type": "string",
                        "enum": self.tiers,
                        "description": "Model tier to switch to"
                    }
                },
                "required": ["tier"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        if !self.tiers.contains(&args.tier) {
            return Err(SwitchModelError(format!(
                "Unknown tier '{}'. Available: {}",
                args.tier,
                self.tiers.join(", ")
            )));
        }

        set_active_tier(&args.tier);
        tracing::info!(tier = %args.tier, "model tier switched");
        Ok(format!(
            "Switched to tier '{}'. The next step will use this model.",
            args.tier
        ))
    }
}
