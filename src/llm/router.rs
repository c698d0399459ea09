//! Tier router: one logical model multiplexed over several tiers.
//!
//! The active tier is a task-local value scoped to one logical unit of
//! work (a message being handled, a scheduled task executing). Tools bind
//! once, eagerly, on every tier; each completion resolves the tier at call
//! time, so switching tiers mid-turn is O(1) and never re-binds.

use crate::config::{ModelRouterConfig, ProviderConfig};
use crate::error::{LlmError, Result};
use crate::llm::provider::wire_tools;
use crate::llm::{AssistantTurn, ChatMessage, ChatProvider, ToolDefinition};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

tokio::task_local! {
    static ACTIVE_TIER: RefCell<Option<String>>;
}

/// Run `fut` inside a fresh tier scope. The tier set within the scope is
/// dropped with it, so resets happen on every exit path.
pub async fn tier_scope<F: Future>(fut: F) -> F::Output {
    ACTIVE_TIER.scope(RefCell::new(None), fut).await
}

/// Set the active tier for the current scope. No-op outside a scope.
pub fn set_active_tier(tier: &str) {
    let _ = ACTIVE_TIER.try_with(|cell| {
        *cell.borrow_mut() = Some(tier.to_string());
    });
}

/// Clear the active tier for the current scope.
pub fn reset_active_tier() {
    let _ = ACTIVE_TIER.try_with(|cell| {
        *cell.borrow_mut() = None;
    });
}

/// The tier set on the current scope, if any.
pub fn active_tier() -> Option<String> {
    ACTIVE_TIER
        .try_with(|cell| cell.borrow().clone())
        .ok()
        .flatten()
}

/// Multiplexes completions over named tiers.
pub struct TierRouter {
    tiers: HashMap<String, Arc<ChatProvider>>,
    default_tier: String,
}

impl TierRouter {
    /// Build the router from config. When the router section is disabled,
    /// a single default tier is created from the `provider` section so the
    /// rest of the system is tier-agnostic.
    pub fn from_config(router: &ModelRouterConfig, provider: &ProviderConfig) -> Result<Self> {
        let mut tiers = HashMap::new();

        if router.enabled {
            for (name, tier) in &router.tiers {
                let model = ChatProvider::from_tier_config(tier, provider)?;
                tiers.insert(name.clone(), Arc::new(model));
            }
            if !tiers.contains_key(&router.default_tier) {
                return Err(LlmError::UnknownTier(router.default_tier.clone()).into());
            }
            Ok(Self {
                tiers,
                default_tier: router.default_tier.clone(),
            })
        } else {
            let model = ChatProvider::from_provider_config(provider)?;
            tiers.insert(router.default_tier.clone(), Arc::new(model));
            Ok(Self {
                tiers,
                default_tier: router.default_tier.clone(),
            })
        }
    }

    /// Tier names, sorted, for tool allowlists and error messages.
    pub fn tier_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tiers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn default_tier(&self) -> &str {
        &self.default_tier
    }

    /// Bind tools on every tier eagerly. The serialized tool payload is
    /// computed here, once per tier; invocations only resolve the tier and
    /// forward.
    pub fn bind_tools(&self, tools: &[ToolDefinition]) -> BoundRouter {
        let payload = if tools.is_empty() {
            None
        } else {
            Some(Arc::new(wire_tools(tools)))
        };

        let bound = self
            .tiers
            .iter()
            .map(|(name, model)| {
                (
                    name.clone(),
                    BoundTier {
                        model: model.clone(),
                        tools: payload.clone(),
                    },
                )
            })
            .collect();

        BoundRouter {
            tiers: bound,
            default_tier: self.default_tier.clone(),
        }
    }
}

/// One tier with its pre-bound tool payload.
#[derive(Clone)]
struct BoundTier {
    model: Arc<ChatProvider>,
    tools: Option<Arc<Value>>,
}

/// The callable produced by [`TierRouter::bind_tools`]. Each completion
/// reads the task-local tier at that moment and forwards to the pre-bound
/// tier model.
#[derive(Clone)]
pub struct BoundRouter {
    tiers: HashMap<String, BoundTier>,
    default_tier: String,
}

impl BoundRouter {
    /// The tier the next completion would dispatch to: the task-local
    /// value when set and known, the default otherwise.
    pub fn current_tier(&self) -> String {
        match active_tier() {
            Some(tier) if self.tiers.contains_key(&tier) => tier,
            _ => self.default_tier.clone(),
        }
    }

    /// Run one completion on the currently active tier.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<AssistantTurn> {
        let tier = self.current_tier();
        let bound = self
            .tiers
            .get(&tier)
            .ok_or_else(|| LlmError::UnknownTier(tier.clone()))?;

        let annotated = annotate_system(messages, &bound.model.label(), &tier);
        tracing::debug!(tier = %tier, model = %bound.model.label(), "dispatching completion");
        let turn = bound
            .model
            .complete(&annotated, bound.tools.as_deref())
            .await?;
        Ok(turn)
    }
}

/// Return a copy of `messages` with a model/tier note appended to the
/// first system message. The input is never mutated, so repeated calls on
/// the same slice produce exactly one note each.
fn annotate_system(messages: &[ChatMessage], label: &str, tier: &str) -> Vec<ChatMessage> {
    let Some(ChatMessage::System { content }) = messages.first() else {
        return messages.to_vec();
    };

    let note = format!("\n\n[Current model: {label} (tier: {tier})]");
    let mut annotated = messages.to_vec();
    annotated[0] = ChatMessage::System {
        content: format!("{content}{note}"),
    };
    annotated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierConfig;

    fn provider_config() -> ProviderConfig {
        ProviderConfig {
            name: "openai".to_string(),
            model: "gpt-4.1".to_string(),
            api_key: "k".to_string(),
            ..Default::default()
        }
    }

    fn router_config() -> ModelRouterConfig {
        let mut tiers = HashMap::new();
        for (name, model) in [("standard", "gpt-4.1-mini"), ("expert", "gpt-5")] {
            tiers.insert(
                name.to_string(),
                TierConfig {
                    model: model.to_string(),
                    ..Default::default()
                },
            );
        }
        ModelRouterConfig {
            enabled: true,
            default_tier: "standard".to_string(),
            tiers,
        }
    }

    #[test]
    fn builds_every_configured_tier() {
        let router = TierRouter::from_config(&router_config(), &provider_config())
            .expect("router builds");
        assert_eq!(router.tier_names(), vec!["expert", "standard"]);
    }

    #[test]
    fn disabled_router_builds_single_default_tier() {
        let config = ModelRouterConfig::default();
        let router =
            TierRouter::from_config(&config, &provider_config()).expect("router builds");
        assert_eq!(router.tier_names(), vec!["standard"]);
    }

    #[tokio::test]
    async fn dispatch_follows_the_task_local_tier() {
        let router = TierRouter::from_config(&router_config(), &provider_config())
            .expect("router builds");
        let bound = router.bind_tools(&[]);

        tier_scope(async {
            assert_eq!(bound.current_tier(), "standard");

            set_active_tier("expert");
            assert_eq!(bound.current_tier(), "expert");

            // Unknown tiers fall back to the default.
            set_active_tier("galactic");
            assert_eq!(bound.current_tier(), "standard");

            reset_active_tier();
            assert_eq!(bound.current_tier(), "standard");
        })
        .await;
    }

    #[tokio::test]
    async fn tier_does_not_leak_out_of_its_scope() {
        let router = TierRouter::from_config(&router_config(), &provider_config())
            .expect("router builds");
        let bound = router.bind_tools(&[]);

        tier_scope(async {
            set_active_tier("expert");
        })
        .await;

        assert_eq!(bound.current_tier(), "standard");
    }

    #[test]
    fn annotation_appends_one_note_per_call_without_mutating_input() {
        let messages = vec![
            ChatMessage::system("You are Ciana."),
            ChatMessage::user("hi"),
        ];

        let first = annotate_system(&messages, "openai:gpt-5", "expert");
        let second = annotate_system(&messages, "openai:gpt-5", "expert");

        let ChatMessage::System { content } = &first[0] else {
            panic!("first message should stay a system message");
        };
        assert_eq!(content.matches("[Current model:").count(), 1);
        assert!(content.contains("(tier: expert)"));
        assert_eq!(first, second);
        // Original slice untouched.
        assert_eq!(messages[0], ChatMessage::system("You are Ciana."));
    }

    #[test]
    fn annotation_skips_conversations_without_system_message() {
        let messages = vec![ChatMessage::user("hi")];
        let annotated = annotate_system(&messages, "openai:gpt-5", "expert");
        assert_eq!(annotated, messages);
    }
}
