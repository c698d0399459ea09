//! Top-level error types for Ciana.

use std::sync::Arc;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: Arc<std::io::Error>,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Document store and task log errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("failed to write {path}: {message}")]
    Write { path: String, message: String },

    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// LLM provider and tier-router errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("unknown tier: {0}")]
    UnknownTier(String),

    #[error("provider request failed: {0}")]
    ProviderRequest(String),

    #[error("missing API key for provider: {0}")]
    MissingProviderKey(String),

    #[error("completion failed: {0}")]
    CompletionFailed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Host gateway errors (server side).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway token is not configured")]
    MissingToken,

    #[error("failed to bind gateway listener on {addr}: {message}")]
    Bind { addr: String, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Agent invocation errors.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent produced no response")]
    EmptyResponse,

    #[error("checkpoint load failed for thread {thread_id}: {message}")]
    Checkpoint { thread_id: String, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Channel adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel {name} failed to start: {message}")]
    Start { name: String, message: String },

    #[error("send failed on channel {name}: {message}")]
    Send { name: String, message: String },

    #[error("unknown channel: {0}")]
    Unknown(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
