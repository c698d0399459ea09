//! Gateway server: allowlisted host-command execution with auth.
//!
//! Every `/execute` request passes bearer auth (constant-time), a body
//! size cap, bridge + command-basename allowlists, and working-directory
//! containment before a subprocess is spawned. Commands run without a
//! shell; the argument list is executed directly.

use crate::config::{GATEWAY_MAX_TIMEOUT_SECS, GatewayConfig};
use crate::error::{GatewayError, Result};
use crate::gateway::{ExecuteReply, RETURNCODE_NOT_FOUND, RETURNCODE_TIMEOUT};
use axum::Json;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};
use sha2::{Digest as _, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq as _;
use tower_http::cors::{Any, CorsLayer};

/// Maximum accepted request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Immutable policy for one bridge.
#[derive(Debug, Clone)]
pub struct BridgePolicy {
    allowed_commands: HashSet<String>,
    allowed_cwd: Vec<PathBuf>,
}

/// Shared server state: the token digest and the allowlist maps. All of
/// it is immutable after load, so request handlers share freely.
#[derive(Debug)]
pub struct GatewayState {
    token_hash: [u8; 32],
    bridges: HashMap<String, BridgePolicy>,
    default_timeout: u64,
}

impl GatewayState {
    /// Build server state from config. A missing token is a fatal
    /// configuration error: the gateway never runs open.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        if config.token.is_empty() {
            return Err(GatewayError::MissingToken.into());
        }

        let bridges = config
            .bridges
            .iter()
            .map(|(name, bridge)| {
                (
                    name.clone(),
                    BridgePolicy {
                        allowed_commands: bridge.allowed_commands.iter().cloned().collect(),
                        allowed_cwd: bridge.allowed_cwd.clone(),
                    },
                )
            })
            .collect();

        Ok(Self {
            token_hash: Sha256::digest(config.token.as_bytes()).into(),
            bridges,
            default_timeout: config.default_timeout,
        })
    }

    fn bridge_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bridges.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Build the gateway router.
pub fn router(state: Arc<GatewayState>) -> axum::Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // axum's built-in body limit would reject oversized requests before
    // the handler runs, with a plain-text body. The handler enforces the
    // cap itself so every rejection keeps the JSON error shape.
    axum::Router::new()
        .route("/health", get(health))
        .route("/execute", post(execute))
        .fallback(not_found)
        .layer(DefaultBodyLimit::disable())
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    state: Arc<GatewayState>,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|error| GatewayError::Bind {
            addr: addr.clone(),
            message: error.to_string(),
        })?;

    tracing::info!(%addr, bridges = ?state.bridge_names(), "gateway listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|error| GatewayError::Other(error.into()))?;
    Ok(())
}

async fn health(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "bridges": state.bridge_names(),
    }))
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "not found")
}

async fn execute(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !check_auth(&headers, &state.token_hash) {
        return error_response(StatusCode::UNAUTHORIZED, "unauthorized");
    }

    if body.len() > MAX_BODY_BYTES {
        return error_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
    }

    let Ok(request) = serde_json::from_slice::<Value>(&body) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid JSON");
    };

    let bridge_name = match request.get("bridge").and_then(Value::as_str) {
        Some(name) if !name.is_empty() => name,
        _ => return error_response(StatusCode::BAD_REQUEST, "missing 'bridge' field"),
    };
    let Some(bridge) = state.bridges.get(bridge_name) else {
        return error_response(StatusCode::FORBIDDEN, format!("unknown bridge: {bridge_name}"));
    };

    let cmd: Vec<String> = request
        .get("cmd")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    if cmd.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "missing cmd");
    }

    let basename = Path::new(&cmd[0])
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    if !bridge.allowed_commands.contains(&basename) {
        return error_response(
            StatusCode::FORBIDDEN,
            format!("command '{basename}' not allowed for bridge '{bridge_name}'"),
        );
    }

    let cwd = request.get("cwd").and_then(Value::as_str);
    let effective_cwd = match cwd {
        Some(cwd) => match validate_cwd(cwd, &bridge.allowed_cwd).await {
            Ok(resolved) => Some(resolved),
            Err(message) => return error_response(StatusCode::FORBIDDEN, message),
        },
        None => None,
    };

    let requested_timeout = request
        .get("timeout")
        .map(coerce_timeout)
        .unwrap_or(0);
    let effective_timeout = effective_timeout(requested_timeout, state.default_timeout);

    run_command(&cmd, effective_cwd.as_deref(), effective_timeout).await
}

/// Constant-time bearer-token check. Tokens are compared as SHA-256
/// digests so the comparison length never depends on the input.
fn check_auth(headers: &HeaderMap, expected_hash: &[u8; 32]) -> bool {
    let provided = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .unwrap_or("");
    let provided_hash = Sha256::digest(provided.as_bytes());
    bool::from(provided_hash.ct_eq(expected_hash.as_slice()))
}

/// Resolve `cwd` and require it to equal or sit strictly under one of the
/// bridge's allowed roots, after symlink resolution on both sides.
async fn validate_cwd(cwd: &str, allowed: &[PathBuf]) -> std::result::Result<PathBuf, String> {
    let resolved = tokio::fs::canonicalize(cwd)
        .await
        .map_err(|_| format!("cwd not allowed: {cwd}"))?;

    for root in allowed {
        let Ok(root) = tokio::fs::canonicalize(root).await else {
            continue;
        };
        if resolved.starts_with(&root) {
            return Ok(resolved);
        }
    }
    Err(format!("cwd not allowed: {cwd}"))
}

/// Coerce the wire value to whole seconds; negatives become 0.
fn coerce_timeout(value: &Value) -> u64 {
    let seconds = value
        .as_i64()
        .or_else(|| value.as_f64().map(|v| v as i64))
        .unwrap_or(0);
    seconds.max(0) as u64
}

/// 0 means the server default; anything above the cap is clamped.
fn effective_timeout(requested: u64, default: u64) -> u64 {
    let timeout = if requested == 0 { default } else { requested };
    timeout.min(GATEWAY_MAX_TIMEOUT_SECS)
}

async fn run_command(cmd: &[String], cwd: Option<&Path>, timeout_secs: u64) -> Response {
    let mut command = tokio::process::Command::new(&cmd[0]);
    command
        .args(&cmd[1..])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env_remove("CLAUDE_CODE")
        .env_remove("CLAUDECODE")
        .kill_on_drop(true);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }

    let output = if timeout_secs > 0 {
        match tokio::time::timeout(Duration::from_secs(timeout_secs), command.output()).await {
            Ok(output) => output,
            Err(_) => {
                tracing::warn!(command = %cmd[0], timeout_secs, "gateway command timed out");
                return reply(ExecuteReply {
                    stdout: String::new(),
                    stderr: "Command timed out".to_string(),
                    returncode: RETURNCODE_TIMEOUT,
                });
            }
        }
    } else {
        command.output().await
    };

    match output {
        Ok(output) => reply(ExecuteReply {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            returncode: output.status.code().unwrap_or(-1),
        }),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => reply(ExecuteReply {
            stdout: String::new(),
            stderr: format!("Command '{}' not found on host. Install it first.", cmd[0]),
            returncode: RETURNCODE_NOT_FOUND,
        }),
        Err(error) => {
            tracing::error!(command = %cmd[0], %error, "gateway spawn failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
    }
}

fn reply(body: ExecuteReply) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

fn error_response(code: StatusCode, message: impl Into<String>) -> Response {
    (code, Json(json!({"error": message.into()}))).into_response()
}
