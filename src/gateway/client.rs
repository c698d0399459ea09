//! Async HTTP client for the host gateway.
//!
//! Ordinary failures never raise: every call returns a `GatewayResult`
//! whose `error` field carries transport and policy problems.

use serde_json::{Value, json};
use std::time::Duration;

/// Extra headroom on the HTTP timeout over the subprocess timeout.
const HTTP_TIMEOUT_MARGIN_SECS: u64 = 10;

/// Result of a gateway command execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayResult {
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
    pub error: String,
}

impl GatewayResult {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Self::default()
        }
    }
}

/// Typed async RPC to the gateway server.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
            token,
        }
    }

    /// Execute a command via the gateway.
    ///
    /// `timeout` is the subprocess timeout in seconds; 0 leaves both the
    /// subprocess and the HTTP request unbounded on the client side.
    pub async fn execute(
        &self,
        bridge: &str,
        cmd: &[String],
        cwd: Option<&str>,
        timeout: u64,
    ) -> GatewayResult {
        let mut payload = json!({
            "bridge": bridge,
            "cmd": cmd,
            "timeout": timeout,
        });
        if let Some(cwd) = cwd {
            payload["cwd"] = json!(cwd);
        }

        let mut request = self
            .http
            .post(format!("{}/execute", self.base_url))
            .json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if timeout > 0 {
            request = request.timeout(Duration::from_secs(timeout + HTTP_TIMEOUT_MARGIN_SECS));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) if error.is_connect() => {
                return GatewayResult::failed(
                    "Cannot connect to host gateway. Is the gateway server running?",
                );
            }
            Err(error) if error.is_timeout() => {
                return GatewayResult::failed("Gateway request timed out.");
            }
            Err(error) => {
                tracing::warn!(%error, "gateway request failed");
                return GatewayResult::failed(format!("Gateway error: {error}"));
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return GatewayResult::failed("Gateway auth failed. Check the gateway token.");
        }
        if status == reqwest::StatusCode::FORBIDDEN {
            let body: Value = response.json().await.unwrap_or_default();
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("Forbidden (403)");
            return GatewayResult::failed(message);
        }
        if !status.is_success() {
            return GatewayResult::failed(format!("Gateway returned HTTP {}", status.as_u16()));
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(error) => {
                return GatewayResult::failed(format!("Gateway error: {error}"));
            }
        };

        GatewayResult {
            stdout: body
                .get("stdout")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            stderr: body
                .get("stderr")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            returncode: body
                .get("returncode")
                .and_then(Value::as_i64)
                .unwrap_or(0) as i32,
            error: String::new(),
        }
    }

    /// Check gateway health. Returns `(ok, response_body)`.
    pub async fn health(&self) -> (bool, Value) {
        let mut request = self
            .http
            .get(format!("{}/health", self.base_url))
            .timeout(Duration::from_secs(10));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                (true, response.json().await.unwrap_or_default())
            }
            Ok(response) => (
                false,
                json!({"error": format!("HTTP {}", response.status().as_u16())}),
            ),
            Err(error) if error.is_connect() => {
                (false, json!({"error": "Cannot connect to host gateway"}))
            }
            Err(error) => (false, json!({"error": error.to_string()})),
        }
    }
}
