//! Host gateway: process-isolated command execution behind an
//! authenticated HTTP surface.
//!
//! The server runs on the host (`ciana-gateway`); the client is used by
//! the `host_execute` tool from the agent process.

pub mod client;
pub mod server;

pub use client::{GatewayClient, GatewayResult};

use serde::{Deserialize, Serialize};

/// Reply body for a completed (or expectedly failed) execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteReply {
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
}

/// Exit code reported when the requested command does not exist.
pub const RETURNCODE_NOT_FOUND: i32 = 127;

/// Exit code reported when the subprocess hit its timeout.
pub const RETURNCODE_TIMEOUT: i32 = -1;
