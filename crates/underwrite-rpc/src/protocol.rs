//! Wire format spoken between the coordinator and its workers.
//!
//! Every message is one line of JSON. The coordinator sends [`Request`]s and
//! the worker answers each with a [`Response`] carrying the same `id`.
//! Responses may arrive in any order.

use serde::{Deserialize, Serialize};
use tokio_util::codec::LinesCodec;

use underwrite_core::error::{Result, UnderwriteError};
use underwrite_core::schema::CapabilitySchema;

/// Reserved capability name of the discovery request.
pub const DESCRIBE: &str = "$describe";

/// Longest accepted frame, in bytes.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Codec used on both ends of a worker connection.
pub fn frame_codec() -> LinesCodec {
    LinesCodec::new_with_max_length(MAX_FRAME_BYTES)
}

/// A call sent to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub capability: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// A worker's answer to one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: String,
    pub message: String,
}

/// Result of the discovery request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handshake {
    pub capabilities: Vec<CapabilitySchema>,
}

impl Response {
    pub fn ok(id: u64, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(ErrorPayload {
                kind: kind.into(),
                message: message.into(),
            }),
        }
    }

    /// Convert into the caller-facing result of a call to `capability`.
    pub fn into_result(self, capability: &str) -> Result<serde_json::Value> {
        match (self.result, self.error) {
            (_, Some(err)) => Err(UnderwriteError::RpcExecution {
                capability: capability.to_string(),
                kind: err.kind,
                message: err.message,
            }),
            (Some(result), None) => Ok(result),
            (None, None) => Err(UnderwriteError::Protocol(format!(
                "response {} to {} carries neither result nor error",
                self.id, capability
            ))),
        }
    }
}
