//! Closed error taxonomy.
//!
//! Every externally raised error maps to exactly one of these variants.
//! There is deliberately no catch-all "Other" arm: new failure modes get a
//! new named variant, not a string stuffed into an existing one.

use serde_json::Value;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Clone)]
pub enum Error {
    /// All I/O, framing, HTTP status, and content-type violations.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        code: Option<i32>,
    },

    /// A request exceeded `request_timeout` before a response arrived.
    #[error("request timed out{}", request_id.as_ref().map(|id| format!(" (id={id})")).unwrap_or_default())]
    Timeout { request_id: Option<String> },

    /// Streamable HTTP returned 404 on an established session.
    #[error("session expired: {message}")]
    SessionExpired { message: String },

    /// The server's negotiated protocol version is not one we support.
    #[error("invalid protocol version: {message}")]
    InvalidProtocolVersion { message: String },

    /// The server sent a server-to-client method we do not implement.
    /// Logged, never propagated to a caller.
    #[error("unknown request method: {message}")]
    UnknownRequest { message: String },

    /// A capability-gated operation was invoked but the server did not
    /// advertise the capability.
    #[error("completion not available: {message}")]
    CompletionNotAvailable { message: String },

    /// A required prompt argument was missing locally.
    #[error("prompt argument error: {message}")]
    PromptArgumentError { message: String },

    /// Configuration error raised at construction time.
    #[error("invalid transport type: {message}")]
    InvalidTransportType { message: String },

    /// A JSON-RPC error envelope returned by the server.
    #[error("MCP error {code}: {message}")]
    Mcp {
        code: i64,
        message: String,
        data: Option<Value>,
    },
}

impl Error {
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
            code: None,
        }
    }

    pub fn transport_with_code(message: impl Into<String>, code: i32) -> Self {
        Error::Transport {
            message: message.into(),
            code: Some(code),
        }
    }

    pub fn timeout(request_id: impl Into<String>) -> Self {
        Error::Timeout {
            request_id: Some(request_id.into()),
        }
    }

    pub fn session_expired(message: impl Into<String>) -> Self {
        Error::SessionExpired {
            message: message.into(),
        }
    }

    pub fn invalid_protocol_version(message: impl Into<String>) -> Self {
        Error::InvalidProtocolVersion {
            message: message.into(),
        }
    }

    pub fn from_jsonrpc(error: &crate::envelope::JsonRpcErrorObject) -> Self {
        Error::Mcp {
            code: error.code,
            message: error.message.clone(),
            data: error.data.clone(),
        }
    }
}
