//! Wire-level types for an MCP client: the JSON-RPC envelope, the parsed
//! [`JsonRpcResult`] view over incoming messages, the client/server
//! capability descriptors, protocol version negotiation, and the closed
//! error taxonomy that every fallible operation in the workspace returns.
//!
//! This crate has no async runtime dependency and no transport knowledge.
//! It is pure data modeling, shared by `mcpc-transport` and `mcpc-client`.

pub mod capabilities;
pub mod envelope;
pub mod error;
pub mod result;
pub mod version;

pub use capabilities::{ClientCapabilities, Implementation, ServerCapabilities};
pub use envelope::{
    JsonRpcErrorObject, JsonRpcVersion, OutgoingNotification, OutgoingRequest, OutgoingResponse,
    RequestId, JSONRPC_VERSION,
};
pub use error::{Error, Result};
pub use result::JsonRpcResult;
pub use version::{is_supported, DEFAULT_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS};
