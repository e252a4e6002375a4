//! Callbacks for server-initiated traffic: notifications the server pushes
//! unprompted, and requests the server expects the client to answer.
//!
//! Every method has a default that is a no-op (for notifications) or a
//! well-typed error (for requests) so a caller only has to override what it
//! actually supports, rather than hand-implement a large trait up front.

use async_trait::async_trait;
use serde_json::Value;

use mcpc_protocol::{Error, Result};

#[async_trait]
pub trait Handlers: Send + Sync {
    /// Any message with no id: `notifications/progress`,
    /// `notifications/message`, `notifications/resources/list_changed`,
    /// `notifications/tools/list_changed`, `notifications/prompts/list_changed`,
    /// `notifications/cancelled`, and any future notification the server
    /// sends that this client doesn't have a named handler for.
    async fn on_notification(&self, method: &str, params: Option<Value>) {
        let _ = (method, params);
    }

    /// Answer `roots/list`. An empty list if the client exposes no roots.
    async fn on_roots_list(&self) -> Vec<Value> {
        Vec::new()
    }

    /// Answer `sampling/createMessage`. Only reachable if the client
    /// advertised the `sampling` capability on `initialize`.
    async fn on_sampling_create_message(&self, params: Option<Value>) -> Result<Value> {
        let _ = params;
        Err(Error::UnknownRequest {
            message: "sampling/createMessage has no registered handler".to_string(),
        })
    }

    /// Answer `elicitation/create`. Only reachable if the client advertised
    /// the `elicitation` capability on `initialize`.
    async fn on_elicitation_create(&self, params: Option<Value>) -> Result<Value> {
        let _ = params;
        Err(Error::UnknownRequest {
            message: "elicitation/create has no registered handler".to_string(),
        })
    }
}

/// The default used when a caller supplies no [`Handlers`] impl: silently
/// drops notifications and declines every server-to-client request.
#[derive(Debug, Default)]
pub struct NoopHandlers;

#[async_trait]
impl Handlers for NoopHandlers {}
