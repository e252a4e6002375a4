//! The transport contract shared by stdio, SSE, and Streamable HTTP.

use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use mcpc_protocol::{JsonRpcResult, Result};

/// Default bound on how long a `send(.., wait_for_response: true)` call
/// waits before raising `Error::Timeout`.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Implemented by whatever owns a transport (the coordinator) to receive
/// messages the transport's reader loop cannot resolve against its own
/// pending table: server-initiated notifications and server-initiated
/// requests.
///
/// A transport holds its dispatcher only as a [`Weak`] reference. The
/// coordinator owns the transport, so the reverse edge must not keep the
/// coordinator alive past its own drop. See `Coordinator::new` in
/// `mcpc-client`, which builds the cycle with `Arc::new_cyclic`.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// A message with no id and a method: route to registered notification
    /// handlers (or log at debug if none registered).
    async fn process_notification(&self, result: JsonRpcResult);

    /// A message with both an id and a method: a server-to-client request
    /// (`ping`, `sampling/createMessage`, `roots/list`). The dispatcher is
    /// responsible for sending the reply back over the same transport.
    async fn process_request(&self, result: JsonRpcResult);
}

/// The operation set every MCP wire transport implements.
///
/// Transport polymorphism is treated as a closed set of three
/// implementations dispatched through this trait object, not an open
/// hierarchy. See `mcpc-client::config::TransportKind`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the transport (spawn the child process, open the SSE stream,
    /// etc.) and start its background reader(s). Idempotent only in the
    /// sense that calling `send` before `start` completes is a logic error
    /// in the caller, not something the transport guards against.
    async fn start(&self) -> Result<()>;

    /// Send one JSON-RPC envelope.
    ///
    /// * `add_id`: if true, the transport assigns an id into `envelope`
    ///   before writing it (used for transport-internal bookkeeping
    ///   requests; the coordinator's own requests arrive with an id already
    ///   set and pass `add_id: false`).
    /// * `wait_for_response`: if true, blocks (bounded by `request_timeout`)
    ///   for the paired response; if false, returns as soon as the bytes are
    ///   accepted by the underlying channel.
    async fn send(
        &self,
        envelope: Value,
        add_id: bool,
        wait_for_response: bool,
    ) -> Result<Option<JsonRpcResult>>;

    /// Best-effort liveness check. Does not block on I/O.
    async fn alive(&self) -> bool;

    /// Record the negotiated protocol version so it can be attached to
    /// subsequent requests (Streamable HTTP's `MCP-Protocol-Version` header).
    async fn set_protocol_version(&self, version: String);

    /// Attach the coordinator's dispatch callback. Called once, before
    /// `start`.
    fn set_dispatcher(&self, dispatcher: Weak<dyn Dispatcher>);

    /// Tear down the transport: stop reader loops, close sockets/pipes, and
    /// (Streamable HTTP) terminate the session with a DELETE.
    async fn close(&self) -> Result<()>;
}
