//! The session coordinator: owns the transport, drives the `initialize`
//! handshake, and routes everything that isn't a direct response to one of
//! its own requests back out to a [`Handlers`] implementation.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex as TokioMutex;
use tracing::warn;

use mcpc_protocol::{
    is_supported, ClientCapabilities, Error, Implementation, JsonRpcErrorObject, JsonRpcResult,
    OutgoingNotification, OutgoingRequest, OutgoingResponse, RequestId, Result, ServerCapabilities,
    DEFAULT_PROTOCOL_VERSION,
};
use mcpc_transport::{Dispatcher, Transport};

use crate::handlers::Handlers;
use crate::ids::IdAllocator;

/// Re-derive the wire `id` type (number vs. string) from its normalized
/// string form so a reply to a server-initiated request echoes back in the
/// same shape the server sent it in.
fn wire_request_id(id: &str) -> RequestId {
    match id.parse::<i64>() {
        Ok(n) => RequestId::Number(n),
        Err(_) => RequestId::String(id.to_string()),
    }
}

pub struct Coordinator {
    transport: Arc<dyn Transport>,
    ids: IdAllocator,
    client_info: Implementation,
    client_capabilities: ClientCapabilities,
    handlers: Arc<dyn Handlers>,
    protocol_version: TokioMutex<Option<String>>,
    server_capabilities: TokioMutex<Option<ServerCapabilities>>,
    server_info: TokioMutex<Option<Implementation>>,
}

impl Coordinator {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        client_info: Implementation,
        client_capabilities: ClientCapabilities,
        handlers: Arc<dyn Handlers>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref: &Weak<Coordinator>| {
            let dispatcher: Weak<dyn Dispatcher> = self_ref.clone();
            transport.set_dispatcher(dispatcher);
            Self {
                transport,
                ids: IdAllocator::new(),
                client_info,
                client_capabilities,
                handlers,
                protocol_version: TokioMutex::new(None),
                server_capabilities: TokioMutex::new(None),
                server_info: TokioMutex::new(None),
            }
        })
    }

    /// Start the transport and run the `initialize` handshake: send
    /// `initialize`, verify the server's protocol version is one we
    /// support, record its capabilities, hand the negotiated version to the
    /// transport (Streamable HTTP's `MCP-Protocol-Version` header), then
    /// send `notifications/initialized`.
    pub async fn initialize(&self) -> Result<Implementation> {
        self.transport.start().await?;

        let params = json!({
            "protocolVersion": DEFAULT_PROTOCOL_VERSION,
            "capabilities": self.client_capabilities.to_value(),
            "clientInfo": {
                "name": self.client_info.name,
                "version": self.client_info.version,
            },
        });
        let response = self.request("initialize", Some(params)).await?;
        let value = response
            .result
            .ok_or_else(|| Error::transport("initialize response carried no result"))?;

        let version = value
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if !is_supported(&version) {
            return Err(Error::invalid_protocol_version(version));
        }

        let capabilities =
            ServerCapabilities::from_value(value.get("capabilities").cloned().unwrap_or(Value::Null));
        let server_info: Implementation = match value.get("serverInfo").cloned() {
            Some(v) => serde_json::from_value(v)
                .map_err(|e| Error::transport(format!("malformed serverInfo: {e}")))?,
            None => Implementation {
                name: "unknown".to_string(),
                version: "unknown".to_string(),
            },
        };

        *self.protocol_version.lock().await = Some(version.clone());
        *self.server_capabilities.lock().await = Some(capabilities);
        *self.server_info.lock().await = Some(server_info.clone());
        self.transport.set_protocol_version(version).await;

        self.notify("notifications/initialized", None).await?;
        Ok(server_info)
    }

    pub async fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.server_capabilities.lock().await.clone()
    }

    pub async fn server_info(&self) -> Option<Implementation> {
        self.server_info.lock().await.clone()
    }

    pub async fn alive(&self) -> bool {
        self.transport.alive().await
    }

    /// Send `notifications/cancelled` for an in-flight request this caller
    /// no longer wants the result of. Does not remove the corresponding
    /// pending-table entry directly; the transport still owns that. This
    /// only informs the server.
    pub async fn cancel(&self, request_id: impl Into<String>, reason: Option<String>) -> Result<()> {
        let mut params = json!({ "requestId": request_id.into() });
        if let Some(reason) = reason {
            params["reason"] = Value::String(reason);
        }
        self.notify("notifications/cancelled", Some(params)).await
    }

    pub async fn close(&self) -> Result<()> {
        self.transport.close().await
    }

    pub(crate) async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResult> {
        let id = self.ids.next();
        let envelope = OutgoingRequest::new(RequestId::Number(id as i64), method, params);
        let value = serde_json::to_value(&envelope)
            .map_err(|e| Error::transport(format!("failed to serialize request: {e}")))?;

        let response = self
            .transport
            .send(value, false, true)
            .await?
            .ok_or_else(|| Error::transport("transport returned no response for a request awaiting one"))?;

        if let Some(error) = &response.error {
            return Err(Error::from_jsonrpc(error));
        }
        Ok(response)
    }

    pub(crate) async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let envelope = OutgoingNotification::new(method, params);
        let value = serde_json::to_value(&envelope)
            .map_err(|e| Error::transport(format!("failed to serialize notification: {e}")))?;
        self.transport.send(value, false, false).await?;
        Ok(())
    }

    async fn respond_ok(&self, id: Option<String>, result: Value) {
        self.respond(id, Ok(result)).await;
    }

    async fn respond_err(&self, id: Option<String>, code: i64, message: String) {
        self.respond(id, Err((code, message))).await;
    }

    async fn respond(&self, id: Option<String>, outcome: std::result::Result<Value, (i64, String)>) {
        let Some(id) = id else {
            warn!("cannot answer a server-initiated request with no id");
            return;
        };
        let request_id = wire_request_id(&id);
        let envelope = match outcome {
            Ok(result) => OutgoingResponse::success(request_id, result),
            Err((code, message)) => {
                OutgoingResponse::failure(request_id, JsonRpcErrorObject { code, message, data: None })
            }
        };
        let value = match serde_json::to_value(&envelope) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to serialize response to server-initiated request");
                return;
            }
        };
        if let Err(e) = self.transport.send(value, false, false).await {
            warn!(error = %e, "failed to send response to server-initiated request");
        }
    }
}

#[async_trait]
impl Dispatcher for Coordinator {
    async fn process_notification(&self, result: JsonRpcResult) {
        let method = result.method.clone().unwrap_or_default();
        self.handlers.on_notification(&method, result.params.clone()).await;
    }

    async fn process_request(&self, result: JsonRpcResult) {
        let id = result.id.clone();
        match result.method.as_deref().unwrap_or_default() {
            "ping" => self.respond_ok(id, json!({})).await,
            "roots/list" => {
                let roots = self.handlers.on_roots_list().await;
                self.respond_ok(id, json!({ "roots": roots })).await;
            }
            "sampling/createMessage" => {
                match self.handlers.on_sampling_create_message(result.params.clone()).await {
                    Ok(value) => self.respond_ok(id, value).await,
                    Err(e) => self.respond_err(id, -32601, e.to_string()).await,
                }
            }
            "elicitation/create" => {
                match self.handlers.on_elicitation_create(result.params.clone()).await {
                    Ok(value) => self.respond_ok(id, value).await,
                    Err(e) => self.respond_err(id, -32601, e.to_string()).await,
                }
            }
            other => {
                warn!(method = other, "dropping unknown server-to-client request");
                self.respond_err(id, -32601, format!("unknown method: {other}")).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use crate::handlers::NoopHandlers;

    /// In-memory stand-in for a wire transport: answers `send` out of a
    /// method-keyed response table instead of touching a process or socket,
    /// and remembers every envelope it was asked to send so tests can
    /// inspect what the coordinator actually wrote.
    struct MockTransport {
        dispatcher: StdMutex<Option<Weak<dyn Dispatcher>>>,
        sent: StdMutex<Vec<Value>>,
        responses: StdMutex<HashMap<String, Value>>,
    }

    impl MockTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                dispatcher: StdMutex::new(None),
                sent: StdMutex::new(Vec::new()),
                responses: StdMutex::new(HashMap::new()),
            })
        }

        fn set_response(&self, method: &str, result: Value) {
            self.responses.lock().unwrap().insert(method.to_string(), result);
        }

        fn sent_methods(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter_map(|v| v.get("method").and_then(Value::as_str).map(str::to_string))
                .collect()
        }

        fn dispatcher(&self) -> Arc<dyn Dispatcher> {
            self.dispatcher.lock().unwrap().as_ref().unwrap().upgrade().unwrap()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn start(&self) -> Result<()> {
            Ok(())
        }

        async fn send(
            &self,
            envelope: Value,
            _add_id: bool,
            wait_for_response: bool,
        ) -> Result<Option<JsonRpcResult>> {
            self.sent.lock().unwrap().push(envelope.clone());
            if !wait_for_response {
                return Ok(None);
            }
            let method = envelope.get("method").and_then(Value::as_str).unwrap_or_default();
            let id = envelope.get("id").cloned().unwrap_or(Value::Null);
            let result = self
                .responses
                .lock()
                .unwrap()
                .get(method)
                .cloned()
                .unwrap_or(json!({}));
            let response = json!({ "jsonrpc": "2.0", "id": id, "result": result });
            Ok(Some(JsonRpcResult::from_value(response, None).unwrap()))
        }

        async fn alive(&self) -> bool {
            true
        }

        async fn set_protocol_version(&self, _version: String) {}

        fn set_dispatcher(&self, dispatcher: Weak<dyn Dispatcher>) {
            *self.dispatcher.lock().unwrap() = Some(dispatcher);
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn new_coordinator(mock: &Arc<MockTransport>) -> Arc<Coordinator> {
        let transport: Arc<dyn Transport> = mock.clone();
        Coordinator::new(
            transport,
            Implementation { name: "test-client".to_string(), version: "0.1.0".to_string() },
            ClientCapabilities::default(),
            Arc::new(NoopHandlers),
        )
    }

    #[tokio::test]
    async fn initialize_populates_capabilities_and_server_info() {
        let mock = MockTransport::new();
        mock.set_response(
            "initialize",
            json!({
                "protocolVersion": DEFAULT_PROTOCOL_VERSION,
                "capabilities": {"tools": {"listChanged": true}},
                "serverInfo": {"name": "fake-server", "version": "9.9.9"},
            }),
        );
        let coordinator = new_coordinator(&mock);

        let info = coordinator.initialize().await.unwrap();
        assert_eq!(info.name, "fake-server");

        let caps = coordinator.server_capabilities().await.unwrap();
        assert!(caps.tools_list());
        assert!(caps.tools_list_changes());

        assert_eq!(
            mock.sent_methods(),
            vec!["initialize".to_string(), "notifications/initialized".to_string()]
        );
    }

    #[tokio::test]
    async fn initialize_rejects_unsupported_protocol_version() {
        let mock = MockTransport::new();
        mock.set_response(
            "initialize",
            json!({ "protocolVersion": "1999-01-01", "capabilities": {} }),
        );
        let coordinator = new_coordinator(&mock);
        let err = coordinator.initialize().await.unwrap_err();
        assert!(matches!(err, Error::InvalidProtocolVersion { .. }));
    }

    #[tokio::test]
    async fn completion_complete_is_gated_on_capability() {
        let mock = MockTransport::new();
        mock.set_response(
            "initialize",
            json!({ "protocolVersion": DEFAULT_PROTOCOL_VERSION, "capabilities": {} }),
        );
        let coordinator = new_coordinator(&mock);
        coordinator.initialize().await.unwrap();

        let err = coordinator
            .completion_complete(json!({"type": "ref/prompt", "name": "x"}), json!({"name": "a", "value": "b"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CompletionNotAvailable { .. }));
    }

    #[tokio::test]
    async fn dispatcher_answers_ping_and_roots_list() {
        let mock = MockTransport::new();
        mock.set_response(
            "initialize",
            json!({ "protocolVersion": DEFAULT_PROTOCOL_VERSION, "capabilities": {} }),
        );
        let coordinator = new_coordinator(&mock);
        coordinator.initialize().await.unwrap();

        let dispatcher = mock.dispatcher();
        dispatcher
            .process_request(
                JsonRpcResult::from_value(json!({"jsonrpc":"2.0","id":42,"method":"ping"}), None)
                    .unwrap(),
            )
            .await;

        let sent = mock.sent.lock().unwrap();
        let reply = sent.last().unwrap();
        assert_eq!(reply["id"], json!(42));
        assert_eq!(reply["result"], json!({}));
    }

    #[tokio::test]
    async fn dispatcher_rejects_unknown_server_request() {
        let mock = MockTransport::new();
        mock.set_response(
            "initialize",
            json!({ "protocolVersion": DEFAULT_PROTOCOL_VERSION, "capabilities": {} }),
        );
        let coordinator = new_coordinator(&mock);
        coordinator.initialize().await.unwrap();

        let dispatcher = mock.dispatcher();
        dispatcher
            .process_request(
                JsonRpcResult::from_value(
                    json!({"jsonrpc":"2.0","id":"abc","method":"not/a/real/method"}),
                    None,
                )
                .unwrap(),
            )
            .await;

        let sent = mock.sent.lock().unwrap();
        let reply = sent.last().unwrap();
        assert_eq!(reply["id"], json!("abc"));
        assert_eq!(reply["error"]["code"], json!(-32601));
    }
}
