//! Streamable HTTP transport.
//!
//! A single POST endpoint carries every client-to-server message. The
//! server's response decides how the reply travels: a plain JSON body, an
//! inline SSE stream carrying the reply plus any number of notifications, or
//! (for notifications) a bodiless 202. A session id handed back on the first
//! response round-trips on every subsequent request; losing it (404) ends the
//! session. An optional standalone GET stream carries server-initiated
//! traffic between requests, resumed with `Last-Event-ID` and governed by the
//! same backoff policy as legacy SSE.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::sync::Mutex as TokioMutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use mcpc_protocol::{Error, JsonRpcResult, Result};

use crate::core::{Dispatcher, Transport, DEFAULT_REQUEST_TIMEOUT};
use crate::pending::PendingTable;
use crate::reconnect::ReconnectOptions;
use crate::sse_frame::{SseByteAccumulator, SseEvent};

const SESSION_HEADER: &str = "mcp-session-id";
const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";
const LAST_EVENT_ID_HEADER: &str = "last-event-id";
const CLIENT_ID_HEADER: &str = "x-client-id";

#[derive(Debug, Clone)]
pub struct StreamableHttpConfig {
    pub endpoint_url: Url,
    pub headers: Vec<(String, String)>,
    pub request_timeout: Duration,
    pub reconnect: ReconnectOptions,
    /// Whether to keep a standalone GET SSE stream open for server-initiated
    /// traffic between requests. Some servers respond 405 to this; that is
    /// not an error, it just means the server only ever replies in-band.
    pub open_listen_stream: bool,
}

impl StreamableHttpConfig {
    pub fn new(endpoint_url: Url) -> Self {
        Self {
            endpoint_url,
            headers: Vec::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect: ReconnectOptions::default(),
            open_listen_stream: true,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

pub struct StreamableHttpTransport {
    config: StreamableHttpConfig,
    client: Client,
    client_id: String,
    session_id: TokioMutex<Option<String>>,
    protocol_version: TokioMutex<Option<String>>,
    last_event_id: TokioMutex<Option<String>>,
    pending: Arc<PendingTable>,
    dispatcher: std::sync::Mutex<Option<Weak<dyn Dispatcher>>>,
    running: AtomicBool,
    listen_stream_started: AtomicBool,
    self_ref: Weak<Self>,
}

impl StreamableHttpTransport {
    pub fn new(config: StreamableHttpConfig) -> Arc<Self> {
        let client = Client::builder()
            .build()
            .expect("reqwest client construction with no custom TLS config cannot fail");
        Arc::new_cyclic(|self_ref| Self {
            config,
            client,
            client_id: Uuid::new_v4().to_string(),
            session_id: TokioMutex::new(None),
            protocol_version: TokioMutex::new(None),
            last_event_id: TokioMutex::new(None),
            pending: Arc::new(PendingTable::new()),
            dispatcher: std::sync::Mutex::new(None),
            running: AtomicBool::new(false),
            listen_stream_started: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        })
    }

    /// Spawn the standalone listen stream at most once per session, whether
    /// triggered eagerly at `start()` or lazily by a 202 on `initialize`.
    fn spawn_listen_stream_once(self: &Arc<Self>) {
        if self.listen_stream_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.open_listen_stream().await;
        });
    }

    fn dispatcher(&self) -> Option<Weak<dyn Dispatcher>> {
        self.dispatcher.lock().unwrap().clone()
    }

    async fn base_headers(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in &self.config.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(v),
            ) {
                map.insert(name, value);
            }
        }
        if let Ok(value) = HeaderValue::from_str(&self.client_id) {
            map.insert(HeaderName::from_static(CLIENT_ID_HEADER), value);
        }
        if let Some(session) = self.session_id.lock().await.clone() {
            if let Ok(value) = HeaderValue::from_str(&session) {
                map.insert(HeaderName::from_static(SESSION_HEADER), value);
            }
        }
        if let Some(version) = self.protocol_version.lock().await.clone() {
            if let Ok(value) = HeaderValue::from_str(&version) {
                map.insert(HeaderName::from_static(PROTOCOL_VERSION_HEADER), value);
            }
        }
        map
    }

    async fn capture_session_id(&self, response: &reqwest::Response) {
        if let Some(value) = response.headers().get(SESSION_HEADER) {
            if let Ok(s) = value.to_str() {
                *self.session_id.lock().await = Some(s.to_string());
            }
        }
    }

    /// Route one decoded JSON-RPC envelope to either the pending table or
    /// the attached dispatcher, exactly as the reader loops of the other two
    /// transports do.
    async fn route(&self, result: JsonRpcResult) {
        if result.is_response() {
            if let Some(id) = &result.id {
                self.pending.complete(id, result.clone()).await;
            }
            return;
        }
        let Some(dispatcher) = self.dispatcher().and_then(|d| d.upgrade()) else {
            debug!("dropping message: no dispatcher attached");
            return;
        };
        if result.is_notification() {
            dispatcher.process_notification(result).await;
        } else if result.is_request() {
            dispatcher.process_request(result).await;
        }
    }

    async fn consume_sse_body(&self, response: reqwest::Response) {
        let mut acc = SseByteAccumulator::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    for event in acc.feed(&bytes) {
                        self.handle_sse_event(event).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "SSE body read error");
                    return;
                }
            }
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    async fn handle_sse_event(&self, event: SseEvent) {
        if let Some(id) = &event.id {
            *self.last_event_id.lock().await = Some(id.clone());
        }
        let Some(data) = event.data else {
            return;
        };
        match JsonRpcResult::parse(data.as_bytes(), self.session_id.lock().await.clone()) {
            Ok(result) => self.route(result).await,
            Err(e) => debug!(error = %e, "dropping unparseable SSE payload"),
        }
    }

    /// The decision table for a POST response.
    async fn handle_post_response(
        self: &Arc<Self>,
        envelope_id: Option<String>,
        is_initialize: bool,
        response: reqwest::Response,
    ) -> Result<Option<JsonRpcResult>> {
        self.capture_session_id(&response).await;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        match status {
            StatusCode::OK if content_type.starts_with("application/json") => {
                let session = self.session_id.lock().await.clone();
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| Error::transport(format!("failed reading response body: {e}")))?;
                let result = JsonRpcResult::parse(&body, session)?;
                if let Some(id) = &envelope_id {
                    self.pending.remove(id).await;
                }
                Ok(Some(result))
            }
            StatusCode::OK if content_type.starts_with("text/event-stream") => {
                self.consume_sse_body(response).await;
                Ok(None)
            }
            StatusCode::ACCEPTED if is_initialize => {
                self.spawn_listen_stream_once();
                Ok(None)
            }
            StatusCode::ACCEPTED => Ok(None),
            // Caller policy decides what to do about an unauthorized request;
            // this transport does not treat it as fatal.
            StatusCode::UNAUTHORIZED => Ok(None),
            StatusCode::NOT_FOUND => Err(Error::session_expired(
                "server no longer recognizes this session",
            )),
            StatusCode::METHOD_NOT_ALLOWED => Ok(None),
            StatusCode::BAD_REQUEST => {
                let body = response.text().await.unwrap_or_default();
                if body.to_lowercase().contains("session") {
                    let session = self.session_id.lock().await.clone().unwrap_or_default();
                    Err(Error::transport_with_code(
                        format!("{body} (current session id: {session})"),
                        400,
                    ))
                } else {
                    Err(Error::transport_with_code(body, 400))
                }
            }
            StatusCode::OK => Err(Error::transport("Unexpected content type")),
            s if s.is_server_error() => Err(Error::transport_with_code(
                format!("server error: {s}"),
                s.as_u16() as i32,
            )),
            s => Err(Error::transport_with_code(
                format!("unexpected status: {s}"),
                s.as_u16() as i32,
            )),
        }
    }

    async fn open_listen_stream(self: &Arc<Self>) {
        let mut attempt = 0u32;
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            let mut headers = self.base_headers().await;
            headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
            if let Some(last_id) = self.last_event_id.lock().await.clone() {
                if let Ok(value) = HeaderValue::from_str(&last_id) {
                    headers.insert(HeaderName::from_static(LAST_EVENT_ID_HEADER), value);
                }
            }

            let result = self
                .client
                .get(self.config.endpoint_url.clone())
                .headers(headers)
                .send()
                .await;

            match result {
                Ok(response) if response.status() == StatusCode::METHOD_NOT_ALLOWED => {
                    info!("server does not support a standalone SSE listen stream");
                    return;
                }
                Ok(response) if response.status().is_success() => {
                    attempt = 0;
                    self.capture_session_id(&response).await;
                    self.consume_sse_body(response).await;
                }
                Ok(response) => {
                    warn!(status = %response.status(), "listen stream rejected");
                }
                Err(e) => {
                    warn!(error = %e, "failed to open listen stream");
                }
            }

            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            if !self.config.reconnect.should_retry(attempt) {
                warn!("listen stream exhausted its reconnect budget");
                return;
            }
            tokio::time::sleep(self.config.reconnect.delay(attempt)).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn start(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        if self.config.open_listen_stream {
            let this = self
                .self_ref
                .upgrade()
                .expect("transport outlives its own start() call");
            this.spawn_listen_stream_once();
        }
        Ok(())
    }

    async fn send(
        &self,
        envelope: Value,
        _add_id: bool,
        wait_for_response: bool,
    ) -> Result<Option<JsonRpcResult>> {
        let envelope_id = envelope.get("id").map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        let is_initialize = envelope.get("method").and_then(Value::as_str) == Some("initialize");

        let mut pending_rx = None;
        if wait_for_response {
            if let Some(id) = &envelope_id {
                pending_rx = Some(self.pending.register(id.clone()).await);
            }
        }

        let mut headers = self.base_headers().await;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );

        let response = self
            .client
            .post(self.config.endpoint_url.clone())
            .headers(headers)
            .json(&envelope)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                if let Some(id) = &envelope_id {
                    self.pending.remove(id).await;
                }
                return Err(Error::transport(format!("POST failed: {e}")));
            }
        };

        let this = self
            .self_ref
            .upgrade()
            .expect("transport outlives its own send() call");
        match this
            .handle_post_response(envelope_id.clone(), is_initialize, response)
            .await
        {
            Ok(Some(result)) => Ok(Some(result)),
            Ok(None) => match pending_rx {
                None => Ok(None),
                Some(rx) => {
                    let id = envelope_id.expect("wait_for_response requires an id");
                    match timeout(self.config.request_timeout, rx).await {
                        Ok(Ok(result)) => Ok(Some(result)),
                        Ok(Err(_)) => {
                            Err(Error::transport("stream closed before a reply arrived"))
                        }
                        Err(_) => {
                            self.pending.remove(&id).await;
                            Err(Error::timeout(id))
                        }
                    }
                }
            },
            Err(e) => {
                if let Some(id) = &envelope_id {
                    self.pending.remove(id).await;
                }
                Err(e)
            }
        }
    }

    async fn alive(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn set_protocol_version(&self, version: String) {
        *self.protocol_version.lock().await = Some(version);
    }

    fn set_dispatcher(&self, dispatcher: Weak<dyn Dispatcher>) {
        *self.dispatcher.lock().unwrap() = Some(dispatcher);
    }

    async fn close(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(session) = self.session_id.lock().await.clone() {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(&session) {
                headers.insert(HeaderName::from_static(SESSION_HEADER), value);
            }
            match self
                .client
                .delete(self.config.endpoint_url.clone())
                .headers(headers)
                .send()
                .await
            {
                Ok(response)
                    if response.status() == StatusCode::OK
                        || response.status() == StatusCode::METHOD_NOT_ALLOWED => {}
                Ok(response) => warn!(status = %response.status(), "session termination rejected"),
                Err(e) => warn!(error = %e, "failed to send session termination DELETE"),
            }
        }
        self.pending.clear().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn json_response_round_trip_and_session_capture() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .insert_header("mcp-session-id", "abc-123")
                    .set_body_json(serde_json::json!({"jsonrpc":"2.0","id":"1","result":{"ok":true}})),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/mcp", server.uri())).unwrap();
        let mut config = StreamableHttpConfig::new(url);
        config.open_listen_stream = false;
        let transport = StreamableHttpTransport::new(config);
        transport.start().await.unwrap();

        let envelope = serde_json::json!({"jsonrpc":"2.0","id":"1","method":"ping"});
        let result = transport.send(envelope, false, true).await.unwrap().unwrap();
        assert!(result.is_response());
        assert_eq!(transport.session_id.lock().await.as_deref(), Some("abc-123"));
    }

    #[tokio::test]
    async fn not_found_maps_to_session_expired() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/mcp", server.uri())).unwrap();
        let mut config = StreamableHttpConfig::new(url);
        config.open_listen_stream = false;
        let transport = StreamableHttpTransport::new(config);
        transport.start().await.unwrap();

        let envelope = serde_json::json!({"jsonrpc":"2.0","id":"1","method":"ping"});
        let err = transport.send(envelope, false, true).await.unwrap_err();
        assert!(matches!(err, Error::SessionExpired { .. }));
    }

    /// Initialize captures `mcp-session-id`, then a 404 on the next request
    /// surfaces `SessionExpiredError` without silently discarding the
    /// session id the error is meant to let the caller act on.
    struct FirstCallInitializesThenExpires {
        calls: std::sync::atomic::AtomicU32,
    }

    impl wiremock::Respond for FirstCallInitializesThenExpires {
        fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .insert_header("mcp-session-id", "S1")
                    .set_body_json(serde_json::json!({
                        "jsonrpc":"2.0","id":"1",
                        "result":{"protocolVersion":"2025-03-26","capabilities":{}}
                    }))
            } else {
                ResponseTemplate::new(404)
            }
        }
    }

    #[tokio::test]
    async fn session_expiry_does_not_clear_the_session_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(FirstCallInitializesThenExpires {
                calls: std::sync::atomic::AtomicU32::new(0),
            })
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/mcp", server.uri())).unwrap();
        let mut config = StreamableHttpConfig::new(url);
        config.open_listen_stream = false;
        let transport = StreamableHttpTransport::new(config);
        transport.start().await.unwrap();

        let init = serde_json::json!({"jsonrpc":"2.0","id":"1","method":"initialize"});
        transport.send(init, false, true).await.unwrap();
        assert_eq!(transport.session_id.lock().await.as_deref(), Some("S1"));

        let list = serde_json::json!({"jsonrpc":"2.0","id":"2","method":"tools/list"});
        let err = transport.send(list, false, true).await.unwrap_err();
        assert!(matches!(err, Error::SessionExpired { .. }));
        assert_eq!(transport.session_id.lock().await.as_deref(), Some("S1"));
    }

    #[tokio::test]
    async fn accepted_notification_returns_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/mcp", server.uri())).unwrap();
        let mut config = StreamableHttpConfig::new(url);
        config.open_listen_stream = false;
        let transport = StreamableHttpTransport::new(config);
        transport.start().await.unwrap();

        let envelope =
            serde_json::json!({"jsonrpc":"2.0","method":"notifications/initialized"});
        let result = transport.send(envelope, false, false).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn accepted_initialize_opens_listen_stream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/mcp"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/mcp", server.uri())).unwrap();
        let mut config = StreamableHttpConfig::new(url);
        config.open_listen_stream = false;
        let transport = StreamableHttpTransport::new(config);
        transport.start().await.unwrap();

        let envelope = serde_json::json!({"jsonrpc":"2.0","id":"1","method":"initialize"});
        let result = transport.send(envelope, false, false).await.unwrap();
        assert!(result.is_none());
        assert!(transport.listen_stream_started.load(Ordering::SeqCst));
        // Let the spawned task observe the 405 and exit cleanly.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn every_request_carries_a_stable_client_id_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_json(serde_json::json!({"jsonrpc":"2.0","id":"1","result":{}})),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/mcp", server.uri())).unwrap();
        let mut config = StreamableHttpConfig::new(url);
        config.open_listen_stream = false;
        let transport = StreamableHttpTransport::new(config);
        transport.start().await.unwrap();

        let headers_first = transport.base_headers().await;
        let client_id = headers_first
            .get(CLIENT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();
        assert!(!client_id.is_empty());

        let envelope = serde_json::json!({"jsonrpc":"2.0","id":"1","method":"ping"});
        transport.send(envelope, false, true).await.unwrap();

        let headers_second = transport.base_headers().await;
        assert_eq!(
            headers_second.get(CLIENT_ID_HEADER).and_then(|v| v.to_str().ok()),
            Some(client_id.as_str())
        );
    }
}
