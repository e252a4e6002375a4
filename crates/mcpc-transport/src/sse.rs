//! Legacy HTTP+SSE transport.
//!
//! Two endpoints: a GET event stream that the server speaks SSE over, and a
//! separately announced POST "messages" URL discovered from the stream's
//! first `event: endpoint` frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex as TokioMutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

use mcpc_protocol::{Error, JsonRpcResult, Result};

use crate::core::{Dispatcher, Transport, DEFAULT_REQUEST_TIMEOUT};
use crate::pending::PendingTable;
use crate::sse_frame::SseByteAccumulator;

#[derive(Debug, Clone)]
pub struct SseConfig {
    pub event_url: Url,
    pub headers: Vec<(String, String)>,
    pub request_timeout: Duration,
}

impl SseConfig {
    pub fn new(event_url: Url) -> Self {
        Self {
            event_url,
            headers: Vec::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

pub struct SseTransport {
    config: SseConfig,
    client: Client,
    messages_url: TokioMutex<Option<Url>>,
    endpoint_tx: TokioMutex<Option<oneshot::Sender<Url>>>,
    pending: Arc<PendingTable>,
    dispatcher: std::sync::Mutex<Option<Weak<dyn Dispatcher>>>,
    running: AtomicBool,
    self_ref: Weak<Self>,
}

impl SseTransport {
    pub fn new(config: SseConfig) -> Arc<Self> {
        let client = Client::builder()
            .build()
            .expect("reqwest client construction with no custom TLS config cannot fail");
        Arc::new_cyclic(|self_ref| Self {
            config,
            client,
            messages_url: TokioMutex::new(None),
            endpoint_tx: TokioMutex::new(None),
            pending: Arc::new(PendingTable::new()),
            dispatcher: std::sync::Mutex::new(None),
            running: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        })
    }

    fn dispatcher(&self) -> Option<Weak<dyn Dispatcher>> {
        self.dispatcher.lock().unwrap().clone()
    }

    fn headers(&self) -> reqwest::header::HeaderMap {
        let mut map = reqwest::header::HeaderMap::new();
        for (k, v) in &self.config.headers {
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(k.as_bytes()),
                reqwest::header::HeaderValue::from_str(v),
            ) {
                map.insert(name, value);
            }
        }
        map
    }

    fn resolve_messages_url(&self, data: &str) -> Result<Url> {
        match Url::parse(data) {
            Ok(url) => Ok(url),
            Err(_) => self
                .config
                .event_url
                .join(data)
                .map_err(|e| Error::transport(format!("invalid messages URL `{data}`: {e}"))),
        }
    }

    async fn open_stream(&self) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(self.config.event_url.clone())
            .headers(self.headers())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| Error::transport(format!("failed to open SSE stream: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::transport(format!(
                "SSE stream returned HTTP {}",
                response.status()
            )));
        }
        Ok(response)
    }

    async fn consume_stream(self: &Arc<Self>, response: reqwest::Response) {
        let mut acc = SseByteAccumulator::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            match chunk {
                Ok(bytes) => {
                    for event in acc.feed(&bytes) {
                        self.handle_event(event).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "SSE stream read error");
                    return;
                }
            }
        }
    }

    async fn handle_event(&self, event: crate::sse_frame::SseEvent) {
        if event.event.as_deref() == Some("endpoint") {
            let Some(data) = event.data else {
                debug!("dropping endpoint frame with no data");
                return;
            };
            let resolved = match self.resolve_messages_url(&data) {
                Ok(url) => url,
                Err(e) => {
                    warn!(error = %e, "failed to resolve messages URL");
                    return;
                }
            };
            if let Some(tx) = self.endpoint_tx.lock().await.take() {
                let _ = tx.send(resolved);
            } else {
                *self.messages_url.lock().await = Some(resolved);
            }
            return;
        }

        let Some(data) = event.data else {
            debug!("dropping SSE frame with no data (likely a partial write)");
            return;
        };
        let result = match JsonRpcResult::parse(data.as_bytes(), None) {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, data, "dropping unparseable SSE payload");
                return;
            }
        };

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

    fn spawn_listener(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while this.running.load(Ordering::SeqCst) {
                match this.open_stream().await {
                    Ok(response) => this.consume_stream(response).await,
                    Err(e) => warn!(error = %e, "failed to establish SSE stream"),
                }
                if !this.running.load(Ordering::SeqCst) {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn start(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        *self.endpoint_tx.lock().await = Some(tx);
        self.running.store(true, Ordering::SeqCst);

        let this = self
            .self_ref
            .upgrade()
            .expect("transport outlives its own start() call");
        this.spawn_listener();

        let url = timeout(self.config.request_timeout, rx)
            .await
            .map_err(|_| Error::timeout("endpoint"))?
            .map_err(|_| Error::transport("SSE transport closed before the endpoint handshake"))?;
        info!(%url, "resolved SSE messages URL");
        *self.messages_url.lock().await = Some(url);
        Ok(())
    }

    async fn send(
        &self,
        envelope: Value,
        _add_id: bool,
        wait_for_response: bool,
    ) -> Result<Option<JsonRpcResult>> {
        let messages_url = self
            .messages_url
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::transport("SSE messages URL not yet resolved"))?;

        let id_string = envelope.get("id").map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });

        let rx = if wait_for_response {
            let id = id_string
                .clone()
                .ok_or_else(|| Error::transport("wait_for_response requires an id"))?;
            Some(self.pending.register(id).await)
        } else {
            None
        };

        let post_result = self
            .client
            .post(messages_url)
            .headers(self.headers())
            .json(&envelope)
            .send()
            .await;

        if let Err(e) = post_result {
            if let Some(id) = &id_string {
                self.pending.remove(id).await;
            }
            return Err(Error::transport(format!("failed to POST message: {e}")));
        }

        match rx {
            None => Ok(None),
            Some(rx) => {
                let id = id_string.expect("checked above");
                match timeout(self.config.request_timeout, rx).await {
                    Ok(Ok(result)) => Ok(Some(result)),
                    Ok(Err(_)) => Err(Error::transport("SSE stream closed before a reply arrived")),
                    Err(_) => {
                        self.pending.remove(&id).await;
                        Err(Error::timeout(id))
                    }
                }
            }
        }
    }

    async fn alive(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn set_protocol_version(&self, _version: String) {
        // Legacy SSE predates MCP-Protocol-Version; negotiated purely
        // through the initialize request/response bodies.
    }

    fn set_dispatcher(&self, dispatcher: Weak<dyn Dispatcher>) {
        *self.dispatcher.lock().unwrap() = Some(dispatcher);
    }

    async fn close(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        self.pending.clear().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn endpoint_discovery_resolves_relative_url() {
        let server = MockServer::start().await;
        let body = "event: endpoint\ndata: /messages/abc\n\n";
        Mock::given(method("GET"))
            .and(path("/events"))
            .and(header("accept", "text/event-stream"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(body, "text/event-stream")
                    .append_header("content-type", "text/event-stream"),
            )
            .mount(&server)
            .await;

        let event_url = Url::parse(&format!("{}/events", server.uri())).unwrap();
        let mut config = SseConfig::new(event_url);
        config.request_timeout = Duration::from_secs(2);
        let transport = SseTransport::new(config);

        transport.start().await.unwrap();
        let resolved = transport.messages_url.lock().await.clone().unwrap();
        assert_eq!(resolved.path(), "/messages/abc");
        transport.close().await.unwrap();
    }
}
