//! Fluent construction of a [`Coordinator`], mirroring the builder pattern
//! used throughout this workspace's transport configs.

use std::sync::Arc;
use std::time::Duration;

use mcpc_protocol::{ClientCapabilities, Error, Implementation, Result};
use mcpc_transport::{
    SseTransport, StdioTransport, StreamableHttpTransport, Transport, DEFAULT_REQUEST_TIMEOUT,
};

use crate::config::TransportKind;
use crate::coordinator::Coordinator;
use crate::handlers::{Handlers, NoopHandlers};

pub struct ClientBuilder {
    client_info: Implementation,
    client_capabilities: ClientCapabilities,
    transport: Option<TransportKind>,
    handlers: Option<Arc<dyn Handlers>>,
    request_timeout: Duration,
}

impl ClientBuilder {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            client_info: Implementation {
                name: name.into(),
                version: version.into(),
            },
            client_capabilities: ClientCapabilities::default(),
            transport: None,
            handlers: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn stdio(mut self, config: mcpc_transport::StdioConfig) -> Self {
        self.transport = Some(TransportKind::Stdio(config));
        self
    }

    pub fn sse(mut self, config: mcpc_transport::SseConfig) -> Self {
        self.transport = Some(TransportKind::Sse(config));
        self
    }

    pub fn streamable_http(mut self, config: mcpc_transport::StreamableHttpConfig) -> Self {
        self.transport = Some(TransportKind::StreamableHttp(config));
        self
    }

    pub fn capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.client_capabilities = capabilities;
        self
    }

    pub fn handlers(mut self, handlers: Arc<dyn Handlers>) -> Self {
        self.handlers = Some(handlers);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build the selected transport, run `initialize`, and hand back a
    /// ready-to-use coordinator. The transport is started as part of this
    /// call, not deferred.
    pub async fn connect(self) -> Result<Arc<Coordinator>> {
        let transport: Arc<dyn Transport> = match self.transport.ok_or_else(|| {
            Error::InvalidTransportType {
                message: "no transport configured; call .stdio(), .sse(), or .streamable_http()"
                    .to_string(),
            }
        })? {
            TransportKind::Stdio(mut config) => {
                config.request_timeout = self.request_timeout;
                StdioTransport::new(config)
            }
            TransportKind::Sse(mut config) => {
                config.request_timeout = self.request_timeout;
                SseTransport::new(config)
            }
            TransportKind::StreamableHttp(mut config) => {
                config.request_timeout = self.request_timeout;
                StreamableHttpTransport::new(config)
            }
        };

        let handlers = self.handlers.unwrap_or_else(|| Arc::new(NoopHandlers));
        let coordinator = Coordinator::new(
            transport,
            self.client_info,
            self.client_capabilities,
            handlers,
        );
        coordinator.initialize().await?;
        Ok(coordinator)
    }
}
