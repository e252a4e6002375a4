//! Transport selection. A closed set of three kinds dispatched to their
//! concrete transport at [`crate::builder::ClientBuilder::connect`] time,
//! never an open-ended "custom transport" hook.

use mcpc_transport::{SseConfig, StdioConfig, StreamableHttpConfig};

#[derive(Debug, Clone)]
pub enum TransportKind {
    Stdio(StdioConfig),
    Sse(SseConfig),
    StreamableHttp(StreamableHttpConfig),
}
