//! Wire transports for an MCP client: child-process stdio, legacy HTTP+SSE,
//! and Streamable HTTP, unified behind one [`Transport`] trait so a
//! coordinator can drive any of them identically.

pub mod core;
pub mod pending;
pub mod reconnect;
pub mod sse;
pub mod sse_frame;
pub mod stdio;
pub mod streamable_http;

pub use core::{Dispatcher, Transport, DEFAULT_REQUEST_TIMEOUT};
pub use pending::PendingTable;
pub use reconnect::ReconnectOptions;
pub use sse::{SseConfig, SseTransport};
pub use sse_frame::{SseByteAccumulator, SseEvent, SseFrameParser};
pub use stdio::{StdioConfig, StdioTransport};
pub use streamable_http::{StreamableHttpConfig, StreamableHttpTransport};
