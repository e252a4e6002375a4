//! MCP session coordinator.
//!
//! Wraps one [`mcpc_transport::Transport`] with the `initialize` handshake,
//! typed request helpers, and dispatch of server-initiated notifications and
//! requests back out to a [`Handlers`] implementation. Construct one with
//! [`ClientBuilder`].

pub mod builder;
pub mod config;
pub mod coordinator;
pub mod handlers;
pub mod ids;
pub mod requests;

pub use builder::ClientBuilder;
pub use config::TransportKind;
pub use coordinator::Coordinator;
pub use handlers::{Handlers, NoopHandlers};
pub use ids::IdAllocator;
