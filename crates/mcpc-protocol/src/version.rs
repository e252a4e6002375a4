//! Protocol version negotiation.

/// Default protocol version proposed on `initialize`.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-03-26";

/// Versions this client is able to speak. The server's `initialize` response
/// must echo one of these or the coordinator raises
/// [`crate::Error::InvalidProtocolVersion`].
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-03-26", "2024-11-05"];

pub fn is_supported(version: &str) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
}
