//! A request against a server that never answers must fail with
//! `Error::Timeout` well within a small bound, and the transport must still
//! be usable afterwards (the pending entry does not linger and block a
//! later request reusing, or not reusing, the same id).

use std::sync::Arc;
use std::time::{Duration, Instant};

use mcpc_protocol::Error;
use mcpc_transport::{StdioConfig, StdioTransport, Transport};
use serde_json::json;

#[tokio::test]
async fn request_timeout_is_raised_and_cleaned_up() {
    // `sleep` never writes anything to stdout, so any request awaiting a
    // reply against it can only resolve by timing out.
    let mut config = StdioConfig::new("sleep").arg("5");
    config.request_timeout = Duration::from_millis(100);
    let transport: Arc<StdioTransport> = StdioTransport::new(config);
    transport.start().await.unwrap();

    let envelope = json!({"jsonrpc":"2.0","id":42,"method":"tools/call","params":{}});
    let started = Instant::now();
    let err = transport.send(envelope, false, true).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_millis(500));
    match err {
        Error::Timeout { request_id } => assert_eq!(request_id.as_deref(), Some("42")),
        other => panic!("expected a timeout error, got {other:?}"),
    }

    // A later request is not blocked by the orphaned entry from the timed
    // out call.
    let envelope = json!({"jsonrpc":"2.0","method":"notifications/cancelled","params":{"requestId":"42"}});
    transport.send(envelope, false, false).await.unwrap();

    transport.close().await.unwrap();
}
