//! Parsed view over an incoming JSON-RPC message.
//!
//! Every byte a transport reads off the wire is turned into a
//! [`JsonRpcResult`] before it reaches the coordinator. The type deliberately
//! does not attempt to decide "response vs. request vs. notification" at
//! parse time the way a tagged enum would, since MCP servers are not always
//! strict about shape. Classification is exposed as pure predicates over
//! whatever fields were present instead.

use serde::Deserialize;
use serde_json::Value;

use crate::envelope::JsonRpcErrorObject;

/// Raw wire shape, accepting any combination of fields so malformed or
/// partial messages can still be classified rather than rejected outright.
#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
}

/// An immutable, parsed view over a decoded JSON-RPC message.
///
/// `id` is normalized to its string form purely for comparison
/// (`matching_id`); the original wire representation (number or string) is
/// never reconstructed from a `JsonRpcResult` and is not needed once a
/// message has been routed.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcResult {
    pub id: Option<String>,
    pub method: Option<String>,
    pub params: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<JsonRpcErrorObject>,
    /// Present only when the transport that produced this result carries a
    /// session identifier (Streamable HTTP).
    pub session_id: Option<String>,
}

fn normalize_id(raw: Option<Value>) -> Option<String> {
    match raw {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(other) => Some(other.to_string()),
    }
}

impl JsonRpcResult {
    /// Parse a decoded JSON-RPC message. `session_id` is supplied by the
    /// transport out of band (it is never a wire field of the envelope
    /// itself).
    pub fn parse(raw: &[u8], session_id: Option<String>) -> Result<Self, serde_json::Error> {
        let raw: RawMessage = serde_json::from_slice(raw)?;
        Ok(Self::from_raw(raw, session_id))
    }

    /// Parse from an already-decoded [`serde_json::Value`].
    pub fn from_value(value: Value, session_id: Option<String>) -> Result<Self, serde_json::Error> {
        let raw: RawMessage = serde_json::from_value(value)?;
        Ok(Self::from_raw(raw, session_id))
    }

    fn from_raw(raw: RawMessage, session_id: Option<String>) -> Self {
        Self {
            id: normalize_id(raw.id),
            method: raw.method,
            params: raw.params,
            result: raw.result,
            error: raw.error,
            session_id,
        }
    }

    /// No id, has a method: a notification.
    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.is_some()
    }

    /// Has both an id and a method: a server-initiated request.
    pub fn is_request(&self) -> bool {
        self.id.is_some() && self.method.is_some()
    }

    /// Has an id, no method, and carries a result or an error: a response to
    /// one of our own requests.
    pub fn is_response(&self) -> bool {
        self.id.is_some() && self.method.is_none() && (self.result.is_some() || self.error.is_some())
    }

    /// `method == "ping"`. A ping is a [`Self::is_request`] special case, not
    /// a fourth exclusive kind.
    pub fn is_ping(&self) -> bool {
        self.method.as_deref() == Some("ping")
    }

    /// True when none of notification/request/response hold: a message the
    /// transport could parse but the coordinator has no shape for (e.g. a
    /// bare `{"jsonrpc":"2.0"}` or a batch array element we don't support).
    pub fn is_unknown(&self) -> bool {
        !self.is_notification() && !self.is_request() && !self.is_response()
    }

    /// Compares `id` against `other` after coercing both to their string
    /// form, matching the wire-level equivalence of `7` and `"7"`.
    pub fn matching_id(&self, other: impl std::fmt::Display) -> bool {
        match &self.id {
            Some(id) => *id == other.to_string(),
            None => false,
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    /// Build an arbitrary well-formed envelope out of independently-chosen
    /// id/method/result/error presence, then check the invariants the
    /// specification pins down for every combination: exactly one of
    /// {response, request, notification, unknown} holds, and repeated calls
    /// to each predicate never change their answer (no hidden mutation).
    fn envelope(has_id: bool, has_method: bool, has_result: bool, has_error: bool) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("jsonrpc".to_string(), Value::String("2.0".to_string()));
        if has_id {
            map.insert("id".to_string(), Value::from(1));
        }
        if has_method {
            map.insert("method".to_string(), Value::String("tools/list".to_string()));
        }
        if has_result {
            map.insert("result".to_string(), Value::Object(Default::default()));
        }
        if has_error {
            map.insert(
                "error".to_string(),
                serde_json::json!({"code": -32600, "message": "bad"}),
            );
        }
        Value::Object(map)
    }

    proptest! {
        #[test]
        fn classification_is_exclusive_and_stable(
            has_id in any::<bool>(),
            has_method in any::<bool>(),
            has_result in any::<bool>(),
            has_error in any::<bool>(),
        ) {
            let value = envelope(has_id, has_method, has_result, has_error);
            let r = JsonRpcResult::from_value(value, None).unwrap();

            let kinds = [r.is_response(), r.is_request(), r.is_notification()];
            prop_assert!(kinds.iter().filter(|k| **k).count() <= 1);
            prop_assert_eq!(r.is_unknown(), kinds.iter().all(|k| !k));

            // Predicates are pure: calling them again yields the same answer.
            prop_assert_eq!(r.is_response(), r.is_response());
            prop_assert_eq!(r.is_request(), r.is_request());
            prop_assert_eq!(r.is_notification(), r.is_notification());
            prop_assert_eq!(r.is_ping(), r.is_ping());
        }

        #[test]
        fn matching_id_is_numeric_string_coercion_invariant(id in 0i64..1_000_000) {
            let numeric = JsonRpcResult::from_value(
                serde_json::json!({"jsonrpc":"2.0","id":id,"result":{}}),
                None,
            ).unwrap();
            let stringy = JsonRpcResult::from_value(
                serde_json::json!({"jsonrpc":"2.0","id":id.to_string(),"result":{}}),
                None,
            ).unwrap();

            prop_assert!(numeric.matching_id(id));
            prop_assert!(numeric.matching_id(id.to_string()));
            prop_assert!(stringy.matching_id(id));
            prop_assert!(!numeric.matching_id(id + 1));
        }
    }
}
