//! Client and server capability descriptors.
//!
//! MCP capability objects are sparse: a nested key's mere *presence* is the
//! feature flag, and a `listChanged` (or `subscribe`) sub-flag refines it.
//! Rather than modeling every capability as a distinct typed struct we keep
//! the server's raw object around and expose predicates over it directly.
//! Capability keys a server advertises that we don't yet have a named
//! predicate for are preserved, not discarded.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Capabilities advertised by the server in its `initialize` response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ServerCapabilities {
    raw: Map<String, Value>,
}

fn list_changed(raw: &Map<String, Value>, key: &str) -> bool {
    raw.get(key)
        .and_then(|v| v.get("listChanged"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

impl ServerCapabilities {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(raw) => Self { raw },
            _ => Self::default(),
        }
    }

    pub fn tools_list(&self) -> bool {
        self.raw.contains_key("tools")
    }

    pub fn tools_list_changes(&self) -> bool {
        list_changed(&self.raw, "tools")
    }

    pub fn resources_list(&self) -> bool {
        self.raw.contains_key("resources")
    }

    pub fn resources_list_changes(&self) -> bool {
        list_changed(&self.raw, "resources")
    }

    pub fn resource_subscribe(&self) -> bool {
        self.raw
            .get("resources")
            .and_then(|v| v.get("subscribe"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn prompts_list(&self) -> bool {
        self.raw.contains_key("prompts")
    }

    pub fn prompts_list_changes(&self) -> bool {
        list_changed(&self.raw, "prompts")
    }

    /// The `completions` capability (MCP's `completion/complete` method).
    pub fn completion(&self) -> bool {
        self.raw.contains_key("completions")
    }

    pub fn logging(&self) -> bool {
        self.raw.contains_key("logging")
    }

    /// Access to any capability key not covered by a named predicate above.
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }
}

/// Capabilities the client advertises on `initialize`. Defaults to
/// everything disabled; callers opt in to what they actually implement
/// handlers for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    pub roots: bool,
    pub roots_list_changed: bool,
    pub sampling: bool,
    pub elicitation: bool,
}

impl ClientCapabilities {
    /// Render as the JSON object the `initialize` request expects, omitting
    /// capabilities that are entirely disabled.
    pub fn to_value(self) -> Value {
        let mut map = Map::new();
        if self.roots {
            let mut roots = Map::new();
            if self.roots_list_changed {
                roots.insert("listChanged".to_string(), Value::Bool(true));
            }
            map.insert("roots".to_string(), Value::Object(roots));
        }
        if self.sampling {
            map.insert("sampling".to_string(), Value::Object(Map::new()));
        }
        if self.elicitation {
            map.insert("elicitation".to_string(), Value::Object(Map::new()));
        }
        Value::Object(map)
    }
}

/// `name`/`version` pair identifying either end of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn predicates_read_nested_presence() {
        let caps = ServerCapabilities::from_value(json!({
            "tools": {"listChanged": true},
            "resources": {"subscribe": true, "listChanged": false},
            "prompts": {},
            "logging": {}
        }));

        assert!(caps.tools_list());
        assert!(caps.tools_list_changes());
        assert!(caps.resources_list());
        assert!(caps.resource_subscribe());
        assert!(!caps.resources_list_changes());
        assert!(caps.prompts_list());
        assert!(!caps.prompts_list_changes());
        assert!(!caps.completion());
        assert!(caps.logging());
    }

    #[test]
    fn missing_object_is_all_false() {
        let caps = ServerCapabilities::default();
        assert!(!caps.tools_list());
        assert!(!caps.completion());
    }

    #[test]
    fn client_capabilities_omit_disabled_keys() {
        let caps = ClientCapabilities {
            roots: true,
            roots_list_changed: true,
            sampling: false,
            elicitation: false,
        };
        let value = caps.to_value();
        assert_eq!(value["roots"]["listChanged"], json!(true));
        assert!(value.get("sampling").is_none());
    }
}
