//! Typed request helpers layered over [`Coordinator::request`].
//!
//! Thin wrappers: build the `params` object the method expects, unwrap
//! `result`. Capability gating is only applied where the closed error
//! taxonomy names a specific variant for it (`completion/complete`); every
//! other method is sent as-is and lets the server answer with its own
//! `-32601` if it doesn't support it.

use serde_json::{json, Value};

use mcpc_protocol::{Error, Result};

use crate::coordinator::Coordinator;

impl Coordinator {
    pub async fn ping(&self) -> Result<()> {
        self.request("ping", None).await?;
        Ok(())
    }

    pub async fn tools_list(&self) -> Result<Value> {
        Ok(self.request("tools/list", None).await?.result.unwrap_or(Value::Null))
    }

    pub async fn tools_call(&self, name: impl Into<String>, arguments: Option<Value>) -> Result<Value> {
        let params = json!({ "name": name.into(), "arguments": arguments });
        Ok(self.request("tools/call", Some(params)).await?.result.unwrap_or(Value::Null))
    }

    pub async fn resources_list(&self) -> Result<Value> {
        Ok(self.request("resources/list", None).await?.result.unwrap_or(Value::Null))
    }

    pub async fn resources_read(&self, uri: impl Into<String>) -> Result<Value> {
        let params = json!({ "uri": uri.into() });
        Ok(self.request("resources/read", Some(params)).await?.result.unwrap_or(Value::Null))
    }

    pub async fn resources_subscribe(&self, uri: impl Into<String>) -> Result<()> {
        let params = json!({ "uri": uri.into() });
        self.request("resources/subscribe", Some(params)).await?;
        Ok(())
    }

    pub async fn prompts_list(&self) -> Result<Value> {
        Ok(self.request("prompts/list", None).await?.result.unwrap_or(Value::Null))
    }

    pub async fn prompts_get(&self, name: impl Into<String>, arguments: Option<Value>) -> Result<Value> {
        if let Some(args) = &arguments {
            if !args.is_object() {
                return Err(Error::PromptArgumentError {
                    message: "prompt arguments must be a JSON object".to_string(),
                });
            }
        }
        let params = json!({ "name": name.into(), "arguments": arguments });
        Ok(self.request("prompts/get", Some(params)).await?.result.unwrap_or(Value::Null))
    }

    /// `completion/complete`. Gated on the server's advertised `completions`
    /// capability: without it the server has no handler to call and would
    /// just answer `-32601`, so this fails locally instead.
    pub async fn completion_complete(&self, reference: Value, argument: Value) -> Result<Value> {
        let supported = self
            .server_capabilities()
            .await
            .map(|c| c.completion())
            .unwrap_or(false);
        if !supported {
            return Err(Error::CompletionNotAvailable {
                message: "server did not advertise the completions capability".to_string(),
            });
        }
        let params = json!({ "ref": reference, "argument": argument });
        Ok(self.request("completion/complete", Some(params)).await?.result.unwrap_or(Value::Null))
    }

    pub async fn logging_set_level(&self, level: impl Into<String>) -> Result<()> {
        let params = json!({ "level": level.into() });
        self.request("logging/setLevel", Some(params)).await?;
        Ok(())
    }
}
