use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Client-to-server frames on the push connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    /// Call a server method
    ///
    /// The server answers with a `completion` frame carrying the same
    /// invocation id.
    Invocation {
        invocation_id: String,
        /// Server method name, e.g. `SubscribeToTrace`
        target: String,
        #[serde(default)]
        arguments: Vec<JsonValue>,
    },

    /// Application-level keepalive
    Ping,
}

impl ClientFrame {
    pub fn invocation(
        invocation_id: impl Into<String>,
        target: impl Into<String>,
        arguments: Vec<JsonValue>,
    ) -> Self {
        Self::Invocation {
            invocation_id: invocation_id.into(),
            target: target.into(),
            arguments,
        }
    }
}
