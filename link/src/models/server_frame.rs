use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Server-to-client frames on the push connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    /// Pushed event, dispatched to listeners registered for `target`
    Event {
        target: String,
        #[serde(default)]
        payload: JsonValue,
    },

    /// Outcome of a client invocation
    Completion {
        invocation_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<JsonValue>,
        /// Present when the server method failed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Application-level keepalive
    Ping,

    /// Server is closing the connection
    Close {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// `false` tells the client not to reconnect automatically
        #[serde(default = "default_allow_reconnect")]
        allow_reconnect: bool,
    },
}

fn default_allow_reconnect() -> bool {
    true
}
