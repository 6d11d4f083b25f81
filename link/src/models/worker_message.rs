use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::task_kind::TaskKind;

/// Error code a worker attaches when it does not implement a task type.
pub const UNSUPPORTED_TYPE_CODE: &str = "UNSUPPORTED_TYPE";

/// Request posted to the isolated worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub data: Vec<JsonValue>,
    #[serde(default = "empty_object")]
    pub options: JsonValue,
}

fn empty_object() -> JsonValue {
    JsonValue::Object(Default::default())
}

/// How the worker finished a request.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    Completed(JsonValue),
    Failed(String),
    /// The worker has no handler for the requested type.
    Unsupported(String),
}

/// Reply from the isolated worker, tagged with the request id.
///
/// On the wire this is `{id, success, result?, error?, processingTimeMs?, code?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireResponse", try_from = "WireResponse")]
pub struct WorkerResponse {
    pub id: String,
    pub outcome: WorkerOutcome,
    pub processing_time_ms: Option<u64>,
}

impl WorkerResponse {
    pub fn completed(id: impl Into<String>, result: JsonValue) -> Self {
        Self {
            id: id.into(),
            outcome: WorkerOutcome::Completed(result),
            processing_time_ms: None,
        }
    }

    pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outcome: WorkerOutcome::Failed(error.into()),
            processing_time_ms: None,
        }
    }

    pub fn unsupported(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outcome: WorkerOutcome::Unsupported(error.into()),
            processing_time_ms: None,
        }
    }

    pub fn with_processing_time_ms(mut self, ms: u64) -> Self {
        self.processing_time_ms = Some(ms);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    id: String,
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    processing_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl From<WorkerResponse> for WireResponse {
    fn from(response: WorkerResponse) -> Self {
        let (success, result, error, code) = match response.outcome {
            WorkerOutcome::Completed(value) => (true, Some(value), None, None),
            WorkerOutcome::Failed(message) => (false, None, Some(message), None),
            WorkerOutcome::Unsupported(message) => (
                false,
                None,
                Some(message),
                Some(UNSUPPORTED_TYPE_CODE.to_string()),
            ),
        };
        Self {
            id: response.id,
            success,
            result,
            error,
            processing_time_ms: response.processing_time_ms,
            code,
        }
    }
}

impl TryFrom<WireResponse> for WorkerResponse {
    type Error = String;

    fn try_from(wire: WireResponse) -> Result<Self, Self::Error> {
        let outcome = if wire.success {
            WorkerOutcome::Completed(wire.result.unwrap_or(JsonValue::Null))
        } else {
            let message = wire
                .error
                .unwrap_or_else(|| "worker reported failure without a message".to_string());
            match wire.code.as_deref() {
                Some(UNSUPPORTED_TYPE_CODE) => WorkerOutcome::Unsupported(message),
                _ => WorkerOutcome::Failed(message),
            }
        };
        if wire.id.is_empty() {
            return Err("worker response is missing its id".to_string());
        }
        Ok(Self {
            id: wire.id,
            outcome,
            processing_time_ms: wire.processing_time_ms,
        })
    }
}
