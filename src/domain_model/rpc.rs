//! Wire envelopes exchanged over the message bus.
//!
//! A request is published on the topic named after its operation (`course.get`) and the
//! reply comes back on `<operation>.reply`, carrying the same correlation id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

const REPLY_SUFFIX: &str = ".reply";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub uuid::Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        CorrelationId(uuid::Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Topic a reply for `operation` is published on.
pub fn reply_channel_of(operation: &str) -> String {
    format!("{operation}{REPLY_SUFFIX}")
}

/// Downstream domain an operation belongs to: `course.get` -> `course`.
pub fn domain_of(operation: &str) -> &str {
    operation
        .split_once('.')
        .map(|(domain, _)| domain)
        .unwrap_or(operation)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub correlation_id: CorrelationId,
    pub operation: String,
    pub payload: Value,
    pub reply_channel: String,
}

impl RequestEnvelope {
    pub fn new(operation: &str, payload: Value) -> Self {
        RequestEnvelope {
            correlation_id: CorrelationId::new(),
            operation: operation.to_owned(),
            payload,
            reply_channel: reply_channel_of(operation),
        }
    }
}

/// Uniform `{success, data | error}` reply. Domain failures travel as data, not as
/// transport errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ReplyEnvelope {
    pub fn ok(data: Value) -> Self {
        ReplyEnvelope {
            correlation_id: None,
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        ReplyEnvelope {
            correlation_id: None,
            success: false,
            data: None,
            error: Some(error.into()),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn correlated(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// Inbound operation body accepted by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationCall {
    pub operation: String,
    #[serde(default)]
    pub payload: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn domain_is_operation_prefix() {
        assert_eq!(domain_of("course.get"), "course");
        assert_eq!(domain_of("auth.refresh"), "auth");
        assert_eq!(domain_of("health"), "health");
    }

    #[test]
    fn request_envelope_uses_camel_case_on_the_wire() {
        let envelope = RequestEnvelope::new("course.get", json!({ "id": "x" }));
        let wire = serde_json::to_value(&envelope).unwrap();

        assert_eq!(wire["operation"], "course.get");
        assert_eq!(wire["replyChannel"], "course.get.reply");
        assert!(wire["correlationId"].is_string());
    }

    #[test]
    fn reply_envelope_accepts_sparse_replies() {
        let reply: ReplyEnvelope =
            serde_json::from_value(json!({ "success": false, "error": "Course not found" }))
                .unwrap();

        assert!(!reply.success);
        assert_eq!(reply.error.as_deref(), Some("Course not found"));
        assert!(reply.correlation_id.is_none());
        assert!(reply.data.is_none());
    }
}
