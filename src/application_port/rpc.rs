use crate::domain_model::ReplyEnvelope;
use serde_json::Value;
use std::time::Duration;

fn capitalized(domain: &str) -> String {
    let mut chars = domain.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("{} service timeout", capitalized(.0))]
    Timeout(String),
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),
    #[error("reply channel for {0} was not registered before connect")]
    NotSubscribed(String),
    #[error("bus client is not connected")]
    NotConnected,
    #[error("reply channels cannot be registered after connect")]
    AlreadyConnected,
    #[error("codec error: {0}")]
    Codec(String),
}

impl TransportError {
    /// User-facing label for an unreachable downstream domain.
    pub fn unavailable_message(domain: &str) -> String {
        format!("{} service unavailable", capitalized(domain))
    }
}

/// Gateway side of the bus: one request out, one correlated reply (or an error) back.
#[async_trait::async_trait]
pub trait RpcCaller: Send + Sync {
    async fn call(
        &self,
        operation: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<ReplyEnvelope, TransportError>;
}

/// Failure produced inside a domain handler. Crosses the bus as `{success:false, error}`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{error}")]
pub struct DomainError {
    pub error: String,
    pub message: Option<String>,
}

impl DomainError {
    pub fn new(error: impl Into<String>) -> Self {
        DomainError {
            error: error.into(),
            message: None,
        }
    }
}

impl From<DomainError> for ReplyEnvelope {
    fn from(e: DomainError) -> Self {
        let reply = ReplyEnvelope::err(e.error);
        match e.message {
            Some(message) => reply.with_message(message),
            None => reply,
        }
    }
}

/// Service side of the bus.
#[async_trait::async_trait]
pub trait RpcHandler: Send + Sync {
    /// Operations this handler answers; each becomes a request topic.
    fn operations(&self) -> Vec<String>;

    async fn handle(&self, operation: &str, payload: Value) -> Result<Value, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_labelled_by_domain() {
        let e = TransportError::Timeout("course".into());
        assert_eq!(e.to_string(), "Course service timeout");
        assert_eq!(
            TransportError::unavailable_message("user"),
            "User service unavailable"
        );
    }

    #[test]
    fn domain_error_becomes_failed_envelope() {
        let reply: ReplyEnvelope = DomainError {
            error: "Course not found".into(),
            message: Some("no course with id x".into()),
        }
        .into();

        assert!(!reply.success);
        assert_eq!(reply.error.as_deref(), Some("Course not found"));
        assert_eq!(reply.message.as_deref(), Some("no course with id x"));
    }
}
