use crate::application_port::*;
use crate::domain_model::*;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Per-domain call budgets, falling back to one default.
#[derive(Debug, Clone)]
pub struct DispatchTimeouts {
    pub default: Duration,
    pub per_domain: HashMap<String, Duration>,
}

impl DispatchTimeouts {
    pub fn uniform(default: Duration) -> Self {
        Self {
            default,
            per_domain: HashMap::new(),
        }
    }

    pub fn for_domain(&self, domain: &str) -> Duration {
        self.per_domain.get(domain).copied().unwrap_or(self.default)
    }
}

/// Turns an inbound call into one bus request and always answers with an envelope.
pub struct RpcDispatcher {
    caller: Arc<dyn RpcCaller>,
    timeouts: DispatchTimeouts,
}

impl RpcDispatcher {
    pub fn new(caller: Arc<dyn RpcCaller>, timeouts: DispatchTimeouts) -> Self {
        RpcDispatcher { caller, timeouts }
    }

    pub async fn dispatch(&self, operation: &str, payload: Value) -> ReplyEnvelope {
        let domain = domain_of(operation);
        let timeout = self.timeouts.for_domain(domain);

        match self.caller.call(operation, payload, timeout).await {
            // correlation ids stay on the bus
            Ok(reply) => ReplyEnvelope {
                correlation_id: None,
                ..reply
            },
            Err(e) => {
                tracing::warn!(operation, error = %e, "dispatch failed");
                ReplyEnvelope::err(Self::describe(operation, &e))
            }
        }
    }

    fn describe(operation: &str, e: &TransportError) -> String {
        let domain = domain_of(operation);
        match e {
            TransportError::Timeout(_) => e.to_string(),
            TransportError::NotSubscribed(_) => format!("Unknown operation: {operation}"),
            TransportError::BrokerUnavailable(_)
            | TransportError::NotConnected
            | TransportError::AlreadyConnected
            | TransportError::Codec(_) => TransportError::unavailable_message(domain),
        }
    }
}
