use crate::application_port::*;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;

pub const AUTH_LOGIN: &str = "auth.login";
pub const AUTH_REGISTER: &str = "auth.register";
pub const AUTH_REFRESH: &str = "auth.refresh";
pub const AUTH_VERIFY: &str = "auth.verify";
pub const AUTH_REVOKE: &str = "auth.revoke";

pub const AUTH_OPERATIONS: [&str; 5] = [
    AUTH_LOGIN,
    AUTH_REGISTER,
    AUTH_REFRESH,
    AUTH_VERIFY,
    AUTH_REVOKE,
];

#[derive(Debug, Deserialize)]
struct RefreshTokenPayload {
    #[serde(rename = "refreshToken", alias = "refresh_token")]
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct VerifyPayload {
    token: String,
}

fn parse<T: DeserializeOwned>(payload: Value) -> Result<T, DomainError> {
    serde_json::from_value(payload).map_err(|e| DomainError {
        error: "Invalid payload".to_owned(),
        message: Some(e.to_string()),
    })
}

fn to_data<T: serde::Serialize>(value: &T) -> Result<Value, DomainError> {
    serde_json::to_value(value).map_err(|e| {
        tracing::error!(error = %e, "reply encode failed");
        DomainError::new("Internal server error")
    })
}

impl From<AuthError> for DomainError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Store(_) | AuthError::InternalError(_) => {
                tracing::error!(error = %e, "auth handler failed");
                DomainError::new("Internal server error")
            }
            AuthError::UserExists => DomainError::new("Username already exists"),
            other => DomainError::new(other.to_string()),
        }
    }
}

/// Serves the `auth.*` operations over the bus.
pub struct AuthRpcHandler {
    auth_service: Arc<dyn AuthService>,
}

impl AuthRpcHandler {
    pub fn new(auth_service: Arc<dyn AuthService>) -> Self {
        AuthRpcHandler { auth_service }
    }
}

#[async_trait::async_trait]
impl RpcHandler for AuthRpcHandler {
    fn operations(&self) -> Vec<String> {
        AUTH_OPERATIONS.into_iter()
            .map(str::to_owned)
            .collect()
    }

    async fn handle(&self, operation: &str, payload: Value) -> Result<Value, DomainError> {
        match operation {
            AUTH_LOGIN => {
                let input: LoginInput = parse(payload)?;
                let result = self.auth_service.login(input).await?;
                to_data(&result)
            }
            AUTH_REGISTER => {
                let input: RegisterInput = parse(payload)?;
                let result = self.auth_service.register(input).await?;
                to_data(&result)
            }
            AUTH_REFRESH => {
                let RefreshTokenPayload { refresh_token } = parse(payload)?;
                let result = self.auth_service.refresh_access_token(&refresh_token).await?;
                to_data(&result)
            }
            AUTH_VERIFY => {
                let VerifyPayload { token } = parse(payload)?;
                let claims = self.auth_service.verify_access_token(&token).await?;
                Ok(json!({ "user": { "id": claims.sub, "username": claims.username } }))
            }
            AUTH_REVOKE => {
                let RefreshTokenPayload { refresh_token } = parse(payload)?;
                self.auth_service.revoke(&refresh_token).await?;
                Ok(json!({ "revoked": true }))
            }
            other => Err(DomainError::new(format!("Unknown operation: {other}"))),
        }
    }
}
