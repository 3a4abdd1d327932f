use crate::domain_model::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingHeader,
    #[error("Invalid Authorization header format")]
    MalformedHeader,
    #[error("Access token invalid or expired")]
    InvalidOrExpiredAccessToken,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid or expired refresh token")]
    InvalidOrExpiredRefreshToken,
    #[error("user already exists")]
    UserExists,
    #[error("store error: {0}")]
    Store(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginInput {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterInput {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResult {
    pub user: UserSummary,
    pub access_token: AccessToken,
    pub refresh_token_info: RefreshTokenInfo,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResult {
    pub access_token: AccessToken,
    pub refresh_token_info: RefreshTokenInfo,
}

#[async_trait::async_trait]
pub trait CredentialHasher: Send + Sync {
    async fn hash_password(&self, password: &str) -> Result<String, AuthError>;
    /// Constant-time comparison of `password` against a PHC hash string.
    async fn verify_password(&self, password: &str, password_hash: &str)
    -> Result<bool, AuthError>;
}

/// Issues, verifies and revokes access/refresh tokens.
#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    async fn validate_credentials(&self, username: &str, password: &str)
    -> Result<UserId, AuthError>;

    async fn generate_access_token(
        &self,
        user_id: &UserId,
        username: &str,
    ) -> Result<AccessToken, AuthError>;

    /// Signs a refresh token and persists its session record.
    async fn generate_refresh_token(&self, user_id: &UserId) -> Result<RefreshToken, AuthError>;

    async fn verify_access_token(&self, token: &str) -> Result<AccessClaims, AuthError>;

    /// `Ok(None)` unless the signature and expiry hold *and* a live, unrevoked session
    /// record exists for this exact token. `Err` only for store failures.
    async fn verify_refresh_token(&self, token: &str) -> Result<Option<RefreshClaims>, AuthError>;

    /// New access token; the refresh token is handed back unchanged.
    async fn refresh_access_token(&self, token: &str) -> Result<RefreshResult, AuthError>;

    /// Idempotent. Unknown tokens are a no-op.
    async fn revoke(&self, token: &str) -> Result<(), AuthError>;

    async fn login(&self, input: LoginInput) -> Result<LoginResult, AuthError>;

    async fn register(&self, input: RegisterInput) -> Result<LoginResult, AuthError>;
}
