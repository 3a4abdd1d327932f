use crate::application_port::*;
use crate::domain_model::*;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct AuthCredentialsRecord {
    pub user_id: UserId,
    pub username: String,
    pub password_hash: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl AuthCredentialsRecord {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.user_id.clone(),
            username: self.username.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}

#[async_trait::async_trait]
pub trait AuthRepo: Send + Sync {
    /// Insert a row. Fails with `AuthError::UserExists` on a duplicate username.
    async fn create_credentials(&self, record: &AuthCredentialsRecord) -> Result<(), AuthError>;

    /// Fetch credentials by username (for login).
    async fn get_by_username(
        &self,
        username: &str,
    ) -> Result<Option<AuthCredentialsRecord>, AuthError>;

    async fn get_by_user_id(
        &self,
        user_id: &UserId,
    ) -> Result<Option<AuthCredentialsRecord>, AuthError>;
}
