use crate::application_port::*;
use crate::domain_model::*;

#[async_trait::async_trait]
pub trait SessionTokenRepo: Send + Sync {
    async fn save(&self, record: &SessionTokenRecord) -> Result<(), AuthError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<SessionTokenRecord>, AuthError>;

    /// Mark the record revoked and keep it. Returns whether a record matched.
    async fn revoke(&self, token: &str) -> Result<bool, AuthError>;
}
