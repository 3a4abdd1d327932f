use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

#[derive(Default)]
pub struct MemoryAuthRepo {
    by_username: DashMap<String, AuthCredentialsRecord>,
}

impl MemoryAuthRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl AuthRepo for MemoryAuthRepo {
    async fn create_credentials(&self, record: &AuthCredentialsRecord) -> Result<(), AuthError> {
        match self.by_username.entry(record.username.clone()) {
            Entry::Occupied(_) => Err(AuthError::UserExists),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn get_by_username(
        &self,
        username: &str,
    ) -> Result<Option<AuthCredentialsRecord>, AuthError> {
        Ok(self.by_username.get(username).map(|r| r.value().clone()))
    }

    async fn get_by_user_id(
        &self,
        user_id: &UserId,
    ) -> Result<Option<AuthCredentialsRecord>, AuthError> {
        Ok(self
            .by_username
            .iter()
            .find(|r| &r.user_id == user_id)
            .map(|r| r.value().clone()))
    }
}
