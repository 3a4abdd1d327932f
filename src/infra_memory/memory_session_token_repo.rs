use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use dashmap::DashMap;

/// Session records keyed by token hash, as in the MySQL table.
#[derive(Default)]
pub struct MemorySessionTokenRepo {
    records: DashMap<String, SessionTokenRecord>,
}

impl MemorySessionTokenRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait::async_trait]
impl SessionTokenRepo for MemorySessionTokenRepo {
    async fn save(&self, record: &SessionTokenRecord) -> Result<(), AuthError> {
        self.records
            .insert(token_hash(&record.token_value), record.clone());
        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<SessionTokenRecord>, AuthError> {
        Ok(self
            .records
            .get(&token_hash(token))
            .filter(|r| r.token_value == token)
            .map(|r| r.value().clone()))
    }

    async fn revoke(&self, token: &str) -> Result<bool, AuthError> {
        match self.records.get_mut(&token_hash(token)) {
            Some(mut record) => {
                record.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
