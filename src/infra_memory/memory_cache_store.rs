use crate::domain_port::*;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Process-local `CacheStore`. Expiry follows the tokio clock so paused-time tests work.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time left before `key` expires, if it is present.
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let entry = self.entries.get(key)?;
        entry.1.checked_duration_since(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheStoreError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.1 > now {
                return Ok(Some(entry.0.clone()));
            }
        }
        self.entries.remove_if(key, |_, (_, deadline)| *deadline <= now);
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheStoreError> {
        if ttl_secs == 0 {
            return Err(CacheStoreError::ZeroTtl);
        }
        let deadline = Instant::now() + Duration::from_secs(ttl_secs);
        self.entries
            .insert(key.to_owned(), (value.to_owned(), deadline));
        Ok(())
    }

    async fn invalidate(&self, keys: &[String]) -> Result<u64, CacheStoreError> {
        let removed = keys
            .iter()
            .filter(|k| self.entries.remove(k.as_str()).is_some())
            .count();
        Ok(removed as u64)
    }
}
