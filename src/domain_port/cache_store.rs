#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheStoreError>;

    /// `ttl_secs` must be positive; callers bound it by the lifetime of the cached value.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheStoreError>;

    /// Cache-aside hook for handlers that write data other callers read through the cache:
    /// after the write, every affected key is dropped in one call. Returns how many keys
    /// existed. Access-token entries are never invalidated; they expire with the token.
    async fn invalidate(&self, keys: &[String]) -> Result<u64, CacheStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CacheStoreError {
    #[error("ttl must be positive")]
    ZeroTtl,
    #[error("infra error: {0}")]
    Store(String),
}
