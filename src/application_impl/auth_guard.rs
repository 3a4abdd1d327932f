//! Bearer-token check run in front of every guarded route.
//!
//! Accepted tokens are cached under `jwt:<sha256 hex>` for exactly the lifetime the token has
//! left, so a cache hit never outlives the token. The cache is an accelerator only: when it
//! fails the guard falls back to signature verification.

use crate::application_impl::AccessTokenCodec;
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::Utc;
use std::sync::Arc;

const TOKEN_CACHE_PREFIX: &str = "jwt:";

pub fn token_cache_key(token: &str) -> String {
    format!("{TOKEN_CACHE_PREFIX}{}", token_hash(token))
}

/// `Bearer <token>` with exactly one separating space and a non-empty token.
fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::MissingHeader)?;
    match header.split_once(' ') {
        Some(("Bearer", token)) if !token.is_empty() && !token.contains(' ') => Ok(token),
        _ => Err(AuthError::MalformedHeader),
    }
}

pub struct AuthGuard {
    cache: Arc<dyn CacheStore>,
    access_codec: AccessTokenCodec,
}

impl AuthGuard {
    pub fn new(cache: Arc<dyn CacheStore>, access_codec: AccessTokenCodec) -> Self {
        AuthGuard {
            cache,
            access_codec,
        }
    }

    pub async fn authorize(&self, header: Option<&str>) -> Result<AuthUser, AuthError> {
        let token = bearer_token(header)?;
        let cache_key = token_cache_key(token);

        if let Some(cached) = self.cached_claims(&cache_key).await {
            tracing::trace!(sub = %cached.sub, "token cache hit");
            return Ok(AuthUser {
                id: UserId(cached.sub),
                username: cached.username,
            });
        }

        let claims = self.access_codec.decode(token)?;
        tracing::trace!(sub = %claims.sub, "token cache miss, signature verified");

        let ttl = claims.exp - Utc::now().timestamp();
        if ttl > 0 {
            self.store_claims(&cache_key, &claims, ttl as u64).await;
        }

        Ok(AuthUser {
            id: UserId(claims.sub),
            username: claims.username,
        })
    }

    async fn cached_claims(&self, cache_key: &str) -> Option<CachedClaims> {
        let raw = match self.cache.get(cache_key).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(error = %e, "token cache read failed, verifying signature");
                return None;
            }
        };
        match serde_json::from_str::<CachedClaims>(&raw) {
            Ok(cached) => Some(cached),
            Err(e) => {
                tracing::warn!(error = %e, "unreadable token cache entry ignored");
                None
            }
        }
    }

    async fn store_claims(&self, cache_key: &str, claims: &AccessClaims, ttl_secs: u64) {
        let value = match serde_json::to_string(&CachedClaims::from(claims)) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "token cache entry encode failed");
                return;
            }
        };
        if let Err(e) = self.cache.set_ex(cache_key, &value, ttl_secs).await {
            tracing::warn!(error = %e, "token cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application_impl::JwtConfig;
    use crate::infra_memory::MemoryCacheStore;
    use std::time::Duration;

    struct BrokenCache;

    #[async_trait::async_trait]
    impl CacheStore for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheStoreError> {
            Err(CacheStoreError::Store("connection refused".into()))
        }

        async fn set_ex(&self, _: &str, _: &str, _: u64) -> Result<(), CacheStoreError> {
            Err(CacheStoreError::Store("connection refused".into()))
        }

        async fn invalidate(&self, _keys: &[String]) -> Result<u64, CacheStoreError> {
            Err(CacheStoreError::Store("connection refused".into()))
        }
    }

    fn codec(ttl_secs: u64) -> AccessTokenCodec {
        AccessTokenCodec::new(JwtConfig {
            signing_key: b"access-secret".to_vec(),
            ttl: Duration::from_secs(ttl_secs),
        })
    }

    #[test]
    fn header_must_be_bearer_with_one_token() {
        assert_eq!(bearer_token(None), Err(AuthError::MissingHeader));
        assert_eq!(bearer_token(Some("Bearer abc")), Ok("abc"));
        for bad in ["Basic abc", "Bearer", "Bearer ", "bearer abc", "Bearer a b", "abc"] {
            assert_eq!(bearer_token(Some(bad)), Err(AuthError::MalformedHeader), "{bad}");
        }
    }

    #[tokio::test]
    async fn miss_verifies_then_caches_within_token_lifetime() {
        let cache = Arc::new(MemoryCacheStore::new());
        let guard = AuthGuard::new(cache.clone(), codec(900));
        let token = codec(900).encode(&UserId::from("u1"), "alice").unwrap();
        let header = format!("Bearer {}", token.0);

        let user = guard.authorize(Some(&header)).await.unwrap();
        assert_eq!(user.id, UserId::from("u1"));
        assert_eq!(user.username, "alice");

        let ttl = cache.remaining_ttl(&token_cache_key(&token.0)).unwrap();
        assert!(ttl <= Duration::from_secs(900));
        assert!(ttl > Duration::from_secs(890));
    }

    #[tokio::test]
    async fn hit_is_served_from_cache() {
        let cache = Arc::new(MemoryCacheStore::new());
        let entry = CachedClaims {
            sub: "u9".into(),
            username: "cached".into(),
            exp: Utc::now().timestamp() + 60,
        };
        cache
            .set_ex(
                &token_cache_key("opaque"),
                &serde_json::to_string(&entry).unwrap(),
                60,
            )
            .await
            .unwrap();
        let guard = AuthGuard::new(cache, codec(900));

        let user = guard.authorize(Some("Bearer opaque")).await.unwrap();
        assert_eq!(user.id, UserId::from("u9"));
        assert_eq!(user.username, "cached");
    }

    #[tokio::test]
    async fn invalid_token_is_rejected_and_not_cached() {
        let cache = Arc::new(MemoryCacheStore::new());
        let guard = AuthGuard::new(cache.clone(), codec(900));

        let err = guard.authorize(Some("Bearer not-a-jwt")).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidOrExpiredAccessToken);
        assert_eq!(err.to_string(), "Access token invalid or expired");
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn cache_outage_falls_back_to_signature() {
        let guard = AuthGuard::new(Arc::new(BrokenCache), codec(900));
        let token = codec(900).encode(&UserId::from("u1"), "alice").unwrap();

        let user = guard
            .authorize(Some(&format!("Bearer {}", token.0)))
            .await
            .unwrap();
        assert_eq!(user.username, "alice");
    }
}
