use crate::application_port::*;
use crate::domain_model::*;
use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use std::time::Duration;

#[derive(Clone)]
pub struct JwtConfig {
    pub signing_key: Vec<u8>,
    pub ttl: Duration,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("signing_key", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

fn validation() -> Validation {
    let mut v = Validation::new(Algorithm::HS256);
    v.validate_exp = true;
    v.validate_aud = false;
    v.leeway = 0;
    v
}

fn issue_window(cfg: &JwtConfig) -> Result<(DateTime<Utc>, DateTime<Utc>), AuthError> {
    let iat_dt = Utc::now();
    let exp_dt = TimeDelta::from_std(cfg.ttl)
        .ok()
        .and_then(|ttl| iat_dt.checked_add_signed(ttl))
        .ok_or_else(|| {
            AuthError::InternalError(format!("token ttl {:?} out of range", cfg.ttl))
        })?;
    Ok((iat_dt, exp_dt))
}

/// HS256 access tokens. The gateway holds one of these for verification only.
#[derive(Debug, Clone)]
pub struct AccessTokenCodec {
    cfg: JwtConfig,
}

impl AccessTokenCodec {
    pub fn new(cfg: JwtConfig) -> Self {
        AccessTokenCodec { cfg }
    }

    pub fn encode(&self, user_id: &UserId, username: &str) -> Result<AccessToken, AuthError> {
        let (iat_dt, exp_dt) = issue_window(&self.cfg)?;
        let claims = AccessClaims {
            sub: user_id.to_string(),
            username: username.to_owned(),
            iat: iat_dt.timestamp(),
            exp: exp_dt.timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.cfg.signing_key),
        )
        .map_err(|e| AuthError::InternalError(e.to_string()))?;
        Ok(AccessToken(token))
    }

    pub fn decode(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let data = decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(&self.cfg.signing_key),
            &validation(),
        )
        .map_err(|e| {
            tracing::debug!(error = %e, "access token rejected");
            AuthError::InvalidOrExpiredAccessToken
        })?;
        Ok(data.claims)
    }
}

#[derive(Debug, Clone)]
pub struct RefreshTokenCodec {
    cfg: JwtConfig,
}

impl RefreshTokenCodec {
    pub fn new(cfg: JwtConfig) -> Self {
        RefreshTokenCodec { cfg }
    }

    #[inline]
    fn gen_jti() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn encode(&self, user_id: &UserId) -> Result<RefreshToken, AuthError> {
        let (iat_dt, exp_dt) = issue_window(&self.cfg)?;
        let claims = RefreshClaims {
            sub: user_id.to_string(),
            iat: iat_dt.timestamp(),
            exp: exp_dt.timestamp(),
            jti: Self::gen_jti(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.cfg.signing_key),
        )
        .map_err(|e| AuthError::InternalError(e.to_string()))?;
        Ok(RefreshToken(token))
    }

    pub fn decode(&self, token: &str) -> Result<RefreshClaims, AuthError> {
        let data = decode::<RefreshClaims>(
            token,
            &DecodingKey::from_secret(&self.cfg.signing_key),
            &validation(),
        )
        .map_err(|e| {
            tracing::debug!(error = %e, "refresh token rejected");
            AuthError::InvalidOrExpiredRefreshToken
        })?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(secret: &str, ttl_secs: u64) -> AccessTokenCodec {
        AccessTokenCodec::new(JwtConfig {
            signing_key: secret.as_bytes().to_vec(),
            ttl: Duration::from_secs(ttl_secs),
        })
    }

    #[test]
    fn access_token_carries_subject_and_username() {
        let codec = codec("access-secret", 900);
        let token = codec.encode(&UserId::from("u1"), "alice").unwrap();
        let claims = codec.decode(&token.0).unwrap();

        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.exp - claims.iat, 900);
    }

    #[test]
    fn foreign_secret_and_garbage_are_rejected() {
        let token = codec("one", 900).encode(&UserId::from("u1"), "alice").unwrap();

        assert_eq!(
            codec("two", 900).decode(&token.0),
            Err(AuthError::InvalidOrExpiredAccessToken)
        );
        assert_eq!(
            codec("one", 900).decode("not.a.jwt"),
            Err(AuthError::InvalidOrExpiredAccessToken)
        );
    }

    #[test]
    fn expired_access_token_is_rejected_without_leeway() {
        let codec = codec("access-secret", 900);
        let now = Utc::now().timestamp();
        let stale = AccessClaims {
            sub: "u1".into(),
            username: "alice".into(),
            iat: now - 120,
            exp: now - 1,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &stale,
            &EncodingKey::from_secret(b"access-secret"),
        )
        .unwrap();

        assert_eq!(
            codec.decode(&token),
            Err(AuthError::InvalidOrExpiredAccessToken)
        );
    }

    #[test]
    fn refresh_tokens_are_unique_per_issue() {
        let codec = RefreshTokenCodec::new(JwtConfig {
            signing_key: b"refresh-secret".to_vec(),
            ttl: Duration::from_secs(30 * 24 * 60 * 60),
        });
        let a = codec.encode(&UserId::from("u1")).unwrap();
        let b = codec.encode(&UserId::from("u1")).unwrap();
        assert_ne!(a, b);

        let claims = codec.decode(&a.0).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.exp - claims.iat, 2_592_000);
    }

    #[test]
    fn ttl_past_the_calendar_is_an_error_not_a_panic() {
        let err = codec("access-secret", u64::MAX)
            .encode(&UserId::from("u1"), "alice")
            .unwrap_err();
        assert!(matches!(err, AuthError::InternalError(_)));
    }
}
