use crate::domain_model::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const REFRESH_COOKIE_NAME: &str = "refreshToken";
/// Covers `/auth/refresh` and `/auth/revoke` under the `api/v1` mount.
pub const REFRESH_COOKIE_PATH: &str = "/api/v1/auth";
pub const REFRESH_COOKIE_MAX_AGE_MS: u64 = 30 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken(pub String);

/// Hex encoded SHA-256 of a raw token. Used as cache key and as the session lookup key,
/// so raw tokens never become key material.
pub fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// Server-side record backing one refresh token. Only `revoked` ever changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokenRecord {
    pub user_id: UserId,
    pub token_value: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl SessionTokenRecord {
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}

/// Value stored under `jwt:<token hash>` in the shared cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedClaims {
    pub sub: String,
    pub username: String,
    pub exp: i64,
}

impl From<&AccessClaims> for CachedClaims {
    fn from(claims: &AccessClaims) -> Self {
        CachedClaims {
            sub: claims.sub.clone(),
            username: claims.username.clone(),
            exp: claims.exp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieOptions {
    pub http_only: bool,
    pub secure: bool,
    pub same_site: String,
    pub path: String,
    /// Milliseconds.
    pub max_age: u64,
}

/// Cookie descriptor the auth service hands to the gateway alongside a refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenInfo {
    pub name: String,
    pub value: String,
    pub options: CookieOptions,
}

impl RefreshTokenInfo {
    pub fn for_token(token: &RefreshToken) -> Self {
        RefreshTokenInfo {
            name: REFRESH_COOKIE_NAME.to_owned(),
            value: token.0.clone(),
            options: CookieOptions {
                http_only: true,
                secure: true,
                same_site: "strict".to_owned(),
                path: REFRESH_COOKIE_PATH.to_owned(),
                max_age: REFRESH_COOKIE_MAX_AGE_MS,
            },
        }
    }

    /// `Set-Cookie` header value. Max-Age on the wire is in seconds.
    pub fn to_set_cookie(&self) -> String {
        let mut cookie = format!(
            "{}={}; Path={}; Max-Age={}",
            self.name,
            self.value,
            self.options.path,
            self.options.max_age / 1000
        );
        if self.options.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.options.secure {
            cookie.push_str("; Secure");
        }
        match self.options.same_site.as_str() {
            "strict" => cookie.push_str("; SameSite=Strict"),
            "lax" => cookie.push_str("; SameSite=Lax"),
            "none" => cookie.push_str("; SameSite=None"),
            _ => {}
        }
        cookie
    }
}

/// `Set-Cookie` value that clears the refresh cookie on logout.
pub fn cleared_refresh_cookie() -> String {
    format!("{REFRESH_COOKIE_NAME}=; Path={REFRESH_COOKIE_PATH}; Max-Age=0; HttpOnly; Secure; SameSite=Strict")
}
