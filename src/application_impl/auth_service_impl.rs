use crate::application_impl::{AccessTokenCodec, RefreshTokenCodec};
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::OnceCell;

const DUMMY_PASSWORD: &str = "courier-dummy-password";

pub struct RealAuthService {
    auth_repo: Arc<dyn AuthRepo>,
    session_repo: Arc<dyn SessionTokenRepo>,
    credential_hasher: Arc<dyn CredentialHasher>,
    access_codec: AccessTokenCodec,
    refresh_codec: RefreshTokenCodec,
    // verified against on the unknown-user path so both failures cost one argon2 run
    dummy_hash: OnceCell<String>,
}

impl RealAuthService {
    pub fn new(
        auth_repo: Arc<dyn AuthRepo>,
        session_repo: Arc<dyn SessionTokenRepo>,
        credential_hasher: Arc<dyn CredentialHasher>,
        access_codec: AccessTokenCodec,
        refresh_codec: RefreshTokenCodec,
    ) -> Self {
        Self {
            auth_repo,
            session_repo,
            credential_hasher,
            access_codec,
            refresh_codec,
            dummy_hash: OnceCell::new(),
        }
    }

    async fn dummy_hash(&self) -> Result<&str, AuthError> {
        let hash = self
            .dummy_hash
            .get_or_try_init(|| self.credential_hasher.hash_password(DUMMY_PASSWORD))
            .await?;
        Ok(hash.as_str())
    }

    fn timestamp(secs: i64) -> Result<DateTime<Utc>, AuthError> {
        DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| AuthError::InternalError(format!("timestamp out of range: {secs}")))
    }

    async fn issue_session(&self, record: &AuthCredentialsRecord) -> Result<LoginResult, AuthError> {
        let access_token = self
            .generate_access_token(&record.user_id, &record.username)
            .await?;
        let refresh_token = self.generate_refresh_token(&record.user_id).await?;

        Ok(LoginResult {
            user: record.summary(),
            access_token,
            refresh_token_info: RefreshTokenInfo::for_token(&refresh_token),
        })
    }
}

#[async_trait::async_trait]
impl AuthService for RealAuthService {
    async fn validate_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<UserId, AuthError> {
        let Some(rec) = self.auth_repo.get_by_username(username).await? else {
            let dummy = self.dummy_hash().await?;
            let _ = self.credential_hasher.verify_password(password, dummy).await?;
            return Err(AuthError::InvalidCredentials);
        };

        let ok = self
            .credential_hasher
            .verify_password(password, &rec.password_hash)
            .await?;
        if !ok || !rec.is_active {
            return Err(AuthError::InvalidCredentials);
        }

        Ok(rec.user_id)
    }

    async fn generate_access_token(
        &self,
        user_id: &UserId,
        username: &str,
    ) -> Result<AccessToken, AuthError> {
        self.access_codec.encode(user_id, username)
    }

    async fn generate_refresh_token(&self, user_id: &UserId) -> Result<RefreshToken, AuthError> {
        let refresh_token = self.refresh_codec.encode(user_id)?;

        // the stored expiry is read back from the signed token, never recomputed
        let claims = self.refresh_codec.decode(&refresh_token.0)?;
        let record = SessionTokenRecord {
            user_id: user_id.clone(),
            token_value: refresh_token.0.clone(),
            issued_at: Self::timestamp(claims.iat)?,
            expires_at: Self::timestamp(claims.exp)?,
            revoked: false,
        };
        self.session_repo.save(&record).await?;

        tracing::debug!(user_id = %user_id, expires_at = %record.expires_at, "refresh token issued");
        Ok(refresh_token)
    }

    async fn verify_access_token(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.access_codec.decode(token)
    }

    async fn verify_refresh_token(&self, token: &str) -> Result<Option<RefreshClaims>, AuthError> {
        let Ok(claims) = self.refresh_codec.decode(token) else {
            return Ok(None);
        };

        match self.session_repo.find_by_token(token).await? {
            Some(record) if record.is_usable_at(Utc::now()) && record.user_id.0 == claims.sub => {
                Ok(Some(claims))
            }
            Some(_) => {
                tracing::debug!(sub = %claims.sub, "refresh token revoked or expired in store");
                Ok(None)
            }
            None => {
                tracing::debug!(sub = %claims.sub, "refresh token has no session record");
                Ok(None)
            }
        }
    }

    async fn refresh_access_token(&self, token: &str) -> Result<RefreshResult, AuthError> {
        let claims = self
            .verify_refresh_token(token)
            .await?
            .ok_or(AuthError::InvalidOrExpiredRefreshToken)?;

        let user_id = UserId(claims.sub);
        let username = self
            .auth_repo
            .get_by_user_id(&user_id)
            .await?
            .map(|rec| rec.username)
            .unwrap_or_default();

        let access_token = self.generate_access_token(&user_id, &username).await?;
        Ok(RefreshResult {
            access_token,
            refresh_token_info: RefreshTokenInfo::for_token(&RefreshToken(token.to_owned())),
        })
    }

    async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        let matched = self.session_repo.revoke(token).await?;
        if !matched {
            tracing::debug!("revoke for unknown refresh token ignored");
        }
        Ok(())
    }

    async fn login(&self, input: LoginInput) -> Result<LoginResult, AuthError> {
        let LoginInput { username, password } = input;

        let user_id = self.validate_credentials(&username, &password).await?;
        let rec = self
            .auth_repo
            .get_by_user_id(&user_id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let result = self.issue_session(&rec).await?;
        tracing::info!(user_id = %rec.user_id, "login");
        Ok(result)
    }

    async fn register(&self, input: RegisterInput) -> Result<LoginResult, AuthError> {
        let RegisterInput {
            username,
            password,
            name,
            email,
        } = input;

        if self.auth_repo.get_by_username(&username).await?.is_some() {
            return Err(AuthError::UserExists);
        }

        let password_hash = self.credential_hasher.hash_password(&password).await?;
        let rec = AuthCredentialsRecord {
            user_id: UserId::new_random(),
            username,
            password_hash,
            name,
            email,
            is_active: true,
            created_at: Utc::now(),
        };
        self.auth_repo.create_credentials(&rec).await?;

        let result = self.issue_session(&rec).await?;
        tracing::info!(user_id = %rec.user_id, "registered");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application_impl::{Argon2PasswordHasher, JwtConfig};
    use crate::infra_memory::{MemoryAuthRepo, MemorySessionTokenRepo};
    use std::time::Duration;

    struct Fixture {
        service: RealAuthService,
        sessions: Arc<MemorySessionTokenRepo>,
    }

    fn fixture() -> Fixture {
        let sessions = Arc::new(MemorySessionTokenRepo::new());
        let service = RealAuthService::new(
            Arc::new(MemoryAuthRepo::new()),
            sessions.clone(),
            Arc::new(Argon2PasswordHasher),
            AccessTokenCodec::new(JwtConfig {
                signing_key: b"access-secret".to_vec(),
                ttl: Duration::from_secs(15 * 60),
            }),
            RefreshTokenCodec::new(JwtConfig {
                signing_key: b"refresh-secret".to_vec(),
                ttl: Duration::from_secs(30 * 24 * 60 * 60),
            }),
        );
        Fixture { service, sessions }
    }

    async fn registered(service: &RealAuthService, username: &str, password: &str) -> LoginResult {
        service
            .register(RegisterInput {
                username: username.into(),
                password: password.into(),
                name: Some("Alice".into()),
                email: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_the_same() {
        let f = fixture();
        registered(&f.service, "alice", "correct-horse").await;

        let wrong = f.service.validate_credentials("alice", "wrong").await;
        let unknown = f.service.validate_credentials("ghost", "whatever").await;

        assert_eq!(wrong, Err(AuthError::InvalidCredentials));
        assert_eq!(unknown, Err(AuthError::InvalidCredentials));
        assert!(
            f.service
                .validate_credentials("alice", "correct-horse")
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn issued_refresh_token_verifies_until_revoked() {
        let f = fixture();
        let user = UserId::from("u1");
        let token = f.service.generate_refresh_token(&user).await.unwrap();

        let claims = f.service.verify_refresh_token(&token.0).await.unwrap().unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(f.sessions.len(), 1);

        f.service.revoke(&token.0).await.unwrap();
        assert_eq!(f.service.verify_refresh_token(&token.0).await, Ok(None));

        let refreshed = f.service.refresh_access_token(&token.0).await;
        assert!(matches!(
            refreshed,
            Err(AuthError::InvalidOrExpiredRefreshToken)
        ));

        // revoke is idempotent and keeps the record
        f.service.revoke(&token.0).await.unwrap();
        f.service.revoke("never-issued").await.unwrap();
        assert_eq!(f.sessions.len(), 1);
    }

    #[tokio::test]
    async fn record_expiry_comes_from_the_token_claim() {
        let f = fixture();
        let user = UserId::from("u1");
        let token = f.service.generate_refresh_token(&user).await.unwrap();

        let claims = f.service.verify_refresh_token(&token.0).await.unwrap().unwrap();
        let record = f.sessions.find_by_token(&token.0).await.unwrap().unwrap();
        assert_eq!(record.expires_at.timestamp(), claims.exp);
        assert!(!record.revoked);
    }

    #[tokio::test]
    async fn token_without_session_record_is_refused() {
        let f = fixture();
        let forged = RefreshTokenCodec::new(JwtConfig {
            signing_key: b"refresh-secret".to_vec(),
            ttl: Duration::from_secs(60),
        })
        .encode(&UserId::from("u1"))
        .unwrap();

        assert_eq!(f.service.verify_refresh_token(&forged.0).await, Ok(None));
        assert_eq!(f.service.verify_refresh_token("garbage").await, Ok(None));
    }

    #[tokio::test]
    async fn refresh_keeps_the_token_and_restores_the_username() {
        let f = fixture();
        let login = registered(&f.service, "alice", "correct-horse").await;
        let refresh_token = login.refresh_token_info.value.clone();

        let refreshed = f.service.refresh_access_token(&refresh_token).await.unwrap();
        assert_eq!(refreshed.refresh_token_info.value, refresh_token);
        assert_eq!(refreshed.refresh_token_info.options.path, "/api/v1/auth");

        let claims = f
            .service
            .verify_access_token(&refreshed.access_token.0)
            .await
            .unwrap();
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.sub, login.user.id.0);
    }

    #[tokio::test]
    async fn login_returns_summary_and_cookie_descriptor() {
        let f = fixture();
        registered(&f.service, "alice", "correct-horse").await;

        let login = f
            .service
            .login(LoginInput {
                username: "alice".into(),
                password: "correct-horse".into(),
            })
            .await
            .unwrap();

        assert_eq!(login.user.username, "alice");
        assert_eq!(login.user.name.as_deref(), Some("Alice"));
        assert_eq!(login.refresh_token_info.name, "refreshToken");
        assert!(login.refresh_token_info.options.http_only);
        assert_eq!(login.refresh_token_info.options.max_age, 2_592_000_000);
        // one session from register, one from login
        assert_eq!(f.sessions.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_username_is_refused() {
        let f = fixture();
        registered(&f.service, "alice", "pw-one").await;

        let again = f
            .service
            .register(RegisterInput {
                username: "alice".into(),
                password: "pw-two".into(),
                name: None,
                email: None,
            })
            .await;
        assert!(matches!(again, Err(AuthError::UserExists)));
    }
}
