use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};

/// Rows are keyed by the token hash; the raw value is kept for audit.
pub struct MySqlSessionTokenRepo {
    pool: MySqlPool,
}

impl MySqlSessionTokenRepo {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlSessionTokenRepo { pool }
    }

    fn row_to_record(row: MySqlRow) -> Result<SessionTokenRecord, AuthError> {
        let store_err = |e: sqlx::Error| AuthError::Store(e.to_string());

        let user_id: String = row.try_get("user_id").map_err(store_err)?;
        let token_value: String = row.try_get("token_value").map_err(store_err)?;
        let issued_at: DateTime<Utc> = row.try_get("issued_at").map_err(store_err)?;
        let expires_at: DateTime<Utc> = row.try_get("expires_at").map_err(store_err)?;
        let revoked: bool = row.try_get("revoked").map_err(store_err)?;

        Ok(SessionTokenRecord {
            user_id: UserId(user_id),
            token_value,
            issued_at,
            expires_at,
            revoked,
        })
    }
}

#[async_trait::async_trait]
impl SessionTokenRepo for MySqlSessionTokenRepo {
    async fn save(&self, record: &SessionTokenRecord) -> Result<(), AuthError> {
        sqlx::query(
            r#"
INSERT INTO session_token (token_hash, user_id, token_value, issued_at, expires_at, revoked)
VALUES (?, ?, ?, ?, ?, ?)
"#,
        )
        .bind(token_hash(&record.token_value))
        .bind(&record.user_id.0)
        .bind(&record.token_value)
        .bind(record.issued_at)
        .bind(record.expires_at)
        .bind(record.revoked)
        .execute(&self.pool)
        .await
        .map_err(|e| AuthError::Store(e.to_string()))?;

        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<SessionTokenRecord>, AuthError> {
        let row_opt: Option<MySqlRow> = sqlx::query(
            r#"
SELECT user_id, token_value, issued_at, expires_at, revoked
FROM session_token
WHERE token_hash = ?
"#,
        )
        .bind(token_hash(token))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuthError::Store(e.to_string()))?;

        row_opt.map(Self::row_to_record).transpose()
    }

    async fn revoke(&self, token: &str) -> Result<bool, AuthError> {
        // revoked rows still count as matched so a repeat revoke reports the same outcome
        let row_opt: Option<MySqlRow> = sqlx::query(
            r#"
SELECT revoked FROM session_token WHERE token_hash = ?
"#,
        )
        .bind(token_hash(token))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuthError::Store(e.to_string()))?;

        if row_opt.is_none() {
            return Ok(false);
        }

        sqlx::query(
            r#"
UPDATE session_token SET revoked = TRUE WHERE token_hash = ?
"#,
        )
        .bind(token_hash(token))
        .execute(&self.pool)
        .await
        .map_err(|e| AuthError::Store(e.to_string()))?;

        Ok(true)
    }
}
