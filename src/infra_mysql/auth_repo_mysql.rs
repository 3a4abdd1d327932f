use super::util::is_dup_key;
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};

pub struct MySqlAuthRepo {
    pool: MySqlPool,
}

impl MySqlAuthRepo {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlAuthRepo { pool }
    }

    fn row_to_record(row: MySqlRow) -> Result<AuthCredentialsRecord, AuthError> {
        let store_err = |e: sqlx::Error| AuthError::Store(e.to_string());

        let user_id: String = row.try_get("user_id").map_err(store_err)?;
        let username: String = row.try_get("username").map_err(store_err)?;
        let password_hash: String = row.try_get("password_hash").map_err(store_err)?;
        let name: Option<String> = row.try_get("name").map_err(store_err)?;
        let email: Option<String> = row.try_get("email").map_err(store_err)?;
        let is_active: bool = row.try_get("is_active").map_err(store_err)?;
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(store_err)?;

        Ok(AuthCredentialsRecord {
            user_id: UserId(user_id),
            username,
            password_hash,
            name,
            email,
            is_active,
            created_at,
        })
    }
}

#[async_trait::async_trait]
impl AuthRepo for MySqlAuthRepo {
    async fn create_credentials(&self, record: &AuthCredentialsRecord) -> Result<(), AuthError> {
        sqlx::query(
            r#"
INSERT INTO auth_credential (user_id, username, password_hash, name, email, is_active, created_at)
VALUES (?, ?, ?, ?, ?, ?, ?)
"#,
        )
        .bind(&record.user_id.0)
        .bind(&record.username)
        .bind(&record.password_hash)
        .bind(&record.name)
        .bind(&record.email)
        .bind(record.is_active)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_dup_key(&e) {
                AuthError::UserExists
            } else {
                AuthError::Store(e.to_string())
            }
        })?;

        Ok(())
    }

    async fn get_by_username(
        &self,
        username: &str,
    ) -> Result<Option<AuthCredentialsRecord>, AuthError> {
        let row_opt: Option<MySqlRow> = sqlx::query(
            r#"
SELECT user_id, username, password_hash, name, email, is_active, created_at
FROM auth_credential
WHERE username = ?
"#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuthError::Store(e.to_string()))?;

        row_opt.map(Self::row_to_record).transpose()
    }

    async fn get_by_user_id(
        &self,
        user_id: &UserId,
    ) -> Result<Option<AuthCredentialsRecord>, AuthError> {
        let row_opt: Option<MySqlRow> = sqlx::query(
            r#"
SELECT user_id, username, password_hash, name, email, is_active, created_at
FROM auth_credential
WHERE user_id = ?
"#,
        )
        .bind(&user_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuthError::Store(e.to_string()))?;

        row_opt.map(Self::row_to_record).transpose()
    }
}
