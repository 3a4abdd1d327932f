use sqlx::mysql::MySqlDatabaseError;

pub fn is_dup_key(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db) = err {
        if let Some(mysql_err) = db.try_downcast_ref::<MySqlDatabaseError>() {
            return mysql_err.number() == 1062; // ER_DUP_ENTRY
        }
    }

    false
}

/// Pool sized for request/reply traffic; the schema lives in `sql/schema.sql`.
pub async fn connect_pool(url: &str) -> Result<sqlx::MySqlPool, sqlx::Error> {
    sqlx::mysql::MySqlPoolOptions::new()
        .max_connections(16)
        .connect(url)
        .await
}

#[cfg(test)]
mod tests {
    const SCHEMA: &str = include_str!("../../sql/schema.sql");

    #[test]
    fn time_columns_are_not_bounded_by_2038() {
        let time_columns: Vec<&str> = SCHEMA
            .lines()
            .map(str::trim)
            .filter(|line| !line.starts_with("--") && line.contains("_at "))
            .collect();

        assert_eq!(time_columns.len(), 3);
        for column in time_columns {
            assert_eq!(column.split_whitespace().nth(1), Some("DATETIME(3)"), "{column}");
        }
    }
}
