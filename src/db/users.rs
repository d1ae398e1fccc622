use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use super::to_millis;
use crate::store::{StoreError, UserDirectory};

pub struct SqliteUserDirectory {
    pool: SqlitePool,
}

impl SqliteUserDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for SqliteUserDirectory {
    async fn exists(&self, user_id: &str) -> Result<bool, StoreError> {
        let found: Option<String> = sqlx::query_scalar(r#"SELECT "id" FROM "users" WHERE "id" = ?"#)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn register(&self, user_id: &str) -> Result<bool, StoreError> {
        let result =
            sqlx::query(r#"INSERT OR IGNORE INTO "users" ("id", "createdAt") VALUES (?, ?)"#)
                .bind(user_id)
                .bind(to_millis(Utc::now()))
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
