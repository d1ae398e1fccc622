use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use super::{from_millis, parse_json_map, to_millis};
use crate::approval::types::{NewRule, Rule, RuleFilter};
use crate::store::{RuleStore, StoreError};

const RULE_COLUMNS: &str = r#"SELECT "id", "chapterId", "minScoreThreshold", "maxAttempts",
    "allowErrorCarryover", "isActive", "metadata", "description", "createdAt", "updatedAt"
    FROM "approval_rules""#;

pub struct SqliteRuleStore {
    pool: SqlitePool,
}

impl SqliteRuleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, sql: &str, bind: Option<&str>) -> Result<Vec<Rule>, StoreError> {
        let mut query = sqlx::query(sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(map_rule).collect()
    }
}

fn map_rule(row: &SqliteRow) -> Result<Rule, StoreError> {
    let metadata: String = row.try_get("metadata")?;
    Ok(Rule {
        id: row.try_get("id")?,
        chapter_id: row.try_get("chapterId")?,
        min_score_threshold: row.try_get("minScoreThreshold")?,
        max_attempts: row.try_get::<i64, _>("maxAttempts")?.max(0) as u32,
        allow_error_carryover: row.try_get::<i64, _>("allowErrorCarryover")? != 0,
        is_active: row.try_get::<i64, _>("isActive")? != 0,
        metadata: parse_json_map(&metadata)?,
        description: row.try_get("description")?,
        created_at: from_millis(row.try_get("createdAt")?),
        updated_at: from_millis(row.try_get("updatedAt")?),
    })
}

#[async_trait]
impl RuleStore for SqliteRuleStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Rule>, StoreError> {
        let sql = format!(r#"{RULE_COLUMNS} WHERE "id" = ?"#);
        Ok(self.fetch(&sql, Some(id)).await?.into_iter().next())
    }

    async fn find_active_for_chapter(&self, chapter_id: &str) -> Result<Vec<Rule>, StoreError> {
        let sql = format!(r#"{RULE_COLUMNS} WHERE "chapterId" = ? AND "isActive" = 1"#);
        self.fetch(&sql, Some(chapter_id)).await
    }

    async fn find_active_global(&self) -> Result<Vec<Rule>, StoreError> {
        let sql = format!(r#"{RULE_COLUMNS} WHERE "chapterId" IS NULL AND "isActive" = 1"#);
        self.fetch(&sql, None).await
    }

    async fn list(&self, filter: &RuleFilter) -> Result<Vec<Rule>, StoreError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(RULE_COLUMNS);
        builder.push(" WHERE 1 = 1");
        if filter.global_only {
            builder.push(r#" AND "chapterId" IS NULL"#);
        }
        if let Some(ref chapter_id) = filter.chapter_id {
            builder.push(r#" AND "chapterId" = "#).push_bind(chapter_id.clone());
        }
        if let Some(active) = filter.is_active {
            builder.push(r#" AND "isActive" = "#).push_bind(active as i64);
        }
        builder.push(r#" ORDER BY "createdAt" ASC"#);

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(map_rule).collect()
    }

    async fn create(&self, rule: NewRule) -> Result<Rule, StoreError> {
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        let metadata = serde_json::to_string(&rule.metadata)?;

        sqlx::query(
            r#"INSERT INTO "approval_rules" ("id", "chapterId", "minScoreThreshold", "maxAttempts",
                "allowErrorCarryover", "isActive", "metadata", "description", "createdAt", "updatedAt")
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&id)
        .bind(&rule.chapter_id)
        .bind(rule.min_score_threshold)
        .bind(rule.max_attempts as i64)
        .bind(rule.allow_error_carryover as i64)
        .bind(rule.is_active as i64)
        .bind(&metadata)
        .bind(&rule.description)
        .bind(to_millis(now))
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?;

        Ok(Rule {
            id,
            chapter_id: rule.chapter_id,
            min_score_threshold: rule.min_score_threshold,
            max_attempts: rule.max_attempts,
            allow_error_carryover: rule.allow_error_carryover,
            is_active: rule.is_active,
            metadata: rule.metadata,
            description: rule.description,
            created_at: now,
            updated_at: now,
        })
    }

    async fn update(&self, rule: &Rule) -> Result<Rule, StoreError> {
        let metadata = serde_json::to_string(&rule.metadata)?;
        let result = sqlx::query(
            r#"UPDATE "approval_rules" SET "minScoreThreshold" = ?, "maxAttempts" = ?,
                "allowErrorCarryover" = ?, "isActive" = ?, "metadata" = ?, "description" = ?,
                "updatedAt" = ?
            WHERE "id" = ?"#,
        )
        .bind(rule.min_score_threshold)
        .bind(rule.max_attempts as i64)
        .bind(rule.allow_error_carryover as i64)
        .bind(rule.is_active as i64)
        .bind(&metadata)
        .bind(&rule.description)
        .bind(to_millis(Utc::now()))
        .bind(&rule.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("rule {}", rule.id)));
        }

        self.find_by_id(&rule.id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("rule {}", rule.id)))
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(r#"DELETE FROM "approval_rules" WHERE "id" = ?"#)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|err| match err {
                sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                    StoreError::Conflict(format!("rule {id} is referenced by evaluations"))
                }
                other => StoreError::Sqlx(other),
            })?;
        Ok(result.rows_affected() > 0)
    }
}
