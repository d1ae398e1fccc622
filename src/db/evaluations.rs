use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};

use super::{from_millis, map_write_error, parse_json_map, to_millis};
use crate::approval::types::{ChapterStats, Evaluation, EvaluationStatus, NewEvaluation};
use crate::store::{round2, EvaluationStore, StoreError};

const EVALUATION_COLUMNS: &str = r#"SELECT "id", "userId", "ruleId", "chapterId", "score",
    "threshold", "status", "attemptNumber", "errorsFromPreviousAttempts", "feedback",
    "evaluationData", "evaluatedAt"
    FROM "chapter_evaluations""#;

pub struct SqliteEvaluationStore {
    pool: SqlitePool,
}

impl SqliteEvaluationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn map_evaluation(row: &SqliteRow) -> Result<Evaluation, StoreError> {
    let status: String = row.try_get("status")?;
    let data: String = row.try_get("evaluationData")?;
    Ok(Evaluation {
        id: row.try_get("id")?,
        user_id: row.try_get("userId")?,
        rule_id: row.try_get("ruleId")?,
        chapter_id: row.try_get("chapterId")?,
        score: row.try_get("score")?,
        threshold: row.try_get("threshold")?,
        status: EvaluationStatus::parse(&status)
            .ok_or_else(|| StoreError::Backend(format!("unknown evaluation status {status}")))?,
        attempt_number: row.try_get::<i64, _>("attemptNumber")?.max(0) as u32,
        errors_from_previous_attempts: row
            .try_get::<i64, _>("errorsFromPreviousAttempts")?
            .max(0) as u32,
        feedback: row.try_get("feedback")?,
        evaluation_data: parse_json_map(&data)?,
        evaluated_at: from_millis(row.try_get("evaluatedAt")?),
    })
}

fn insert_query<'q>(
    id: &'q str,
    data: &'q str,
    evaluation: &'q NewEvaluation,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    sqlx::query(
        r#"INSERT INTO "chapter_evaluations" ("id", "userId", "ruleId", "chapterId", "score",
            "threshold", "status", "attemptNumber", "errorsFromPreviousAttempts",
            "evaluationData", "evaluatedAt")
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(id)
    .bind(&evaluation.user_id)
    .bind(&evaluation.rule_id)
    .bind(&evaluation.chapter_id)
    .bind(evaluation.score)
    .bind(evaluation.threshold)
    .bind(evaluation.status.as_str())
    .bind(evaluation.attempt_number as i64)
    .bind(evaluation.errors_from_previous_attempts as i64)
    .bind(data)
    .bind(to_millis(evaluation.evaluated_at))
}

fn feedback_query<'q>(id: &'q str, feedback: &'q str) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    sqlx::query(r#"UPDATE "chapter_evaluations" SET "feedback" = ? WHERE "id" = ?"#)
        .bind(feedback)
        .bind(id)
}

/// A missing rule surfaces as `NotFound`; a taken attempt number as `Conflict`.
fn map_insert_error(err: sqlx::Error, evaluation: &NewEvaluation) -> StoreError {
    match err {
        sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
            StoreError::NotFound(format!("rule {}", evaluation.rule_id))
        }
        other => map_write_error(other, || {
            format!(
                "attempt {} already recorded for user {} in chapter {}",
                evaluation.attempt_number, evaluation.user_id, evaluation.chapter_id
            )
        }),
    }
}

#[async_trait]
impl EvaluationStore for SqliteEvaluationStore {
    async fn create(&self, evaluation: NewEvaluation) -> Result<Evaluation, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let data = serde_json::to_string(&evaluation.evaluation_data)?;

        insert_query(&id, &data, &evaluation)
            .execute(&self.pool)
            .await
            .map_err(|err| map_insert_error(err, &evaluation))?;

        Ok(evaluation.into_evaluation(id, None))
    }

    async fn create_with_feedback(
        &self,
        evaluation: NewEvaluation,
        feedback: &str,
    ) -> Result<Evaluation, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let data = serde_json::to_string(&evaluation.evaluation_data)?;

        // Dropping the transaction on any early return rolls the insert back.
        let mut tx = self.pool.begin().await?;
        insert_query(&id, &data, &evaluation)
            .execute(&mut *tx)
            .await
            .map_err(|err| map_insert_error(err, &evaluation))?;
        let result = feedback_query(&id, feedback).execute(&mut *tx).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("evaluation {id}")));
        }
        tx.commit().await?;

        Ok(evaluation.into_evaluation(id, Some(feedback.to_string())))
    }

    async fn update_feedback(&self, id: &str, feedback: &str) -> Result<(), StoreError> {
        let result = feedback_query(id, feedback).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("evaluation {id}")));
        }
        Ok(())
    }

    async fn count_for_user_chapter(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> Result<u32, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM "chapter_evaluations" WHERE "userId" = ? AND "chapterId" = ?"#,
        )
        .bind(user_id)
        .bind(chapter_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u32)
    }

    async fn find_previous_attempts(
        &self,
        user_id: &str,
        chapter_id: &str,
        before_attempt: u32,
    ) -> Result<Vec<Evaluation>, StoreError> {
        let sql = format!(
            r#"{EVALUATION_COLUMNS} WHERE "userId" = ? AND "chapterId" = ? AND "attemptNumber" < ?
            ORDER BY "attemptNumber" ASC"#
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(chapter_id)
            .bind(before_attempt as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_evaluation).collect()
    }

    async fn find_all_for_user_chapter(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> Result<Vec<Evaluation>, StoreError> {
        let sql = format!(
            r#"{EVALUATION_COLUMNS} WHERE "userId" = ? AND "chapterId" = ?
            ORDER BY "attemptNumber" ASC"#
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(chapter_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_evaluation).collect()
    }

    async fn find_latest(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> Result<Option<Evaluation>, StoreError> {
        let sql = format!(
            r#"{EVALUATION_COLUMNS} WHERE "userId" = ? AND "chapterId" = ?
            ORDER BY "attemptNumber" DESC LIMIT 1"#
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(chapter_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_evaluation).transpose()
    }

    async fn count_for_rule(&self, rule_id: &str) -> Result<u64, StoreError> {
        let count: i64 =
            sqlx::query_scalar(r#"SELECT COUNT(*) FROM "chapter_evaluations" WHERE "ruleId" = ?"#)
                .bind(rule_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    async fn chapter_stats(&self, chapter_id: &str) -> Result<ChapterStats, StoreError> {
        let row = sqlx::query(
            r#"SELECT
                COUNT(*) AS "total",
                COALESCE(SUM(CASE WHEN "status" = 'APPROVED' THEN 1 ELSE 0 END), 0) AS "approved",
                COALESCE(SUM(CASE WHEN "status" = 'REJECTED' THEN 1 ELSE 0 END), 0) AS "rejected",
                COUNT(DISTINCT "userId") AS "users",
                AVG("score") AS "avgScore",
                MAX("attemptNumber") AS "maxAttempt"
            FROM "chapter_evaluations" WHERE "chapterId" = ?"#,
        )
        .bind(chapter_id)
        .fetch_one(&self.pool)
        .await?;

        let total = row.try_get::<i64, _>("total")?.max(0) as u64;
        if total == 0 {
            return Ok(ChapterStats::empty(chapter_id));
        }
        let approved = row.try_get::<i64, _>("approved")?.max(0) as u64;

        Ok(ChapterStats {
            chapter_id: chapter_id.to_string(),
            total_evaluations: total,
            approved,
            rejected: row.try_get::<i64, _>("rejected")?.max(0) as u64,
            unique_users: row.try_get::<i64, _>("users")?.max(0) as u64,
            average_score: round2(row.try_get::<Option<f64>, _>("avgScore")?.unwrap_or(0.0)),
            approval_rate: round2(approved as f64 / total as f64),
            highest_attempt: row.try_get::<Option<i64>, _>("maxAttempt")?.unwrap_or(0).max(0) as u32,
        })
    }
}
