use async_trait::async_trait;
use sqlx::SqlitePool;

use super::to_millis;
use crate::approval::types::MetricSample;
use crate::store::{MetricsSink, StoreError};

pub struct SqliteMetricsSink {
    pool: SqlitePool,
}

impl SqliteMetricsSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricsSink for SqliteMetricsSink {
    async fn record_samples(&self, samples: Vec<MetricSample>) -> Result<usize, StoreError> {
        if samples.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for sample in &samples {
            sqlx::query(
                r#"INSERT INTO "evaluation_metrics" ("userId", "chapterId", "metricType", "value", "recordedAt")
                VALUES (?, ?, ?, ?, ?)"#,
            )
            .bind(&sample.user_id)
            .bind(&sample.chapter_id)
            .bind(sample.metric_type.as_str())
            .bind(sample.value)
            .bind(to_millis(sample.recorded_at))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(samples.len())
    }
}
