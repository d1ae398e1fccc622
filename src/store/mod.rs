mod memory;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::approval::types::{
    ChapterStats, Evaluation, EvaluationStatus, MetricSample, NewEvaluation, NewRule, Rule,
    RuleFilter,
};

pub use memory::{MemoryEvaluationStore, MemoryMetricsSink, MemoryRuleStore, MemoryUserDirectory};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Uniqueness violation, e.g. a second record for the same attempt number.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("backend unavailable: {0}")]
    Backend(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Rule>, StoreError>;

    async fn find_active_for_chapter(&self, chapter_id: &str) -> Result<Vec<Rule>, StoreError>;

    async fn find_active_global(&self) -> Result<Vec<Rule>, StoreError>;

    /// Active chapter rules followed by active global rules. Callers decide
    /// precedence.
    async fn find_applicable(&self, chapter_id: &str) -> Result<Vec<Rule>, StoreError> {
        let mut rules = self.find_active_for_chapter(chapter_id).await?;
        rules.extend(self.find_active_global().await?);
        Ok(rules)
    }

    async fn list(&self, filter: &RuleFilter) -> Result<Vec<Rule>, StoreError>;

    async fn create(&self, rule: NewRule) -> Result<Rule, StoreError>;

    /// Persists every mutable field of `rule` and bumps `updated_at`.
    async fn update(&self, rule: &Rule) -> Result<Rule, StoreError>;

    /// Returns `false` when no rule with `id` existed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait EvaluationStore: Send + Sync {
    /// Fails with [`StoreError::Conflict`] when the
    /// (user, chapter, attempt number) triple is already taken.
    async fn create(&self, evaluation: NewEvaluation) -> Result<Evaluation, StoreError>;

    /// Inserts the record and sets its feedback as one unit: either both
    /// writes land or neither does.
    async fn create_with_feedback(
        &self,
        evaluation: NewEvaluation,
        feedback: &str,
    ) -> Result<Evaluation, StoreError>;

    async fn update_feedback(&self, id: &str, feedback: &str) -> Result<(), StoreError>;

    async fn count_for_user_chapter(&self, user_id: &str, chapter_id: &str)
        -> Result<u32, StoreError>;

    /// Attempts strictly below `before_attempt`, ascending.
    async fn find_previous_attempts(
        &self,
        user_id: &str,
        chapter_id: &str,
        before_attempt: u32,
    ) -> Result<Vec<Evaluation>, StoreError>;

    async fn find_all_for_user_chapter(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> Result<Vec<Evaluation>, StoreError>;

    async fn find_latest(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> Result<Option<Evaluation>, StoreError>;

    async fn count_for_rule(&self, rule_id: &str) -> Result<u64, StoreError>;

    async fn chapter_stats(&self, chapter_id: &str) -> Result<ChapterStats, StoreError>;
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record_samples(&self, samples: Vec<MetricSample>) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn exists(&self, user_id: &str) -> Result<bool, StoreError>;

    /// Returns `false` when the user was already known.
    async fn register(&self, user_id: &str) -> Result<bool, StoreError>;
}

/// Collaborators the engine and the rule services are wired against.
#[derive(Clone)]
pub struct Stores {
    pub rules: Arc<dyn RuleStore>,
    pub evaluations: Arc<dyn EvaluationStore>,
    pub metrics: Arc<dyn MetricsSink>,
    pub users: Arc<dyn UserDirectory>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            rules: Arc::new(MemoryRuleStore::new()),
            evaluations: Arc::new(MemoryEvaluationStore::new()),
            metrics: Arc::new(MemoryMetricsSink::new()),
            users: Arc::new(MemoryUserDirectory::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_evaluations(mut self, evaluations: Arc<dyn EvaluationStore>) -> Self {
        self.evaluations = evaluations;
        self
    }
}

pub(crate) fn summarize_chapter(chapter_id: &str, evaluations: &[Evaluation]) -> ChapterStats {
    let mut stats = ChapterStats::empty(chapter_id);
    if evaluations.is_empty() {
        return stats;
    }

    let mut users = HashSet::new();
    let mut score_sum = 0.0;
    for evaluation in evaluations {
        stats.total_evaluations += 1;
        match evaluation.status {
            EvaluationStatus::Approved => stats.approved += 1,
            EvaluationStatus::Rejected => stats.rejected += 1,
            EvaluationStatus::Pending => {}
        }
        users.insert(evaluation.user_id.as_str());
        score_sum += evaluation.score;
        stats.highest_attempt = stats.highest_attempt.max(evaluation.attempt_number);
    }

    stats.unique_users = users.len() as u64;
    stats.average_score = round2(score_sum / stats.total_evaluations as f64);
    stats.approval_rate = round2(stats.approved as f64 / stats.total_evaluations as f64);
    stats
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
