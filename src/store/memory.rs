use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::{
    summarize_chapter, EvaluationStore, MetricsSink, RuleStore, StoreError, UserDirectory,
};
use crate::approval::types::{
    ChapterStats, Evaluation, MetricSample, NewEvaluation, NewRule, Rule, RuleFilter,
};

#[derive(Default)]
pub struct MemoryRuleStore {
    rules: RwLock<Vec<Rule>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Rule>, StoreError> {
        Ok(self.rules.read().iter().find(|r| r.id == id).cloned())
    }

    async fn find_active_for_chapter(&self, chapter_id: &str) -> Result<Vec<Rule>, StoreError> {
        Ok(self
            .rules
            .read()
            .iter()
            .filter(|r| r.is_active && r.applies_to(chapter_id))
            .cloned()
            .collect())
    }

    async fn find_active_global(&self) -> Result<Vec<Rule>, StoreError> {
        Ok(self
            .rules
            .read()
            .iter()
            .filter(|r| r.is_active && r.is_global())
            .cloned()
            .collect())
    }

    async fn list(&self, filter: &RuleFilter) -> Result<Vec<Rule>, StoreError> {
        Ok(self
            .rules
            .read()
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn create(&self, rule: NewRule) -> Result<Rule, StoreError> {
        let now = Utc::now();
        let rule = Rule {
            id: uuid::Uuid::new_v4().to_string(),
            chapter_id: rule.chapter_id,
            min_score_threshold: rule.min_score_threshold,
            max_attempts: rule.max_attempts,
            allow_error_carryover: rule.allow_error_carryover,
            is_active: rule.is_active,
            metadata: rule.metadata,
            description: rule.description,
            created_at: now,
            updated_at: now,
        };
        self.rules.write().push(rule.clone());
        Ok(rule)
    }

    async fn update(&self, rule: &Rule) -> Result<Rule, StoreError> {
        let mut rules = self.rules.write();
        let existing = rules
            .iter_mut()
            .find(|r| r.id == rule.id)
            .ok_or_else(|| StoreError::NotFound(format!("rule {}", rule.id)))?;

        let mut updated = rule.clone();
        updated.created_at = existing.created_at;
        updated.updated_at = Utc::now();
        *existing = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.id != id);
        Ok(rules.len() != before)
    }
}

#[derive(Default)]
pub struct MemoryEvaluationStore {
    evaluations: RwLock<Vec<Evaluation>>,
}

impl MemoryEvaluationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.evaluations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.evaluations.read().is_empty()
    }

    fn for_user_chapter(&self, user_id: &str, chapter_id: &str) -> Vec<Evaluation> {
        let mut found: Vec<Evaluation> = self
            .evaluations
            .read()
            .iter()
            .filter(|e| e.user_id == user_id && e.chapter_id == chapter_id)
            .cloned()
            .collect();
        found.sort_by_key(|e| e.attempt_number);
        found
    }
}

fn insert_evaluation(
    evaluations: &mut Vec<Evaluation>,
    evaluation: NewEvaluation,
    feedback: Option<String>,
) -> Result<Evaluation, StoreError> {
    let taken = evaluations.iter().any(|e| {
        e.user_id == evaluation.user_id
            && e.chapter_id == evaluation.chapter_id
            && e.attempt_number == evaluation.attempt_number
    });
    if taken {
        return Err(StoreError::Conflict(format!(
            "attempt {} already recorded for user {} in chapter {}",
            evaluation.attempt_number, evaluation.user_id, evaluation.chapter_id
        )));
    }

    let record = evaluation.into_evaluation(uuid::Uuid::new_v4().to_string(), feedback);
    evaluations.push(record.clone());
    Ok(record)
}

#[async_trait]
impl EvaluationStore for MemoryEvaluationStore {
    async fn create(&self, evaluation: NewEvaluation) -> Result<Evaluation, StoreError> {
        insert_evaluation(&mut self.evaluations.write(), evaluation, None)
    }

    async fn create_with_feedback(
        &self,
        evaluation: NewEvaluation,
        feedback: &str,
    ) -> Result<Evaluation, StoreError> {
        insert_evaluation(
            &mut self.evaluations.write(),
            evaluation,
            Some(feedback.to_string()),
        )
    }

    async fn update_feedback(&self, id: &str, feedback: &str) -> Result<(), StoreError> {
        let mut evaluations = self.evaluations.write();
        let record = evaluations
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("evaluation {id}")))?;
        record.feedback = Some(feedback.to_string());
        Ok(())
    }

    async fn count_for_user_chapter(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> Result<u32, StoreError> {
        let count = self
            .evaluations
            .read()
            .iter()
            .filter(|e| e.user_id == user_id && e.chapter_id == chapter_id)
            .count();
        Ok(count as u32)
    }

    async fn find_previous_attempts(
        &self,
        user_id: &str,
        chapter_id: &str,
        before_attempt: u32,
    ) -> Result<Vec<Evaluation>, StoreError> {
        let mut found = self.for_user_chapter(user_id, chapter_id);
        found.retain(|e| e.attempt_number < before_attempt);
        Ok(found)
    }

    async fn find_all_for_user_chapter(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> Result<Vec<Evaluation>, StoreError> {
        Ok(self.for_user_chapter(user_id, chapter_id))
    }

    async fn find_latest(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> Result<Option<Evaluation>, StoreError> {
        Ok(self.for_user_chapter(user_id, chapter_id).pop())
    }

    async fn count_for_rule(&self, rule_id: &str) -> Result<u64, StoreError> {
        let count = self
            .evaluations
            .read()
            .iter()
            .filter(|e| e.rule_id == rule_id)
            .count();
        Ok(count as u64)
    }

    async fn chapter_stats(&self, chapter_id: &str) -> Result<ChapterStats, StoreError> {
        let evaluations: Vec<Evaluation> = self
            .evaluations
            .read()
            .iter()
            .filter(|e| e.chapter_id == chapter_id)
            .cloned()
            .collect();
        Ok(summarize_chapter(chapter_id, &evaluations))
    }
}

#[derive(Default)]
pub struct MemoryMetricsSink {
    samples: RwLock<Vec<MetricSample>>,
}

impl MemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<MetricSample> {
        self.samples.read().clone()
    }
}

#[async_trait]
impl MetricsSink for MemoryMetricsSink {
    async fn record_samples(&self, samples: Vec<MetricSample>) -> Result<usize, StoreError> {
        let count = samples.len();
        self.samples.write().extend(samples);
        Ok(count)
    }
}

#[derive(Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashSet<String>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: RwLock::new(users.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn exists(&self, user_id: &str) -> Result<bool, StoreError> {
        Ok(self.users.read().contains(user_id))
    }

    async fn register(&self, user_id: &str) -> Result<bool, StoreError> {
        Ok(self.users.write().insert(user_id.to_string()))
    }
}
