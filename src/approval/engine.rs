use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};

use super::attempts::AttemptTracker;
use super::carryover::{compute_carryover, CarryoverPolicy};
use super::decision::{adjusted_score, decide, DecisionInput};
use super::error::ApprovalError;
use super::feedback::{generate_feedback, FeedbackContext};
use super::locks::KeyedLocks;
use super::recorder::{build_metric_samples, EvaluationRecorder, MetricsMode};
use super::rules::{CriticalChapters, ResolvedRule, RuleResolver, DEFAULT_THRESHOLD};
use super::types::{
    AttemptHistory, EvaluateRequest, Evaluation, EvaluationOutcome, EvaluationStatus,
    NewEvaluation,
};
use super::validation::{require_id, validate_evaluate_request};
use crate::cache::ApprovalCache;
use crate::store::{StoreError, Stores};

pub const DEFAULT_BATCH_CONCURRENCY: usize = 5;

/// Extra rounds allowed when the attempt number was taken concurrently.
const CONFLICT_RETRIES: u32 = 1;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub critical_chapters: CriticalChapters,
    pub default_threshold: f64,
    pub carryover: CarryoverPolicy,
    pub batch_concurrency: usize,
    pub metrics_mode: MetricsMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            critical_chapters: CriticalChapters::default(),
            default_threshold: DEFAULT_THRESHOLD,
            carryover: CarryoverPolicy::default(),
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
            metrics_mode: MetricsMode::default(),
        }
    }
}

#[derive(Debug)]
pub struct BatchItem {
    pub index: usize,
    pub result: Result<EvaluationOutcome, ApprovalError>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn from_items(items: &[BatchItem]) -> Self {
        let succeeded = items.iter().filter(|i| i.result.is_ok()).count();
        Self {
            total: items.len(),
            succeeded,
            failed: items.len() - succeeded,
        }
    }
}

pub struct ApprovalEngine {
    stores: Stores,
    config: EngineConfig,
    resolver: RuleResolver,
    tracker: AttemptTracker,
    recorder: EvaluationRecorder,
    locks: KeyedLocks,
    cache: Option<Arc<ApprovalCache>>,
}

impl ApprovalEngine {
    pub fn new(stores: Stores, config: EngineConfig) -> Self {
        let resolver = RuleResolver::new(
            Arc::clone(&stores.rules),
            config.critical_chapters.clone(),
            config.default_threshold,
        );
        let tracker = AttemptTracker::new(Arc::clone(&stores.evaluations));
        let recorder = EvaluationRecorder::new(
            Arc::clone(&stores.evaluations),
            Arc::clone(&stores.metrics),
            config.metrics_mode,
        );

        Self {
            stores,
            config,
            resolver,
            tracker,
            recorder,
            locks: KeyedLocks::new(),
            cache: None,
        }
    }

    /// Chapter statistics cached here are dropped after each recorded attempt.
    pub fn with_cache(mut self, cache: Arc<ApprovalCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resolver(&self) -> &RuleResolver {
        &self.resolver
    }

    /// Records one attempt. Not idempotent: every call consumes a new attempt
    /// number.
    pub async fn evaluate(&self, req: EvaluateRequest) -> Result<EvaluationOutcome, ApprovalError> {
        validate_evaluate_request(&req)?;
        self.ensure_user(&req.user_id).await?;

        let resolved = self.resolver.resolve(&req.chapter_id).await?;

        let evaluation = {
            let _guard = self.locks.lock(&req.user_id, &req.chapter_id).await;
            self.record_attempt(&req, &resolved).await?
        };

        self.recorder
            .emit_metrics(build_metric_samples(&evaluation, req.time_spent))
            .await;

        if let Some(ref cache) = self.cache {
            cache.invalidate_chapter_stats(&evaluation.chapter_id).await;
        }

        let adjusted = adjusted_score(evaluation.score, evaluation.errors_from_previous_attempts);
        let can_retry = evaluation.status == EvaluationStatus::Rejected
            && evaluation.attempt_number < resolved.rule.max_attempts;

        info!(
            user_id = %evaluation.user_id,
            chapter_id = %evaluation.chapter_id,
            attempt = evaluation.attempt_number,
            status = %evaluation.status,
            "evaluation recorded"
        );

        Ok(EvaluationOutcome {
            evaluation_id: evaluation.id,
            status: evaluation.status,
            score: evaluation.score,
            adjusted_score: adjusted,
            threshold: evaluation.threshold,
            attempt_number: evaluation.attempt_number,
            errors_carried_over: evaluation.errors_from_previous_attempts,
            feedback: evaluation.feedback.unwrap_or_default(),
            can_retry,
            max_attempts: resolved.rule.max_attempts,
        })
    }

    /// Runs independent evaluations through a bounded worker pool. Each item
    /// succeeds or fails on its own; results keep request order.
    pub async fn evaluate_batch(&self, requests: Vec<EvaluateRequest>) -> Vec<BatchItem> {
        let concurrency = self.config.batch_concurrency.max(1);
        let engine = self;

        stream::iter(requests.into_iter().enumerate())
            .map(|(index, req)| async move {
                let result = engine.evaluate(req).await;
                if let Err(ref err) = result {
                    warn!(index, error = %err, "batch evaluation item failed");
                }
                BatchItem { index, result }
            })
            .buffered(concurrency)
            .collect()
            .await
    }

    pub async fn attempt_history(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> Result<AttemptHistory, ApprovalError> {
        require_id("userId", user_id)?;
        require_id("chapterId", chapter_id)?;
        self.ensure_user(user_id).await?;

        let resolved = self.resolver.resolve(chapter_id).await?;
        let attempts = self
            .stores
            .evaluations
            .find_all_for_user_chapter(user_id, chapter_id)
            .await?;

        let max_attempts = resolved.rule.max_attempts;
        let used = attempts.len() as u32;
        let can_retry = match attempts.last() {
            None => true,
            Some(last) => last.status == EvaluationStatus::Rejected && used < max_attempts,
        };

        Ok(AttemptHistory {
            user_id: user_id.to_string(),
            chapter_id: chapter_id.to_string(),
            attempts,
            max_attempts,
            attempts_remaining: max_attempts.saturating_sub(used),
            can_retry,
        })
    }

    pub async fn latest_evaluation(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> Result<Option<Evaluation>, ApprovalError> {
        require_id("userId", user_id)?;
        require_id("chapterId", chapter_id)?;
        Ok(self
            .stores
            .evaluations
            .find_latest(user_id, chapter_id)
            .await?)
    }

    async fn ensure_user(&self, user_id: &str) -> Result<(), ApprovalError> {
        let exists = self.stores.users.exists(user_id).await.map_err(|err| {
            error!(user_id, error = %err, "user lookup failed");
            err
        })?;
        if !exists {
            return Err(ApprovalError::user_not_found(user_id));
        }
        Ok(())
    }

    /// Read attempts, decide, write. Must run under the per-key lock; the
    /// store's uniqueness check still guards writers outside this process.
    async fn record_attempt(
        &self,
        req: &EvaluateRequest,
        resolved: &ResolvedRule,
    ) -> Result<Evaluation, ApprovalError> {
        let mut round = 0;
        loop {
            match self.try_record_attempt(req, resolved).await {
                Ok(evaluation) => return Ok(evaluation),
                Err(err) if err.is_conflict() && round < CONFLICT_RETRIES => {
                    round += 1;
                    warn!(
                        user_id = %req.user_id,
                        chapter_id = %req.chapter_id,
                        error = %err,
                        "attempt number taken, retrying"
                    );
                }
                Err(err) => {
                    error!(
                        user_id = %req.user_id,
                        chapter_id = %req.chapter_id,
                        error = %err,
                        "failed to record evaluation"
                    );
                    return Err(err.into());
                }
            }
        }
    }

    async fn try_record_attempt(
        &self,
        req: &EvaluateRequest,
        resolved: &ResolvedRule,
    ) -> Result<Evaluation, StoreError> {
        let rule = &resolved.rule;
        let attempt_number = self
            .tracker
            .next_attempt_number(&req.user_id, &req.chapter_id)
            .await?;
        let previous = self
            .tracker
            .previous_attempts(&req.user_id, &req.chapter_id, attempt_number)
            .await?;

        let carryover = compute_carryover(
            &self.config.carryover,
            rule.allow_error_carryover,
            attempt_number,
            &previous,
        );

        let decision = decide(DecisionInput {
            score: req.score,
            carryover,
            effective_threshold: resolved.effective_threshold,
            attempt_number,
            max_attempts: rule.max_attempts,
        });

        let feedback = generate_feedback(&FeedbackContext {
            status: decision.status,
            adjusted_score: decision.adjusted_score,
            effective_threshold: resolved.effective_threshold,
            attempt_number,
            carryover,
        });

        let new_evaluation = NewEvaluation {
            user_id: req.user_id.clone(),
            rule_id: rule.id.clone(),
            chapter_id: req.chapter_id.clone(),
            score: req.score,
            threshold: resolved.effective_threshold,
            status: decision.status,
            attempt_number,
            errors_from_previous_attempts: carryover,
            evaluation_data: req.evaluation_data.clone().unwrap_or_default(),
            evaluated_at: Utc::now(),
        };

        self.recorder.record(new_evaluation, &feedback).await
    }
}
