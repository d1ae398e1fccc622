#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use serde_json::Value;

use chapter_gate::approval::types::{
    ChapterStats, Evaluation, MetricSample, NewEvaluation, NewRule, Rule,
};
use chapter_gate::approval::{ApprovalEngine, EngineConfig, MetricsMode};
use chapter_gate::build_app;
use chapter_gate::state::AppState;
use chapter_gate::store::{
    EvaluationStore, MemoryEvaluationStore, MemoryMetricsSink, MemoryRuleStore,
    MemoryUserDirectory, MetricsSink, RuleStore, StoreError, Stores,
};

pub const USER: &str = "user-1";
pub const OTHER_USER: &str = "user-2";

/// Engine over in-memory collaborators, with handles kept for assertions.
pub struct Harness {
    pub rules: Arc<MemoryRuleStore>,
    pub evaluations: Arc<MemoryEvaluationStore>,
    pub metrics: Arc<MemoryMetricsSink>,
    pub users: Arc<MemoryUserDirectory>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            rules: Arc::new(MemoryRuleStore::new()),
            evaluations: Arc::new(MemoryEvaluationStore::new()),
            metrics: Arc::new(MemoryMetricsSink::new()),
            users: Arc::new(MemoryUserDirectory::with_users([USER, OTHER_USER])),
        }
    }

    pub fn stores(&self) -> Stores {
        Stores {
            rules: self.rules.clone(),
            evaluations: self.evaluations.clone(),
            metrics: self.metrics.clone(),
            users: self.users.clone(),
        }
    }

    pub fn engine(&self) -> ApprovalEngine {
        ApprovalEngine::new(self.stores(), inline_config())
    }

    pub async fn add_rule(
        &self,
        chapter_id: Option<&str>,
        threshold: f64,
        max_attempts: u32,
        carryover: bool,
    ) -> Rule {
        self.rules
            .create(new_rule(chapter_id, threshold, max_attempts, carryover))
            .await
            .unwrap()
    }
}

pub fn inline_config() -> EngineConfig {
    EngineConfig {
        metrics_mode: MetricsMode::Inline,
        ..EngineConfig::default()
    }
}

pub fn new_rule(
    chapter_id: Option<&str>,
    threshold: f64,
    max_attempts: u32,
    carryover: bool,
) -> NewRule {
    NewRule {
        chapter_id: chapter_id.map(str::to_string),
        min_score_threshold: threshold,
        max_attempts,
        allow_error_carryover: carryover,
        is_active: true,
        metadata: Default::default(),
        description: None,
    }
}

/// Metrics sink that always fails.
pub struct FailingMetricsSink;

#[async_trait]
impl MetricsSink for FailingMetricsSink {
    async fn record_samples(&self, _samples: Vec<MetricSample>) -> Result<usize, StoreError> {
        Err(StoreError::Backend("metrics sink offline".to_string()))
    }
}

/// Evaluation store whose first `conflicts` creates report a taken attempt
/// number, as another writer would cause.
pub struct ConflictingEvaluationStore {
    inner: MemoryEvaluationStore,
    conflicts_left: AtomicU32,
    create_calls: AtomicU32,
}

impl ConflictingEvaluationStore {
    pub fn new(conflicts: u32) -> Self {
        Self {
            inner: MemoryEvaluationStore::new(),
            conflicts_left: AtomicU32::new(conflicts),
            create_calls: AtomicU32::new(0),
        }
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EvaluationStore for ConflictingEvaluationStore {
    async fn create(&self, evaluation: NewEvaluation) -> Result<Evaluation, StoreError> {
        self.inner.create(evaluation).await
    }

    async fn create_with_feedback(
        &self,
        evaluation: NewEvaluation,
        feedback: &str,
    ) -> Result<Evaluation, StoreError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let inject = self
            .conflicts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if inject {
            return Err(StoreError::Conflict("attempt number taken".to_string()));
        }
        self.inner.create_with_feedback(evaluation, feedback).await
    }

    async fn update_feedback(&self, id: &str, feedback: &str) -> Result<(), StoreError> {
        self.inner.update_feedback(id, feedback).await
    }

    async fn count_for_user_chapter(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> Result<u32, StoreError> {
        self.inner.count_for_user_chapter(user_id, chapter_id).await
    }

    async fn find_previous_attempts(
        &self,
        user_id: &str,
        chapter_id: &str,
        before_attempt: u32,
    ) -> Result<Vec<Evaluation>, StoreError> {
        self.inner
            .find_previous_attempts(user_id, chapter_id, before_attempt)
            .await
    }

    async fn find_all_for_user_chapter(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> Result<Vec<Evaluation>, StoreError> {
        self.inner.find_all_for_user_chapter(user_id, chapter_id).await
    }

    async fn find_latest(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> Result<Option<Evaluation>, StoreError> {
        self.inner.find_latest(user_id, chapter_id).await
    }

    async fn count_for_rule(&self, rule_id: &str) -> Result<u64, StoreError> {
        self.inner.count_for_rule(rule_id).await
    }

    async fn chapter_stats(&self, chapter_id: &str) -> Result<ChapterStats, StoreError> {
        self.inner.chapter_stats(chapter_id).await
    }
}

/// Router over in-memory stores with two known users and a global rule
/// (threshold 80, 3 attempts, carryover on).
pub async fn create_test_app() -> (Router, AppState) {
    let harness = Harness::new();
    harness.add_rule(None, 80.0, 3, true).await;
    let state = AppState::in_memory(harness.stores(), inline_config());
    (build_app(state.clone()), state)
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
