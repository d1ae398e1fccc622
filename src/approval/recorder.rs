use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::types::{Evaluation, MetricSample, MetricType, NewEvaluation};
use crate::store::{EvaluationStore, MetricsSink, StoreError};

/// How metric samples reach the sink. Failures are swallowed in both modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsMode {
    /// Spawned onto the runtime; the caller never waits.
    #[default]
    Detached,
    /// Awaited before the evaluation call returns.
    Inline,
}

impl MetricsMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "detached" | "background" => Some(MetricsMode::Detached),
            "inline" | "sync" => Some(MetricsMode::Inline),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct EvaluationRecorder {
    evaluations: Arc<dyn EvaluationStore>,
    metrics: Arc<dyn MetricsSink>,
    mode: MetricsMode,
}

impl EvaluationRecorder {
    pub fn new(
        evaluations: Arc<dyn EvaluationStore>,
        metrics: Arc<dyn MetricsSink>,
        mode: MetricsMode,
    ) -> Self {
        Self {
            evaluations,
            metrics,
            mode,
        }
    }

    /// Persists the record together with its feedback. The store applies both
    /// writes as one unit, so a failed call leaves no attempt behind.
    pub async fn record(
        &self,
        evaluation: NewEvaluation,
        feedback: &str,
    ) -> Result<Evaluation, StoreError> {
        self.evaluations
            .create_with_feedback(evaluation, feedback)
            .await
    }

    pub async fn emit_metrics(&self, samples: Vec<MetricSample>) {
        if samples.is_empty() {
            return;
        }

        match self.mode {
            MetricsMode::Inline => deliver(Arc::clone(&self.metrics), samples).await,
            MetricsMode::Detached => {
                let sink = Arc::clone(&self.metrics);
                tokio::spawn(deliver(sink, samples));
            }
        }
    }
}

async fn deliver(sink: Arc<dyn MetricsSink>, samples: Vec<MetricSample>) {
    let count = samples.len();
    match sink.record_samples(samples).await {
        Ok(written) => tracing::debug!(written, "evaluation metrics recorded"),
        Err(err) => tracing::warn!(error = %err, count, "failed to record evaluation metrics"),
    }
}

/// Accuracy and attempt samples always; speed only when time spent is known.
pub fn build_metric_samples(evaluation: &Evaluation, time_spent: Option<f64>) -> Vec<MetricSample> {
    let recorded_at = Utc::now();
    let sample = |metric_type: MetricType, value: f64| MetricSample {
        user_id: evaluation.user_id.clone(),
        chapter_id: evaluation.chapter_id.clone(),
        metric_type,
        value,
        recorded_at,
    };

    let mut samples = vec![
        sample(MetricType::Accuracy, evaluation.score),
        sample(MetricType::Attempts, evaluation.attempt_number as f64),
    ];
    if let Some(seconds) = time_spent {
        samples.push(sample(MetricType::Speed, seconds));
    }
    samples
}
