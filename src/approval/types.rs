use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type ExtensionData = Map<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    /// `None` marks a global rule.
    pub chapter_id: Option<String>,
    pub min_score_threshold: f64,
    pub max_attempts: u32,
    pub allow_error_carryover: bool,
    pub is_active: bool,
    #[serde(default)]
    pub metadata: ExtensionData,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    pub fn is_global(&self) -> bool {
        self.chapter_id.is_none()
    }

    pub fn applies_to(&self, chapter_id: &str) -> bool {
        self.chapter_id.as_deref() == Some(chapter_id)
    }
}

#[derive(Debug, Clone)]
pub struct NewRule {
    pub chapter_id: Option<String>,
    pub min_score_threshold: f64,
    pub max_attempts: u32,
    pub allow_error_carryover: bool,
    pub is_active: bool,
    pub metadata: ExtensionData,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleFilter {
    pub chapter_id: Option<String>,
    pub is_active: Option<bool>,
    #[serde(default)]
    pub global_only: bool,
}

impl RuleFilter {
    pub fn matches(&self, rule: &Rule) -> bool {
        if self.global_only && !rule.is_global() {
            return false;
        }
        if let Some(ref chapter_id) = self.chapter_id {
            if !rule.applies_to(chapter_id) {
                return false;
            }
        }
        match self.is_active {
            Some(active) => rule.is_active == active,
            None => true,
        }
    }
}

/// `Pending` is kept for stored records and forward compatibility; the
/// decision engine only ever yields `Approved` or `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationStatus {
    Pending,
    Approved,
    Rejected,
}

impl EvaluationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationStatus::Pending => "PENDING",
            EvaluationStatus::Approved => "APPROVED",
            EvaluationStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(EvaluationStatus::Pending),
            "APPROVED" => Some(EvaluationStatus::Approved),
            "REJECTED" => Some(EvaluationStatus::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub id: String,
    pub user_id: String,
    pub rule_id: String,
    pub chapter_id: String,
    /// Raw submitted score, never the penalised one.
    pub score: f64,
    /// Effective threshold applied to this attempt.
    pub threshold: f64,
    pub status: EvaluationStatus,
    pub attempt_number: u32,
    pub errors_from_previous_attempts: u32,
    pub feedback: Option<String>,
    #[serde(default)]
    pub evaluation_data: ExtensionData,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEvaluation {
    pub user_id: String,
    pub rule_id: String,
    pub chapter_id: String,
    pub score: f64,
    pub threshold: f64,
    pub status: EvaluationStatus,
    pub attempt_number: u32,
    pub errors_from_previous_attempts: u32,
    pub evaluation_data: ExtensionData,
    pub evaluated_at: DateTime<Utc>,
}

impl NewEvaluation {
    pub fn into_evaluation(self, id: String, feedback: Option<String>) -> Evaluation {
        Evaluation {
            id,
            user_id: self.user_id,
            rule_id: self.rule_id,
            chapter_id: self.chapter_id,
            score: self.score,
            threshold: self.threshold,
            status: self.status,
            attempt_number: self.attempt_number,
            errors_from_previous_attempts: self.errors_from_previous_attempts,
            feedback,
            evaluation_data: self.evaluation_data,
            evaluated_at: self.evaluated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Accuracy,
    Speed,
    Attempts,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Accuracy => "accuracy",
            MetricType::Speed => "speed",
            MetricType::Attempts => "attempts",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "accuracy" => Some(MetricType::Accuracy),
            "speed" => Some(MetricType::Speed),
            "attempts" => Some(MetricType::Attempts),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub user_id: String,
    pub chapter_id: String,
    pub metric_type: MetricType,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRequest {
    pub user_id: String,
    pub chapter_id: String,
    pub score: f64,
    #[serde(default)]
    pub time_spent: Option<f64>,
    #[serde(default)]
    pub evaluation_data: Option<ExtensionData>,
}

impl EvaluateRequest {
    pub fn new(user_id: impl Into<String>, chapter_id: impl Into<String>, score: f64) -> Self {
        Self {
            user_id: user_id.into(),
            chapter_id: chapter_id.into(),
            score,
            time_spent: None,
            evaluation_data: None,
        }
    }

    pub fn with_time_spent(mut self, seconds: f64) -> Self {
        self.time_spent = Some(seconds);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationOutcome {
    pub evaluation_id: String,
    pub status: EvaluationStatus,
    pub score: f64,
    pub adjusted_score: f64,
    pub threshold: f64,
    pub attempt_number: u32,
    pub errors_carried_over: u32,
    pub feedback: String,
    pub can_retry: bool,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttemptHistory {
    pub user_id: String,
    pub chapter_id: String,
    pub attempts: Vec<Evaluation>,
    pub max_attempts: u32,
    pub attempts_remaining: u32,
    pub can_retry: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChapterStats {
    pub chapter_id: String,
    pub total_evaluations: u64,
    pub approved: u64,
    pub rejected: u64,
    pub unique_users: u64,
    pub average_score: f64,
    pub approval_rate: f64,
    pub highest_attempt: u32,
}

impl ChapterStats {
    pub fn empty(chapter_id: &str) -> Self {
        Self {
            chapter_id: chapter_id.to_string(),
            ..Default::default()
        }
    }
}
