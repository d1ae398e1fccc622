use super::types::EvaluationStatus;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionInput {
    pub score: f64,
    pub carryover: u32,
    pub effective_threshold: f64,
    pub attempt_number: u32,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub status: EvaluationStatus,
    pub adjusted_score: f64,
    pub can_retry: bool,
}

pub fn adjusted_score(score: f64, carryover: u32) -> f64 {
    (score - carryover as f64).max(0.0)
}

/// Only ever yields `Approved` or `Rejected`.
pub fn decide(input: DecisionInput) -> Decision {
    let adjusted = adjusted_score(input.score, input.carryover);
    let status = if adjusted >= input.effective_threshold {
        EvaluationStatus::Approved
    } else {
        EvaluationStatus::Rejected
    };
    let can_retry =
        status == EvaluationStatus::Rejected && input.attempt_number < input.max_attempts;

    Decision {
        status,
        adjusted_score: adjusted,
        can_retry,
    }
}
