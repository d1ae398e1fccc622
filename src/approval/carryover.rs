use serde::{Deserialize, Serialize};

use super::types::{Evaluation, EvaluationStatus};

pub const DEFAULT_CARRYOVER_CAP: u32 = 50;
pub const DEFAULT_PENALTY_STEP: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarryoverPolicy {
    /// Upper bound on the total penalty.
    pub cap: u32,
    /// Shortfall that costs one penalty point; partial steps round up.
    pub penalty_step: f64,
}

impl Default for CarryoverPolicy {
    fn default() -> Self {
        Self {
            cap: DEFAULT_CARRYOVER_CAP,
            penalty_step: DEFAULT_PENALTY_STEP,
        }
    }
}

impl CarryoverPolicy {
    /// Penalty contributed by one earlier attempt. Uses the raw score so a
    /// penalty already applied to that attempt is not counted twice.
    pub fn penalty_for(&self, attempt: &Evaluation) -> u32 {
        if attempt.status != EvaluationStatus::Rejected {
            return 0;
        }
        let deficit = (attempt.threshold - attempt.score).max(0.0);
        if deficit == 0.0 || self.penalty_step <= 0.0 {
            return 0;
        }
        (deficit / self.penalty_step).ceil() as u32
    }

    pub fn total(&self, previous: &[Evaluation]) -> u32 {
        previous
            .iter()
            .map(|attempt| self.penalty_for(attempt))
            .fold(0u32, u32::saturating_add)
            .min(self.cap)
    }
}

/// Penalty carried into attempt `attempt_number`; zero when the rule disables
/// carryover or on a first attempt.
pub fn compute_carryover(
    policy: &CarryoverPolicy,
    allow_error_carryover: bool,
    attempt_number: u32,
    previous: &[Evaluation],
) -> u32 {
    if !allow_error_carryover || attempt_number <= 1 {
        return 0;
    }
    policy.total(previous)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn attempt(n: u32, score: f64, threshold: f64, status: EvaluationStatus) -> Evaluation {
        Evaluation {
            id: format!("e{n}"),
            user_id: "u1".to_string(),
            rule_id: "r1".to_string(),
            chapter_id: "1".to_string(),
            score,
            threshold,
            status,
            attempt_number: n,
            errors_from_previous_attempts: 0,
            feedback: None,
            evaluation_data: Default::default(),
            evaluated_at: Utc::now(),
        }
    }

    #[test]
    fn test_single_rejection_deficit_ten() {
        let policy = CarryoverPolicy::default();
        let previous = vec![attempt(1, 70.0, 80.0, EvaluationStatus::Rejected)];
        assert_eq!(compute_carryover(&policy, true, 2, &previous), 1);
    }

    #[test]
    fn test_partial_step_rounds_up() {
        let policy = CarryoverPolicy::default();
        assert_eq!(policy.penalty_for(&attempt(1, 79.0, 80.0, EvaluationStatus::Rejected)), 1);
        assert_eq!(policy.penalty_for(&attempt(1, 59.5, 80.0, EvaluationStatus::Rejected)), 3);
        assert_eq!(policy.penalty_for(&attempt(1, 0.0, 100.0, EvaluationStatus::Rejected)), 10);
    }

    #[test]
    fn test_approved_and_pending_attempts_contribute_nothing() {
        let policy = CarryoverPolicy::default();
        let previous = vec![
            attempt(1, 50.0, 80.0, EvaluationStatus::Approved),
            attempt(2, 50.0, 80.0, EvaluationStatus::Pending),
        ];
        assert_eq!(compute_carryover(&policy, true, 3, &previous), 0);
    }

    #[test]
    fn test_disabled_or_first_attempt() {
        let policy = CarryoverPolicy::default();
        let previous = vec![attempt(1, 10.0, 80.0, EvaluationStatus::Rejected)];
        assert_eq!(compute_carryover(&policy, false, 2, &previous), 0);
        assert_eq!(compute_carryover(&policy, true, 1, &previous), 0);
    }

    #[test]
    fn test_sum_is_capped() {
        let policy = CarryoverPolicy::default();
        let previous: Vec<Evaluation> = (1..=9)
            .map(|n| attempt(n, 0.0, 100.0, EvaluationStatus::Rejected))
            .collect();
        assert_eq!(compute_carryover(&policy, true, 10, &previous), 50);
    }

    #[test]
    fn test_score_above_threshold_on_rejected_record() {
        // a rejection caused by an earlier penalty has no raw deficit of its own
        let policy = CarryoverPolicy::default();
        let previous = vec![attempt(1, 85.0, 80.0, EvaluationStatus::Rejected)];
        assert_eq!(compute_carryover(&policy, true, 2, &previous), 0);
    }

    fn arb_attempt() -> impl Strategy<Value = Evaluation> {
        (
            0u32..=100,
            0u32..=100,
            prop_oneof![
                Just(EvaluationStatus::Approved),
                Just(EvaluationStatus::Rejected)
            ],
        )
            .prop_map(|(score, threshold, status)| {
                attempt(1, score as f64, threshold as f64, status)
            })
    }

    proptest! {
        #[test]
        fn prop_carryover_never_exceeds_cap(previous in proptest::collection::vec(arb_attempt(), 0..20)) {
            let policy = CarryoverPolicy::default();
            let total = compute_carryover(&policy, true, previous.len() as u32 + 1, &previous);
            prop_assert!(total <= DEFAULT_CARRYOVER_CAP);
        }

        #[test]
        fn prop_carryover_is_sum_when_below_cap(previous in proptest::collection::vec(arb_attempt(), 0..4)) {
            let policy = CarryoverPolicy::default();
            let expected: u32 = previous.iter().map(|a| policy.penalty_for(a)).sum();
            let total = compute_carryover(&policy, true, previous.len() as u32 + 1, &previous);
            prop_assert_eq!(total, expected.min(DEFAULT_CARRYOVER_CAP));
        }
    }
}
