//! Guard functions run before any store access.

use super::error::ApprovalError;
use super::rules::CriticalChapters;
use super::types::EvaluateRequest;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;
pub const MIN_MAX_ATTEMPTS: u32 = 1;
pub const MAX_MAX_ATTEMPTS: u32 = 10;

pub fn validate_evaluate_request(req: &EvaluateRequest) -> Result<(), ApprovalError> {
    require_id("userId", &req.user_id)?;
    require_id("chapterId", &req.chapter_id)?;
    validate_score("score", req.score)?;

    if let Some(time_spent) = req.time_spent {
        if !time_spent.is_finite() || time_spent < 0.0 {
            return Err(ApprovalError::validation(
                "timeSpent must be a non-negative number",
            ));
        }
    }

    Ok(())
}

pub fn require_id(field: &str, value: &str) -> Result<(), ApprovalError> {
    if value.trim().is_empty() {
        return Err(ApprovalError::validation(format!("{field} is required")));
    }
    Ok(())
}

pub fn validate_score(field: &str, value: f64) -> Result<(), ApprovalError> {
    if !value.is_finite() || !(MIN_SCORE..=MAX_SCORE).contains(&value) {
        return Err(ApprovalError::validation(format!(
            "{field} must be between {MIN_SCORE} and {MAX_SCORE}"
        )));
    }
    Ok(())
}

/// Checks a rule's configurable settings, including the critical-chapter
/// requirement of a 100 threshold.
pub fn validate_rule_settings(
    chapter_id: Option<&str>,
    min_score_threshold: f64,
    max_attempts: u32,
    critical: &CriticalChapters,
) -> Result<(), ApprovalError> {
    if let Some(chapter_id) = chapter_id {
        require_id("chapterId", chapter_id)?;
    }

    validate_score("minScoreThreshold", min_score_threshold)?;

    if !(MIN_MAX_ATTEMPTS..=MAX_MAX_ATTEMPTS).contains(&max_attempts) {
        return Err(ApprovalError::validation(format!(
            "maxAttempts must be between {MIN_MAX_ATTEMPTS} and {MAX_MAX_ATTEMPTS}"
        )));
    }

    if let Some(chapter_id) = chapter_id {
        if critical.contains(chapter_id) && min_score_threshold != MAX_SCORE {
            return Err(ApprovalError::validation(format!(
                "chapter {chapter_id} is critical and requires minScoreThreshold of 100"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_blank_ids() {
        let err = validate_evaluate_request(&EvaluateRequest::new(" ", "1", 50.0)).unwrap_err();
        assert!(err.to_string().contains("userId"));

        let err = validate_evaluate_request(&EvaluateRequest::new("u1", "", 50.0)).unwrap_err();
        assert!(err.to_string().contains("chapterId"));
    }

    #[test]
    fn test_score_bounds() {
        for score in [0.0, 55.5, 100.0] {
            assert!(validate_evaluate_request(&EvaluateRequest::new("u1", "1", score)).is_ok());
        }
        for score in [-0.1, 100.01, f64::NAN, f64::INFINITY] {
            assert!(validate_evaluate_request(&EvaluateRequest::new("u1", "1", score)).is_err());
        }
    }

    #[test]
    fn test_negative_time_spent() {
        let req = EvaluateRequest::new("u1", "1", 90.0).with_time_spent(-1.0);
        assert!(validate_evaluate_request(&req).unwrap_err().is_validation());
    }

    #[test]
    fn test_rule_settings() {
        let critical = CriticalChapters::default();
        assert!(validate_rule_settings(None, 80.0, 3, &critical).is_ok());
        assert!(validate_rule_settings(Some("1"), 0.0, 1, &critical).is_ok());
        assert!(validate_rule_settings(Some("1"), 80.0, 0, &critical).is_err());
        assert!(validate_rule_settings(Some("1"), 80.0, 11, &critical).is_err());
        assert!(validate_rule_settings(Some("1"), 101.0, 3, &critical).is_err());
        assert!(validate_rule_settings(Some("4"), 90.0, 3, &critical).is_err());
        assert!(validate_rule_settings(Some("5"), 100.0, 3, &critical).is_ok());
    }
}
